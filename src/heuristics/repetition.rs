/// Longest phrase (in words) considered for immediate-repetition collapse
pub const MAX_REPEATED_PHRASE: usize = 3;

/// Collapse immediate repetitions ("the the", "very very", "we will we will")
///
/// Works line by line so line breaks survive. A word carrying sentence-final
/// punctuation ends a phrase: "Go. Go." is left alone.
pub fn collapse_repetitions(text: &str) -> String {
    text.split('\n')
        .map(collapse_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_line(line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return line.to_string();
    }

    let keys: Vec<String> = tokens.iter().map(|t| normalize(t)).collect();
    let mut kept: Vec<usize> = Vec::with_capacity(tokens.len());
    let mut i = 0;

    'outer: while i < tokens.len() {
        for n in (1..=MAX_REPEATED_PHRASE).rev() {
            if kept.len() < n || i + n > tokens.len() {
                continue;
            }
            let previous = &kept[kept.len() - n..];
            let last_kept = tokens[previous[n - 1]];
            if ends_sentence(last_kept) {
                continue;
            }
            let repeated = previous
                .iter()
                .zip(i..i + n)
                .all(|(&p, c)| !keys[p].is_empty() && keys[p] == keys[c]);
            if repeated {
                i += n;
                continue 'outer;
            }
        }
        kept.push(i);
        i += 1;
    }

    if kept.len() == tokens.len() {
        return line.to_string();
    }

    let leading = &line[..line.len() - line.trim_start().len()];
    let body = kept.iter().map(|&k| tokens[k]).collect::<Vec<_>>().join(" ");
    format!("{}{}", leading, body)
}

/// Comparison key of a word, empty when the token never counts as a repeat
///
/// Numbers, symbols and single letters are content ("1 1 2 3", "x x"), so
/// only words of two or more letters can collapse.
fn normalize(token: &str) -> String {
    let word = token.trim_matches(|c: char| !c.is_alphanumeric());
    let is_word = word.chars().count() >= 2
        && word.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-');
    if is_word { word.to_lowercase() } else { String::new() }
}

fn ends_sentence(token: &str) -> bool {
    token.ends_with(['.', '!', '?', '。', '！', '？'])
}
