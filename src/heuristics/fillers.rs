use regex::Regex;

/// Build the filler-removal pattern for space-delimited languages
///
/// Each filler may be wrapped in commas ("we will, uh, learn"); the whole
/// match is replaced by a single space. Longer fillers are tried first so
/// "uh-huh" wins over "uh".
pub fn build_filler_pattern(fillers: &[String]) -> Result<Option<Regex>, regex::Error> {
    let mut words: Vec<&String> = fillers.iter().filter(|w| !w.trim().is_empty()).collect();
    if words.is_empty() {
        return Ok(None);
    }
    words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    words.dedup();

    let alternation = words
        .iter()
        .map(|w| regex::escape(w.trim()).replace(' ', r"[ \t]+"))
        .collect::<Vec<_>>()
        .join("|");

    Regex::new(&format!(r"(?i)[,，]?[ \t]*\b(?:{})\b[ \t]*[,，]?", alternation)).map(Some)
}

/// Build the pattern for phrases that are only filler when set off by commas
///
/// "this is, you know, the limit" loses the phrase while "do you know the
/// limit?" keeps it. A phrase opening a line needs a trailing comma.
pub fn build_parenthetical_pattern(phrases: &[String]) -> Result<Option<Regex>, regex::Error> {
    let mut words: Vec<&String> = phrases.iter().filter(|w| !w.trim().is_empty()).collect();
    if words.is_empty() {
        return Ok(None);
    }
    words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    words.dedup();

    let alternation = words
        .iter()
        .map(|w| regex::escape(w.trim()).replace(' ', r"[ \t]+"))
        .collect::<Vec<_>>()
        .join("|");

    Regex::new(&format!(
        r"(?im)(?:[,，][ \t]*\b(?:{alt})\b[ \t]*(?:[,，]|(?P<end>[.!?。！？]))|^[ \t]*\b(?:{alt})\b[ \t]*[,，])",
        alt = alternation
    ))
    .map(Some)
}

/// Build the pattern for fillers in scripts without word spacing (CJK)
pub fn build_cjk_pattern(fillers: &[String]) -> Result<Option<Regex>, regex::Error> {
    let words: Vec<String> = fillers
        .iter()
        .filter(|w| !w.trim().is_empty())
        .map(|w| regex::escape(w.trim()))
        .collect();
    if words.is_empty() {
        return Ok(None);
    }

    Regex::new(&format!(r"[ \t]*(?:{})+[ \t]*[，,、]?", words.join("|"))).map(Some)
}

/// Compiled filler patterns, any of which may be absent
#[derive(Debug, Clone, Copy, Default)]
pub struct FillerPatterns<'a> {
    pub words: Option<&'a Regex>,
    pub parenthetical: Option<&'a Regex>,
    pub cjk: Option<&'a Regex>,
}

/// Remove filler matches from a span of unquoted text
pub fn strip_fillers(text: &str, patterns: FillerPatterns<'_>) -> String {
    let mut text = text.to_string();
    if let Some(re) = patterns.parenthetical {
        text = re
            .replace_all(&text, |caps: &regex::Captures| match caps.name("end") {
                Some(end) => end.as_str().to_string(),
                None => " ".to_string(),
            })
            .into_owned();
    }
    if let Some(re) = patterns.words {
        text = re.replace_all(&text, " ").into_owned();
    }
    if let Some(re) = patterns.cjk {
        text = re.replace_all(&text, "").into_owned();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn words_only(re: &Option<Regex>) -> FillerPatterns<'_> {
        FillerPatterns {
            words: re.as_ref(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fillers_with_commas() {
        let re = build_filler_pattern(&words(&["um", "uh"])).unwrap();
        let out = strip_fillers("Um, today we will, uh, learn", words_only(&re));
        assert_eq!(out.split_whitespace().collect::<Vec<_>>().join(" "), "today we will learn");
    }

    #[test]
    fn test_filler_inside_word_untouched() {
        let re = build_filler_pattern(&words(&["um", "uh"])).unwrap();
        let out = strip_fillers("the umbrella theorem and maximum", words_only(&re));
        assert_eq!(out, "the umbrella theorem and maximum");
    }

    #[test]
    fn test_longest_filler_wins() {
        let re = build_filler_pattern(&words(&["uh", "uh-huh"])).unwrap();
        let out = strip_fillers("yes uh-huh right", words_only(&re));
        assert!(!out.contains("huh"));
    }

    #[test]
    fn test_cjk_fillers() {
        let re = build_cjk_pattern(&words(&["嗯", "呃", "啊", "哎"])).unwrap();
        let patterns = FillerPatterns {
            cjk: re.as_ref(),
            ..Default::default()
        };
        assert_eq!(strip_fillers("嗯，我们今天呃讲导数", patterns), "我们今天讲导数");
        assert_eq!(strip_fillers("哎，这个啊啊就是极限", patterns), "这个就是极限");
    }

    #[test]
    fn test_parenthetical_only_between_commas() {
        let re = build_parenthetical_pattern(&words(&["you know"])).unwrap();
        let patterns = FillerPatterns {
            parenthetical: re.as_ref(),
            ..Default::default()
        };
        let squash = |s: String| s.split_whitespace().collect::<Vec<_>>().join(" ");

        assert_eq!(strip_fillers("Do you know the limit?", patterns), "Do you know the limit?");
        assert_eq!(squash(strip_fillers("This is, you know, the limit.", patterns)), "This is the limit.");
        assert_eq!(squash(strip_fillers("It converges, you know.", patterns)), "It converges.");
        assert_eq!(squash(strip_fillers("You know, limits come first.", patterns)), "limits come first.");
    }

    #[test]
    fn test_empty_lists() {
        assert!(build_filler_pattern(&[]).unwrap().is_none());
        assert!(build_cjk_pattern(&words(&[" "])).unwrap().is_none());
    }
}
