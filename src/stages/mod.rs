pub mod clean;
pub mod mark_video;
pub mod reduce;
pub mod runner;
pub mod structure;

pub use clean::*;
pub use mark_video::*;
pub use reduce::*;
pub use runner::*;
pub use structure::*;

/// Split text into chunks of at most `max_chars` characters
///
/// Splits on paragraph boundaries first, then on line breaks, and only cuts
/// inside a line when a single line is longer than the limit.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() <= max_chars {
            push_piece(paragraph, "\n\n", max_chars, &mut chunks, &mut current);
            continue;
        }
        for line in paragraph.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.chars().count() <= max_chars {
                push_piece(line, "\n", max_chars, &mut chunks, &mut current);
                continue;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                let piece: String = piece.iter().collect();
                push_piece(&piece, "\n", max_chars, &mut chunks, &mut current);
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn push_piece(piece: &str, separator: &str, max_chars: usize, chunks: &mut Vec<String>, current: &mut String) {
    let needed = current.chars().count() + separator.chars().count() + piece.chars().count();
    if needed > max_chars && !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
    if !current.is_empty() {
        current.push_str(separator);
    }
    current.push_str(piece);
}
