use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::debug;

use crate::models::{Document, SubtitleEntry};

/// File extensions picked up by directory discovery
pub const SOURCE_EXTENSIONS: &[&str] = &["srt", "txt"];

static TIMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})")
        .expect("valid timing regex")
});
static BLOCK_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid separator regex"));
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>|\{\\[^}]*\}").expect("valid markup regex"));

/// Parse SRT content into entries sorted by start time
///
/// Blocks without a timing line or without text are skipped. The numeric
/// index line is optional, and both `,` and `.` millisecond separators are
/// accepted.
pub fn parse_srt(content: &str) -> Vec<SubtitleEntry> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut entries = Vec::new();
    let mut skipped = 0;

    for block in BLOCK_SEPARATOR.split(content.trim()) {
        let lines: Vec<&str> = block.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let Some(timing_line) = lines.iter().position(|l| l.contains("-->")) else {
            skipped += 1;
            continue;
        };
        let Some((start_ms, end_ms)) = parse_timing(lines[timing_line]) else {
            skipped += 1;
            continue;
        };

        let text = lines[timing_line + 1..].join(" ");
        let text = MARKUP.replace_all(&text, "").trim().to_string();
        if text.is_empty() {
            skipped += 1;
            continue;
        }
        entries.push(SubtitleEntry::new(start_ms, end_ms.max(start_ms), text));
    }

    if skipped > 0 {
        debug!(skipped, parsed = entries.len(), "Skipped unparseable subtitle blocks");
    }
    entries.sort_by_key(|e| e.start_ms);
    entries
}

fn parse_timing(line: &str) -> Option<(u64, u64)> {
    let caps = TIMING.captures(line)?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str());
    let stamp = |offset: usize| -> Option<u64> {
        let hours: u64 = field(offset)?.parse().ok()?;
        let minutes: u64 = field(offset + 1)?.parse().ok()?;
        let seconds: u64 = field(offset + 2)?.parse().ok()?;
        let millis: u64 = format!("{:0<3}", field(offset + 3)?).parse().ok()?;
        Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
    };
    Some((stamp(1)?, stamp(5)?))
}

/// Plain-text transcript: one untimed entry per paragraph
pub fn parse_txt(content: &str) -> Vec<SubtitleEntry> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    BLOCK_SEPARATOR
        .split(content.trim())
        .map(|p| p.lines().map(str::trim).collect::<Vec<_>>().join(" "))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(SubtitleEntry::untimed)
        .collect()
}

/// Read a subtitle or transcript file, choosing the parser by extension
pub fn parse_subtitle_file(path: &Path) -> Result<Vec<SubtitleEntry>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    match extension(path).as_deref() {
        Some("srt") => Ok(parse_srt(&content)),
        Some("txt") => Ok(parse_txt(&content)),
        _ => bail!("Unsupported input format: {:?} (expected .srt or .txt)", path),
    }
}

/// Parse a file into a pending document keyed by its path
pub fn load_document(path: &Path) -> Result<Document> {
    let entries = parse_subtitle_file(path)?;
    Ok(Document::from_path(path, entries))
}

/// Subtitle and transcript files directly inside `dir`, sorted by path
pub fn discover_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && extension(&path).is_some_and(|e| SOURCE_EXTENSIONS.contains(&e.as_str())) {
            sources.push(path);
        }
    }
    sources.sort();
    Ok(sources)
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\r\n00:00:01,000 --> 00:00:03,500\r\nToday we start with <i>limits</i>.\r\n\r\n\
        3\n00:00:07.250 --> 00:00:09,000\nA limit describes\nwhere a function heads.\n\n\
        2\n00:00:04,000 --> 00:00:06,000\nUm, so, yeah.\n\n\
        garbage block\nwithout timing\n\n\
        4\n00:00:10,000 --> 00:00:11,000\n\n";

    #[test]
    fn test_parse_srt() {
        let entries = parse_srt(SAMPLE);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], SubtitleEntry::new(1_000, 3_500, "Today we start with limits."));
        assert_eq!(entries[1].start_ms, 4_000);
        assert_eq!(entries[2].start_ms, 7_250);
        assert_eq!(entries[2].text, "A limit describes where a function heads.");
    }

    #[test]
    fn test_parse_timing_hours_and_short_millis() {
        assert_eq!(parse_timing("01:02:03,5 --> 01:02:04,000"), Some((3_723_500, 3_724_000)));
        assert_eq!(parse_timing("no timing here"), None);
    }

    #[test]
    fn test_parse_txt_paragraphs() {
        let entries = parse_txt("First paragraph\ncontinues here.\n\n\n  Second one.  \n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "First paragraph continues here.");
        assert!(!entries[1].is_timed());
    }

    #[test]
    fn test_discover_and_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.srt"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("a.TXT"), "Hello class.").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let sources = discover_sources(dir.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].ends_with("a.TXT"));

        let doc = load_document(&sources[1]).unwrap();
        assert_eq!(doc.title, "b");
        assert_eq!(doc.raw_entries.len(), 3);

        assert!(load_document(&dir.path().join("notes.md")).is_err());
    }
}
