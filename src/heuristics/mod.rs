pub mod fillers;
pub mod fragments;
pub mod repetition;

pub use fillers::*;
pub use fragments::*;
pub use repetition::*;

use regex::Regex;

use crate::error::PipelineError;

/// Configuration for the rule-based noise filter
#[derive(Debug, Clone)]
pub struct NoiseFilterConfig {
    /// Disfluencies removed from space-delimited text
    pub fillers: Vec<String>,
    /// Phrases removed only when set off by commas ("is, you know, the")
    pub parenthetical_fillers: Vec<String>,
    /// Disfluencies removed from CJK text
    pub cjk_fillers: Vec<String>,
    /// Collapse immediate repetitions ("very very")
    pub collapse_repetitions: bool,
    /// If cleaning keeps less than this share of characters, the input is
    /// returned with only whitespace normalized
    pub min_retained_ratio: f64,
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        Self {
            fillers: vec![
                "um".to_string(),
                "umm".to_string(),
                "uh".to_string(),
                "uhh".to_string(),
                "uhm".to_string(),
                "erm".to_string(),
                "er".to_string(),
                "ah".to_string(),
                "hmm".to_string(),
                "mhm".to_string(),
                "uh-huh".to_string(),
                "mm-hmm".to_string(),
            ],
            parenthetical_fillers: vec!["you know".to_string(), "I mean".to_string()],
            cjk_fillers: ["嗯", "呃", "啊", "哦", "哼", "唉", "哎"].iter().map(|s| s.to_string()).collect(),
            collapse_repetitions: true,
            min_retained_ratio: 0.3,
        }
    }
}

/// Deterministic pre-model text normalizer
///
/// Removes filler tokens and immediate repetitions while keeping sentence
/// boundaries and line breaks. Quoted spans ("...", “...”, 「...」, `...`) are
/// passed through untouched. Never fails on input text.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    config: NoiseFilterConfig,
    filler_pattern: Option<Regex>,
    parenthetical_pattern: Option<Regex>,
    cjk_pattern: Option<Regex>,
    quoted: Regex,
    space_before_punct: Regex,
    spaces: Regex,
    blank_lines: Regex,
}

impl NoiseFilter {
    pub fn new(config: NoiseFilterConfig) -> Result<Self, PipelineError> {
        let compile_err = |e: regex::Error| PipelineError::Config(format!("noise filter: {}", e));

        Ok(Self {
            filler_pattern: build_filler_pattern(&config.fillers).map_err(compile_err)?,
            parenthetical_pattern: build_parenthetical_pattern(&config.parenthetical_fillers).map_err(compile_err)?,
            cjk_pattern: build_cjk_pattern(&config.cjk_fillers).map_err(compile_err)?,
            quoted: Regex::new("\"[^\"\\n]*\"|“[^”\\n]*”|「[^」\\n]*」|`[^`\\n]*`").map_err(compile_err)?,
            space_before_punct: Regex::new(r"[ \t]+([,.!?;:，。！？；：])").map_err(compile_err)?,
            spaces: Regex::new(r"[ \t]+").map_err(compile_err)?,
            blank_lines: Regex::new(r"\n{3,}").map_err(compile_err)?,
            config,
        })
    }

    pub fn config(&self) -> &NoiseFilterConfig {
        &self.config
    }

    /// Clean a block of transcript text
    pub fn clean(&self, text: &str) -> String {
        let mut cleaned = String::with_capacity(text.len());
        let mut cursor = 0;

        for quoted in self.quoted.find_iter(text) {
            cleaned.push_str(&self.clean_unquoted(&text[cursor..quoted.start()]));
            cleaned.push_str(quoted.as_str());
            cursor = quoted.end();
        }
        cleaned.push_str(&self.clean_unquoted(&text[cursor..]));

        let cleaned = self.normalize_whitespace(&cleaned);

        let original_len = text.chars().count() as f64;
        if (cleaned.chars().count() as f64) < original_len * self.config.min_retained_ratio {
            tracing::debug!(
                "Noise filter removed too much ({} -> {} chars), keeping input",
                original_len,
                cleaned.chars().count()
            );
            return self.normalize_whitespace(text);
        }

        cleaned
    }

    fn clean_unquoted(&self, span: &str) -> String {
        if span.is_empty() {
            return String::new();
        }
        let patterns = FillerPatterns {
            words: self.filler_pattern.as_ref(),
            parenthetical: self.parenthetical_pattern.as_ref(),
            cjk: self.cjk_pattern.as_ref(),
        };
        let mut span = strip_fillers(span, patterns);
        if self.config.collapse_repetitions {
            span = collapse_repetitions(&span);
        }
        self.space_before_punct.replace_all(&span, "$1").into_owned()
    }

    fn normalize_whitespace(&self, text: &str) -> String {
        let text = text.replace("\r\n", "\n");
        let text = self.spaces.replace_all(&text, " ");
        let text = text
            .split('\n')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n");
        self.blank_lines.replace_all(&text, "\n\n").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> NoiseFilter {
        NoiseFilter::new(NoiseFilterConfig::default()).unwrap()
    }

    fn normalized(text: &str) -> String {
        text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_removes_fillers_and_keeps_content() {
        let out = filter().clean("Um, today we will, uh, learn about calculus.");
        let lower = out.to_lowercase();

        assert!(!lower.contains("um"));
        assert!(!lower.contains("uh"));
        assert!(normalized(&out).contains("today we will learn about calculus"));
    }

    #[test]
    fn test_line_structure_preserved() {
        let out = filter().clean("First point, um, limits.\nSecond point.\n\n\n\nNew topic uh derivatives.");
        assert_eq!(out, "First point limits.\nSecond point.\n\nNew topic derivatives.");
    }

    #[test]
    fn test_quoted_terms_untouched() {
        let out = filter().clean("The keyword \"um uh\" is reserved, um, in this language.");
        assert!(out.contains("\"um uh\""));
        assert!(!out.contains(", um,"));
    }

    #[test]
    fn test_repetition_emphasis_removed() {
        let out = filter().clean("This is very very important.");
        assert_eq!(out, "This is very important.");
    }

    #[test]
    fn test_you_know_as_question_kept() {
        assert_eq!(filter().clean("Do you know the limit?"), "Do you know the limit?");
        assert_eq!(filter().clean("This is, you know, the limit."), "This is the limit.");
    }

    #[test]
    fn test_chinese_interjections_removed() {
        assert_eq!(filter().clean("哦，导数啊就是变化率。"), "导数就是变化率。");
    }

    #[test]
    fn test_numeric_content_untouched() {
        let text = "The identity matrix is 1 0 0 1 in row order.";
        assert_eq!(filter().clean(text), text);
    }

    #[test]
    fn test_no_match_passes_through() {
        let text = "The derivative is the limit of the difference quotient.";
        assert_eq!(filter().clean(text), text);
    }

    #[test]
    fn test_over_cleaning_guard() {
        let out = filter().clean("um uh um uh um uh hmm ok");
        assert_eq!(out, "um uh um uh um uh hmm ok");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(filter().clean(""), "");
    }
}
