use tracing::debug;

use crate::error::PipelineError;
use crate::heuristics::{merge_fragments, render_paragraphs, NoiseFilter};
use crate::models::SubtitleEntry;

/// Configuration for the clean stage
#[derive(Debug, Clone)]
pub struct CleanConfig {
    /// Timed entries shorter than this are merged into a neighbour
    pub min_entry_ms: u64,
    /// A pause longer than this starts a new paragraph
    pub paragraph_gap_ms: u64,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            min_entry_ms: 1_500,
            paragraph_gap_ms: 2_500,
        }
    }
}

/// Execute the clean stage: merge fragments, render paragraphs, filter noise
pub fn execute_clean(
    entries: &[SubtitleEntry],
    filter: &NoiseFilter,
    config: &CleanConfig,
) -> Result<String, PipelineError> {
    let merged = merge_fragments(entries, config.min_entry_ms);
    let text = render_paragraphs(&merged, config.paragraph_gap_ms);
    let cleaned = filter.clean(&text);

    debug!(
        entries = entries.len(),
        merged = merged.len(),
        raw_chars = text.len(),
        cleaned_chars = cleaned.len(),
        "Cleaned subtitle text"
    );

    if cleaned.trim().is_empty() {
        return Err(PipelineError::InputError("document has no subtitle text".to_string()));
    }
    Ok(cleaned)
}
