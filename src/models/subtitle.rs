use serde::{Deserialize, Serialize};

/// One timed caption unit, as produced by the subtitle parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    /// Start timestamp in milliseconds
    pub start_ms: u64,
    /// End timestamp in milliseconds
    pub end_ms: u64,
    /// Caption text
    pub text: String,
}

impl SubtitleEntry {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    /// An entry with no timing information (plain-text transcripts)
    pub fn untimed(text: impl Into<String>) -> Self {
        Self::new(0, 0, text)
    }

    /// Duration of this entry in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn is_timed(&self) -> bool {
        self.end_ms > 0
    }
}

/// Format milliseconds as MM:SS (minutes are not wrapped at the hour)
pub fn format_clock(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
