use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{KnowledgePoint, SourceId, SubtitleEntry};
use crate::error::PipelineError;

/// Per-document stage state machine
///
/// `Pending -> Cleaning -> Reducing -> Structuring -> Marking -> Done`, with
/// `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Cleaning,
    Reducing,
    Structuring,
    Marking,
    Done,
    Failed,
}

impl StageStatus {
    /// The stage that must follow this one on the success path
    pub fn next(self) -> Option<StageStatus> {
        match self {
            Self::Pending => Some(Self::Cleaning),
            Self::Cleaning => Some(Self::Reducing),
            Self::Reducing => Some(Self::Structuring),
            Self::Structuring => Some(Self::Marking),
            Self::Marking => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, to: StageStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == StageStatus::Failed || self.next() == Some(to)
    }
}

/// A lecture transcript moving through the per-document stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_id: SourceId,
    /// Human-readable name (file stem), used for fallback titles
    pub title: String,
    pub raw_entries: Vec<SubtitleEntry>,
    pub cleaned_text: String,
    /// Output of the reduce stage (equal to `cleaned_text` when degraded)
    pub core_text: String,
    pub stage_status: StageStatus,
    pub knowledge_points: Vec<KnowledgePoint>,
    /// A fallback path replaced a model stage
    pub degraded: bool,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    /// Structure candidates rejected as malformed
    pub dropped_candidates: usize,
    /// Model retries spent on this document
    pub retries: u32,
}

impl Document {
    pub fn new(source_id: SourceId, title: impl Into<String>, raw_entries: Vec<SubtitleEntry>) -> Self {
        let mut raw_entries = raw_entries;
        raw_entries.sort_by_key(|e| e.start_ms);

        Self {
            source_id,
            title: title.into(),
            raw_entries,
            cleaned_text: String::new(),
            core_text: String::new(),
            stage_status: StageStatus::Pending,
            knowledge_points: Vec::new(),
            degraded: false,
            error: None,
            warnings: Vec::new(),
            dropped_candidates: 0,
            retries: 0,
        }
    }

    /// Create a document keyed by its file path
    pub fn from_path(path: &Path, raw_entries: Vec<SubtitleEntry>) -> Self {
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(SourceId::new(path.display().to_string()), title, raw_entries)
    }

    /// Move to the next stage, rejecting out-of-order transitions
    pub fn advance_to(&mut self, to: StageStatus) -> Result<(), PipelineError> {
        if !self.stage_status.can_transition_to(to) {
            return Err(PipelineError::InvalidTransition {
                from: self.stage_status,
                to,
            });
        }
        self.stage_status = to;
        Ok(())
    }

    /// Mark the document failed, keeping any partial progress
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.stage_status.is_terminal() {
            self.stage_status = StageStatus::Failed;
        }
        self.error = Some(reason.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}
