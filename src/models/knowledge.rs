use std::fmt;

use serde::{Deserialize, Serialize};

use super::subtitle::format_clock;

/// Unique identity of a source document (derived from its file path)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a knowledge point: `<source_id>#<index within document>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(pub String);

impl PointId {
    pub fn new(source: &SourceId, index: usize) -> Self {
        Self(format!("{}#{}", source, index))
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A moment in the source video referenced by a knowledge point
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoMarker {
    pub start_ms: u64,
    pub end_ms: u64,
    pub description: String,
}

impl VideoMarker {
    /// Time range as MM:SS-MM:SS
    pub fn time_label(&self) -> String {
        format!("{}-{}", format_clock(self.start_ms), format_clock(self.end_ms))
    }
}

pub const DEFAULT_IMPORTANCE: u8 = 3;

/// A discrete, titled unit of extracted lecture content
///
/// Immutable once emitted from a document; fusion produces new
/// [`MergedKnowledge`](super::MergedKnowledge) entries instead of editing these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePoint {
    pub id: PointId,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub video_markers: Vec<VideoMarker>,
    pub source_document_id: SourceId,
    /// 1 (peripheral) to 5 (essential)
    pub importance: u8,
}

impl KnowledgePoint {
    pub fn new(
        source: &SourceId,
        index: usize,
        title: impl Into<String>,
        content: impl Into<String>,
        importance: u8,
    ) -> Self {
        Self {
            id: PointId::new(source, index),
            title: title.into(),
            content: content.into(),
            video_markers: Vec::new(),
            source_document_id: source.clone(),
            importance: clamp_importance(importance as i64),
        }
    }

    pub fn with_markers(mut self, markers: Vec<VideoMarker>) -> Self {
        self.video_markers = markers;
        self
    }
}

/// Clamp an arbitrary model-supplied importance into 1..=5
pub fn clamp_importance(value: i64) -> u8 {
    value.clamp(1, 5) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_format() {
        let source = SourceId::new("lectures/week1.srt");
        assert_eq!(PointId::new(&source, 3).to_string(), "lectures/week1.srt#3");
    }

    #[test]
    fn test_importance_clamped() {
        let source = SourceId::new("a");
        assert_eq!(KnowledgePoint::new(&source, 0, "t", "c", 9).importance, 5);
        assert_eq!(clamp_importance(-2), 1);
        assert_eq!(clamp_importance(4), 4);
    }

    #[test]
    fn test_marker_label() {
        let marker = VideoMarker {
            start_ms: 330_000,
            end_ms: 345_000,
            description: "tangent line sketch".to_string(),
        };
        assert_eq!(marker.time_label(), "05:30-05:45");
    }
}
