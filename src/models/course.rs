use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::{KnowledgePoint, PointId, SourceId, VideoMarker, DEFAULT_IMPORTANCE};

/// Pedagogical level tag used to order topics and chapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicLevel {
    /// Introductory concepts, sequenced first
    Foundational,
    Core,
    /// Applications and advanced material, sequenced last
    Applied,
}

impl TopicLevel {
    /// Lenient parse of a model-supplied tag
    pub fn parse(tag: &str) -> TopicLevel {
        match tag.trim().to_lowercase().as_str() {
            "foundational" | "foundation" | "introductory" | "intro" | "basic" | "basics" => {
                TopicLevel::Foundational
            }
            "applied" | "application" | "advanced" => TopicLevel::Applied,
            _ => TopicLevel::Core,
        }
    }
}

/// Intermediate grouping of points by semantic topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCluster {
    pub topic_label: String,
    pub level: TopicLevel,
    /// Indices into the clustered point slice, ascending
    pub member_indices: BTreeSet<usize>,
}

impl TopicCluster {
    pub fn earliest_point(&self) -> Option<usize> {
        self.member_indices.iter().next().copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    /// 1-based position in the course
    pub order: usize,
    pub level: TopicLevel,
    pub point_ids: Vec<PointId>,
}

/// Ordered chapter arrangement covering every point of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseStructure {
    pub name: String,
    pub chapters: Vec<Chapter>,
    /// chapter order -> orders of its prerequisite chapters
    pub prerequisites: BTreeMap<usize, BTreeSet<usize>>,
    /// Auto-corrected anomalies recorded while building the structure
    #[serde(default)]
    pub warnings: Vec<String>,
    /// The single-chapter fallback was used
    #[serde(default)]
    pub fallback: bool,
}

impl CourseStructure {
    /// No chapter precedes one of its prerequisites
    pub fn is_topologically_ordered(&self) -> bool {
        self.prerequisites
            .iter()
            .all(|(chapter, prereqs)| prereqs.iter().all(|p| p < chapter))
    }

    /// Every point id appears in exactly one chapter
    pub fn partitions(&self, points: &[KnowledgePoint]) -> bool {
        let mut seen = HashSet::new();
        for id in self.chapters.iter().flat_map(|c| &c.point_ids) {
            if !seen.insert(id) {
                return false;
            }
        }
        seen.len() == points.len() && points.iter().all(|p| seen.contains(&p.id))
    }
}

/// A consolidated entry standing in for one or more original points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedKnowledge {
    pub title: String,
    pub content: String,
    /// Never empty; ordered by original insertion order
    pub contributing_point_ids: Vec<PointId>,
    pub transition_text: Option<String>,
    #[serde(default)]
    pub video_markers: Vec<VideoMarker>,
    #[serde(default)]
    pub sources: Vec<SourceId>,
    #[serde(default = "default_importance")]
    pub importance: u8,
    /// Worked-example lines lifted from the contributing points
    #[serde(default)]
    pub examples: Vec<String>,
}

fn default_importance() -> u8 {
    DEFAULT_IMPORTANCE
}

/// Examples kept per merged entry
pub const MAX_EXAMPLES: usize = 3;

const EXAMPLE_MARKERS: &[&str] = &["例", "example", "for instance", "e.g."];

/// Lines of point content that present a worked example
///
/// A line qualifies when it mentions an example marker and is between 20 and
/// 500 characters long. Duplicates are skipped, at most [`MAX_EXAMPLES`].
pub fn extract_examples(points: &[&KnowledgePoint]) -> Vec<String> {
    let mut examples: Vec<String> = Vec::new();
    let lines = points.iter().flat_map(|p| p.content.lines()).map(str::trim);
    for line in lines {
        let len = line.chars().count();
        if len <= 20 || len >= 500 {
            continue;
        }
        let lower = line.to_lowercase();
        if !EXAMPLE_MARKERS.iter().any(|m| lower.contains(m)) || examples.iter().any(|e| e == line) {
            continue;
        }
        examples.push(line.to_string());
        if examples.len() == MAX_EXAMPLES {
            break;
        }
    }
    examples
}

impl MergedKnowledge {
    pub fn singleton(point: &KnowledgePoint) -> Self {
        Self {
            title: point.title.clone(),
            content: point.content.clone(),
            contributing_point_ids: vec![point.id.clone()],
            transition_text: None,
            video_markers: point.video_markers.clone(),
            sources: vec![point.source_document_id.clone()],
            importance: point.importance,
            examples: extract_examples(&[point]),
        }
    }

    pub fn is_merge(&self) -> bool {
        self.contributing_point_ids.len() > 1
    }

    /// View this entry as a fresh point, e.g. for a second fusion pass
    pub fn to_point(&self) -> KnowledgePoint {
        let source = self
            .sources
            .first()
            .cloned()
            .unwrap_or_else(|| SourceId::new("merged"));
        let id = self
            .contributing_point_ids
            .first()
            .cloned()
            .unwrap_or_else(|| PointId::new(&source, 0));

        KnowledgePoint {
            id,
            title: self.title.clone(),
            content: self.content.clone(),
            video_markers: self.video_markers.clone(),
            source_document_id: source,
            importance: self.importance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextbookChapter {
    pub title: String,
    pub order: usize,
    /// Bridging paragraph from the previous chapter
    pub transition: Option<String>,
    pub entries: Vec<MergedKnowledge>,
}

/// Final consolidated course handed to the exporters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Textbook {
    pub name: String,
    pub chapters: Vec<TextbookChapter>,
    pub prerequisites: BTreeMap<usize, BTreeSet<usize>>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Textbook {
    pub fn entry_count(&self) -> usize {
        self.chapters.iter().map(|c| c.entries.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(i: usize) -> KnowledgePoint {
        KnowledgePoint::new(&SourceId::new("doc"), i, format!("t{}", i), "c", 3)
    }

    #[test]
    fn test_extract_examples() {
        let source = SourceId::new("doc");
        let first = KnowledgePoint::new(
            &source,
            0,
            "Chain rule",
            "The chain rule differentiates compositions.\nFor example, the derivative of sin(x^2) is 2x cos(x^2).\nExample: short",
            3,
        );
        let second = KnowledgePoint::new(
            &source,
            1,
            "链式法则",
            "例题：求 sin(x^2) 的导数，结果为 2x cos(x^2)，这是复合函数求导的典型例子。\nFor example, the derivative of sin(x^2) is 2x cos(x^2).",
            3,
        );

        let examples = extract_examples(&[&first, &second]);
        assert_eq!(examples.len(), 2);
        assert!(examples[0].starts_with("For example"));
        assert!(examples[1].starts_with("例题"));
        assert!(extract_examples(&[&point(0)]).is_empty());
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(TopicLevel::parse("Introductory"), TopicLevel::Foundational);
        assert_eq!(TopicLevel::parse("advanced"), TopicLevel::Applied);
        assert_eq!(TopicLevel::parse("whatever"), TopicLevel::Core);
        assert!(TopicLevel::Foundational < TopicLevel::Applied);
    }

    #[test]
    fn test_partition_check() {
        let points = vec![point(0), point(1)];
        let mut structure = CourseStructure {
            name: "c".to_string(),
            chapters: vec![Chapter {
                title: "one".to_string(),
                order: 1,
                level: TopicLevel::Core,
                point_ids: vec![points[0].id.clone(), points[1].id.clone()],
            }],
            prerequisites: BTreeMap::new(),
            warnings: vec![],
            fallback: false,
        };
        assert!(structure.partitions(&points));

        structure.chapters[0].point_ids.push(points[0].id.clone());
        assert!(!structure.partitions(&points));
    }

    #[test]
    fn test_topological_check() {
        let mut structure = CourseStructure {
            name: "c".to_string(),
            chapters: vec![],
            prerequisites: BTreeMap::new(),
            warnings: vec![],
            fallback: false,
        };
        structure.prerequisites.insert(2, BTreeSet::from([1]));
        assert!(structure.is_topologically_ordered());
        structure.prerequisites.insert(1, BTreeSet::from([3]));
        assert!(!structure.is_topologically_ordered());
    }
}
