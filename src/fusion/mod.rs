//! Near-duplicate detection and consolidation of knowledge points
//!
//! Pairs are pre-filtered by textual similarity, confirmed by the model, and
//! grouped with a disjoint-set so that the resulting partition does not
//! depend on the order in which confirmations arrive.

pub mod similarity;
pub mod transitions;
pub mod union_find;

pub use similarity::{content_similarity, similarity, title_similarity};
pub use transitions::{fallback_transition, TransitionWriter};
pub use union_find::DisjointSet;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::llm::{
    complete_parsed, confirm_merge_request, consolidate_request, parse_consolidation, parse_merge_decision,
    LanguageModel, MergeDecision, Retried, RetryExhausted, RetryPolicy,
};
use crate::models::{
    extract_examples, CourseStructure, KnowledgePoint, MergedKnowledge, PointId, Textbook, TextbookChapter,
};

/// Configuration for the fusion engine
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Minimum weighted similarity for a pair to be sent for confirmation
    pub similarity_threshold: f64,
    /// Highest-scoring pairs confirmed per chapter
    pub max_candidates_per_chapter: usize,
    /// Confirmation calls in flight at once
    pub confirm_concurrency: usize,
    pub retry: RetryPolicy,
    /// Write a bridging paragraph before every chapter but the first
    pub chapter_transitions: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            max_candidates_per_chapter: 200,
            confirm_concurrency: 4,
            retry: RetryPolicy::default(),
            chapter_transitions: true,
        }
    }
}

/// A pair of point indices worth confirming, `first < second`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePair {
    pub first: usize,
    pub second: usize,
    pub score: f64,
}

/// Result of fusing one set of points
#[derive(Debug, Default)]
pub struct FusionResult {
    /// Ordered by the earliest contributing point
    pub entries: Vec<MergedKnowledge>,
    pub warnings: Vec<String>,
    pub model_calls: usize,
    pub retries: u32,
}

/// Pairs at or above `threshold`, best first, ties broken by index
pub fn candidate_pairs(points: &[KnowledgePoint], threshold: f64, limit: usize) -> Vec<CandidatePair> {
    let mut pairs = Vec::new();
    for first in 0..points.len() {
        for second in first + 1..points.len() {
            let score = similarity(&points[first], &points[second]);
            if score >= threshold {
                pairs.push(CandidatePair { first, second, score });
            }
        }
    }
    pairs.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.first.cmp(&b.first))
            .then(a.second.cmp(&b.second))
    });
    pairs.truncate(limit);
    pairs
}

pub struct FusionEngine {
    model: Arc<dyn LanguageModel>,
    config: FusionConfig,
    transitions: TransitionWriter,
}

impl FusionEngine {
    pub fn new(model: Arc<dyn LanguageModel>, config: FusionConfig) -> Self {
        let transitions = TransitionWriter::new(model.clone(), config.retry.clone());
        Self {
            model,
            config,
            transitions,
        }
    }

    /// Every input id ends up in exactly one returned entry
    pub async fn merge_duplicates(&self, points: &[KnowledgePoint]) -> Vec<MergedKnowledge> {
        self.fuse(points).await.entries
    }

    /// Fuse one chapter's worth of points
    pub async fn fuse(&self, points: &[KnowledgePoint]) -> FusionResult {
        let mut result = FusionResult::default();
        let candidates = candidate_pairs(
            points,
            self.config.similarity_threshold,
            self.config.max_candidates_per_chapter,
        );
        debug!(points = points.len(), candidates = candidates.len(), "Merge candidates scored");

        let answers: Vec<Result<Retried<MergeDecision>, RetryExhausted>> = stream::iter(
            candidates.iter().map(|pair| self.confirm(points, pair)),
        )
        .buffered(self.config.confirm_concurrency.max(1))
        .collect()
        .await;
        result.model_calls += candidates.len();

        let mut set = DisjointSet::new(points.len());
        let mut confirmed: Vec<(CandidatePair, MergeDecision)> = Vec::new();
        for (pair, answer) in candidates.iter().zip(answers) {
            match answer {
                Ok(answer) => {
                    result.retries += answer.retries;
                    if answer.value.merge {
                        set.union(pair.first, pair.second);
                        confirmed.push((*pair, answer.value));
                    }
                }
                Err(exhausted) => {
                    result.retries += exhausted.retries;
                    warn!(
                        first = %points[pair.first].id,
                        second = %points[pair.second].id,
                        error = %exhausted,
                        "Merge confirmation failed, keeping points separate"
                    );
                    result.warnings.push(format!(
                        "could not confirm merge of '{}' and '{}': {}",
                        points[pair.first].title, points[pair.second].title, exhausted.last_error
                    ));
                }
            }
        }

        for group in set.groups() {
            let entry = match group.as_slice() {
                [single] => MergedKnowledge::singleton(&points[*single]),
                [first, second] => {
                    let decision = confirmed
                        .iter()
                        .find(|(pair, _)| pair.first == *first && pair.second == *second)
                        .map(|(_, decision)| decision);
                    merge_pair(&points[*first], &points[*second], decision)
                }
                members => {
                    result.model_calls += 1;
                    self.merge_group(points, members, &confirmed, &mut result).await
                }
            };
            result.entries.push(entry);
        }

        let merged = result.entries.iter().filter(|e| e.is_merge()).count();
        if merged > 0 {
            info!(input = points.len(), output = result.entries.len(), merged, "Duplicates merged");
        }
        result
    }

    async fn confirm(
        &self,
        points: &[KnowledgePoint],
        pair: &CandidatePair,
    ) -> Result<Retried<MergeDecision>, RetryExhausted> {
        let request = confirm_merge_request(&points[pair.first], &points[pair.second], pair.score);
        complete_parsed(self.model.as_ref(), &request, &self.config.retry, parse_merge_decision).await
    }

    /// Three or more duplicates: one consolidation call, joined text on failure
    async fn merge_group(
        &self,
        points: &[KnowledgePoint],
        members: &[usize],
        confirmed: &[(CandidatePair, MergeDecision)],
        result: &mut FusionResult,
    ) -> MergedKnowledge {
        let group: Vec<&KnowledgePoint> = members.iter().map(|&i| &points[i]).collect();
        let pair_transitions: Vec<&str> = confirmed
            .iter()
            .filter(|(pair, _)| members.contains(&pair.first) && members.contains(&pair.second))
            .filter_map(|(_, decision)| decision.transition.as_deref())
            .collect();
        let transition = (!pair_transitions.is_empty()).then(|| pair_transitions.join(" "));

        let request = consolidate_request(&group);
        let (title, content) =
            match complete_parsed(self.model.as_ref(), &request, &self.config.retry, parse_consolidation).await {
                Ok(answer) => {
                    result.retries += answer.retries;
                    (
                        answer.value.title.unwrap_or_else(|| group[0].title.clone()),
                        answer.value.content,
                    )
                }
                Err(exhausted) => {
                    result.retries += exhausted.retries;
                    warn!(members = group.len(), error = %exhausted, "Consolidation failed, joining contents");
                    result.warnings.push(format!(
                        "consolidation of '{}' and {} duplicates failed: {}",
                        group[0].title,
                        group.len() - 1,
                        exhausted.last_error
                    ));
                    (group[0].title.clone(), joined_content(&group))
                }
            };

        combine(&group, title, content, transition)
    }

    /// Fuse every chapter of a course independently and bridge the chapters
    pub async fn merge_course(&self, structure: &CourseStructure, points: &[KnowledgePoint]) -> Textbook {
        let by_id: HashMap<&PointId, &KnowledgePoint> = points.iter().map(|p| (&p.id, p)).collect();
        let mut warnings = structure.warnings.clone();
        let mut chapters: Vec<TextbookChapter> = Vec::new();
        let mut renumbered: HashMap<usize, usize> = HashMap::new();

        for chapter in &structure.chapters {
            let mut members = Vec::with_capacity(chapter.point_ids.len());
            for id in &chapter.point_ids {
                match by_id.get(id) {
                    Some(point) => members.push((*point).clone()),
                    None => warnings.push(format!("chapter '{}' references unknown point {}", chapter.title, id)),
                }
            }

            let fused = self.fuse(&members).await;
            warnings.extend(fused.warnings);
            if fused.entries.is_empty() {
                warnings.push(format!("chapter '{}' is empty, dropped", chapter.title));
                continue;
            }

            let order = chapters.len() + 1;
            renumbered.insert(chapter.order, order);
            chapters.push(TextbookChapter {
                title: chapter.title.clone(),
                order,
                transition: None,
                entries: fused.entries,
            });
        }

        if self.config.chapter_transitions {
            for index in 1..chapters.len() {
                let titles: Vec<&str> = chapters[index].entries.iter().map(|e| e.title.as_str()).collect();
                let (text, warning) = self
                    .transitions
                    .write(&chapters[index - 1].title, &chapters[index].title, &titles)
                    .await;
                warnings.extend(warning);
                chapters[index].transition = Some(text);
            }
        }

        let mut prerequisites: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for (chapter, prereqs) in &structure.prerequisites {
            let Some(&chapter) = renumbered.get(chapter) else {
                continue;
            };
            let prereqs: BTreeSet<usize> = prereqs.iter().filter_map(|p| renumbered.get(p).copied()).collect();
            if !prereqs.is_empty() {
                prerequisites.insert(chapter, prereqs);
            }
        }

        let textbook = Textbook {
            name: structure.name.clone(),
            chapters,
            prerequisites,
            warnings,
        };
        info!(
            chapters = textbook.chapters.len(),
            entries = textbook.entry_count(),
            points = points.len(),
            "Course fused"
        );
        textbook
    }
}

fn merge_pair(first: &KnowledgePoint, second: &KnowledgePoint, decision: Option<&MergeDecision>) -> MergedKnowledge {
    let group = [first, second];
    let title = decision
        .and_then(|d| d.title.clone())
        .unwrap_or_else(|| first.title.clone());
    let content = decision
        .and_then(|d| d.content.clone())
        .unwrap_or_else(|| joined_content(&group));
    let transition = decision.and_then(|d| d.transition.clone());
    combine(&group, title, content, transition)
}

fn joined_content(group: &[&KnowledgePoint]) -> String {
    group
        .iter()
        .map(|p| p.content.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Provenance of a merged entry: ids in input order, deduplicated markers
/// and sources, highest importance
fn combine(group: &[&KnowledgePoint], title: String, content: String, transition: Option<String>) -> MergedKnowledge {
    let mut video_markers = Vec::new();
    let mut sources = Vec::new();
    for point in group {
        for marker in &point.video_markers {
            if !video_markers.contains(marker) {
                video_markers.push(marker.clone());
            }
        }
        if !sources.contains(&point.source_document_id) {
            sources.push(point.source_document_id.clone());
        }
    }

    MergedKnowledge {
        title,
        content,
        contributing_point_ids: group.iter().map(|p| p.id.clone()).collect(),
        transition_text: transition,
        video_markers,
        sources,
        importance: group.iter().map(|p| p.importance).max().unwrap_or_default(),
        examples: extract_examples(group),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::error::ModelError;
    use crate::llm::testing::ScriptedModel;
    use crate::llm::{ModelTask, OfflineModel};
    use crate::models::{Chapter, SourceId, TopicLevel, VideoMarker};

    fn engine(model: Arc<ScriptedModel>) -> FusionEngine {
        FusionEngine::new(
            model,
            FusionConfig {
                retry: RetryPolicy::immediate(1),
                ..FusionConfig::default()
            },
        )
    }

    fn calculus() -> Vec<KnowledgePoint> {
        vec![
            KnowledgePoint::new(
                &SourceId::new("lecture1.srt"),
                0,
                "Derivative Definition",
                "The derivative is the limit of the difference quotient as h approaches zero.",
                4,
            )
            .with_markers(vec![VideoMarker {
                start_ms: 60_000,
                end_ms: 75_000,
                description: "definition on the board".to_string(),
            }]),
            KnowledgePoint::new(
                &SourceId::new("lecture2.srt"),
                0,
                "Definition of Derivative",
                "The derivative is defined as the limit of the difference quotient.",
                3,
            ),
            KnowledgePoint::new(
                &SourceId::new("lecture1.srt"),
                1,
                "Limit Concept",
                "Intuitively, a function value gets arbitrarily close to a target as inputs approach a point.",
                3,
            ),
        ]
    }

    #[test]
    fn test_candidates_sorted_and_limited() {
        let source = SourceId::new("a.srt");
        let points = vec![
            KnowledgePoint::new(&source, 0, "Chain Rule", "Differentiate composite functions.", 3),
            KnowledgePoint::new(&source, 1, "The Chain Rule", "Differentiate composite functions.", 3),
            KnowledgePoint::new(&source, 2, "Chain Rule Basics", "Differentiate composite functions.", 3),
        ];
        let pairs = candidate_pairs(&points, 0.6, 10);
        assert_eq!(pairs.len(), 3);
        assert_eq!((pairs[0].first, pairs[0].second), (0, 1));
        assert!(pairs.windows(2).all(|w| w[0].score >= w[1].score));

        assert_eq!(candidate_pairs(&points, 0.6, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_reworded_duplicates_merge() {
        let model = Arc::new(ScriptedModel::offline());
        let entries = engine(model.clone()).merge_duplicates(&calculus()).await;

        assert_eq!(entries.len(), 2);
        let merged = &entries[0];
        assert!(merged.is_merge());
        assert_eq!(merged.contributing_point_ids.len(), 2);
        assert_eq!(merged.importance, 4);
        assert_eq!(merged.sources.len(), 2);
        assert_eq!(merged.video_markers.len(), 1);
        assert!(merged.transition_text.is_some());

        assert_eq!(entries[1].title, "Limit Concept");
        assert!(!entries[1].is_merge());
        assert!(entries[1].transition_text.is_none());
        assert_eq!(model.calls(ModelTask::ConfirmMerge), 1);
    }

    #[tokio::test]
    async fn test_merged_entry_collects_examples() {
        let mut points = calculus();
        points[0].content.push_str("\nFor example, the derivative of x^2 at 3 is 6.");
        points[1].content.push_str("\nFor instance, the slope of x^3 at 1 is 3.");

        let entries = engine(Arc::new(ScriptedModel::offline())).merge_duplicates(&points).await;

        assert_eq!(
            entries[0].examples,
            vec![
                "For example, the derivative of x^2 at 3 is 6.".to_string(),
                "For instance, the slope of x^3 at 1 is 3.".to_string(),
            ]
        );
        assert!(entries[1].examples.is_empty());
    }

    #[tokio::test]
    async fn test_output_partitions_input() {
        let source = SourceId::new("a.srt");
        let mut points = calculus();
        points.push(KnowledgePoint::new(&source, 5, "Chain Rule", "Differentiate composite functions.", 3));
        points.push(KnowledgePoint::new(&source, 6, "The Chain Rule", "Differentiate composite functions.", 3));
        points.push(KnowledgePoint::new(&source, 7, "Taylor Series", "Approximate smooth functions by polynomials.", 2));

        let entries = engine(Arc::new(ScriptedModel::offline())).merge_duplicates(&points).await;

        let ids: Vec<&PointId> = entries.iter().flat_map(|e| &e.contributing_point_ids).collect();
        let unique: HashSet<&PointId> = ids.iter().copied().collect();
        assert_eq!(ids.len(), points.len());
        assert_eq!(unique.len(), points.len());
        assert!(points.iter().all(|p| unique.contains(&p.id)));
    }

    #[tokio::test]
    async fn test_second_pass_merges_nothing() {
        let fusion = engine(Arc::new(ScriptedModel::offline()));
        let first = fusion.merge_duplicates(&calculus()).await;

        let again: Vec<KnowledgePoint> = first.iter().map(MergedKnowledge::to_point).collect();
        let second = fusion.merge_duplicates(&again).await;

        assert_eq!(second.len(), first.len());
        assert!(second.iter().all(|e| !e.is_merge()));
    }

    #[tokio::test]
    async fn test_failed_confirmation_keeps_pair_separate() {
        let offline = OfflineModel::new();
        let model = Arc::new(ScriptedModel::new(move |request| match request.task {
            ModelTask::ConfirmMerge => Err(ModelError::Timeout),
            _ => offline.respond(request),
        }));

        let fusion = engine(model);
        let result = fusion.fuse(&calculus()).await;

        assert_eq!(result.entries.len(), 3);
        assert!(result.entries.iter().all(|e| !e.is_merge()));
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_pair_stays_separate() {
        let model = Arc::new(ScriptedModel::offline());
        model.push(ModelTask::ConfirmMerge, Ok(r#"{"merge": false}"#.to_string()));

        let result = engine(model).fuse(&calculus()).await;
        assert_eq!(result.entries.len(), 3);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_transitive_merge_collapses_group() {
        let source = SourceId::new("a.srt");
        let points = vec![
            KnowledgePoint::new(&source, 0, "Chain Rule", "Differentiate composite functions.", 2),
            KnowledgePoint::new(&source, 1, "Chain Rule Basics", "Differentiate composite functions.", 5),
            KnowledgePoint::new(&source, 2, "The Chain Rule", "Differentiate composite functions.", 3),
        ];

        // "Chain Rule" and "The Chain Rule" are rejected directly but joined via the middle point
        let offline = OfflineModel::new();
        let model = Arc::new(ScriptedModel::new(move |request| {
            if request.task == ModelTask::ConfirmMerge {
                let title = |side: &str| request.payload[side]["title"].as_str().unwrap_or_default().to_string();
                let pair = [title("first"), title("second")];
                if pair.contains(&"Chain Rule".to_string()) && pair.contains(&"The Chain Rule".to_string()) {
                    return Ok(r#"{"merge": false}"#.to_string());
                }
            }
            offline.respond(request)
        }));

        let result = engine(model.clone()).fuse(&points).await;

        assert_eq!(result.entries.len(), 1);
        let merged = &result.entries[0];
        assert_eq!(
            merged.contributing_point_ids,
            points.iter().map(|p| p.id.clone()).collect::<Vec<_>>()
        );
        assert_eq!(merged.importance, 5);
        assert_eq!(model.calls(ModelTask::ConsolidateGroup), 1);
    }

    #[tokio::test]
    async fn test_group_consolidation_failure_joins_contents() {
        let source = SourceId::new("a.srt");
        let points = vec![
            KnowledgePoint::new(&source, 0, "Chain Rule", "First take.", 3),
            KnowledgePoint::new(&source, 1, "The Chain Rule", "First take.", 3),
            KnowledgePoint::new(&source, 2, "Chain Rule", "First take!", 3),
        ];
        let offline = OfflineModel::new();
        let model = Arc::new(ScriptedModel::new(move |request| match request.task {
            ModelTask::ConsolidateGroup => Err(ModelError::Malformed("garbage".to_string())),
            _ => offline.respond(request),
        }));

        let result = engine(model).fuse(&points).await;

        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].content, "First take.\n\nFirst take.\n\nFirst take!");
        assert_eq!(result.entries[0].title, "Chain Rule");
        assert!(result.entries[0].transition_text.is_some());
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_course_bridges_and_renumbers() {
        let points = calculus();
        let ids: Vec<PointId> = points.iter().map(|p| p.id.clone()).collect();
        let structure = CourseStructure {
            name: "Calculus".to_string(),
            chapters: vec![
                Chapter {
                    title: "Limits".to_string(),
                    order: 1,
                    level: TopicLevel::Foundational,
                    point_ids: vec![ids[2].clone()],
                },
                Chapter {
                    title: "Ghost".to_string(),
                    order: 2,
                    level: TopicLevel::Core,
                    point_ids: vec![PointId("missing#0".to_string())],
                },
                Chapter {
                    title: "Derivatives".to_string(),
                    order: 3,
                    level: TopicLevel::Core,
                    point_ids: vec![ids[0].clone(), ids[1].clone()],
                },
            ],
            prerequisites: BTreeMap::from([(3, BTreeSet::from([1, 2]))]),
            warnings: vec!["from clustering".to_string()],
            fallback: false,
        };

        let textbook = engine(Arc::new(ScriptedModel::offline()))
            .merge_course(&structure, &points)
            .await;

        assert_eq!(textbook.name, "Calculus");
        assert_eq!(textbook.chapters.len(), 2);
        assert_eq!(textbook.entry_count(), 2);
        assert!(textbook.chapters[0].transition.is_none());
        assert_eq!(
            textbook.chapters[1].transition.as_deref(),
            Some("Having covered Limits, we now turn to Derivatives.")
        );
        assert_eq!(textbook.chapters[1].order, 2);
        assert_eq!(textbook.prerequisites, BTreeMap::from([(2, BTreeSet::from([1]))]));
        assert_eq!(textbook.warnings[0], "from clustering");
        assert!(textbook.warnings.iter().any(|w| w.contains("Ghost")));
    }
}
