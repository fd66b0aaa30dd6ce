//! Cross-document clustering into an ordered course structure
//!
//! Two model phases: topic identification (batched) and structure
//! construction. Either phase failing yields the single-chapter fallback.

pub mod graph;
pub mod topics;

pub use graph::PrerequisiteGraph;
pub use topics::{identify_topics, merge_similar_topics, TopicAssignment, MISCELLANEOUS};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::llm::{complete_parsed, parse_structure, structure_request, LanguageModel, RetryPolicy, StructureProposal};
use crate::models::{Chapter, CourseStructure, KnowledgePoint, TopicCluster, TopicLevel};

/// Configuration for the clusterer
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Points sent per topic-identification call
    pub max_points_per_batch: usize,
    /// Ask the model to merge similar topics when more than this many were found
    pub merge_topics_above: usize,
    /// Course name when the model proposes none
    pub default_course_name: String,
    /// Chapter title of the single-chapter fallback
    pub fallback_chapter_title: String,
    pub retry: RetryPolicy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_points_per_batch: 50,
            merge_topics_above: 5,
            default_course_name: "Course".to_string(),
            fallback_chapter_title: "Course Content".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// A chapter under construction, indexed by proposed position
#[derive(Debug)]
struct ChapterDraft {
    title: String,
    clusters: Vec<usize>,
    level: TopicLevel,
    earliest: usize,
}

pub struct Clusterer {
    model: Arc<dyn LanguageModel>,
    config: ClusterConfig,
}

impl Clusterer {
    pub fn new(model: Arc<dyn LanguageModel>, config: ClusterConfig) -> Self {
        Self { model, config }
    }

    /// Arrange points into an ordered, prerequisite-respecting structure
    ///
    /// Never fails: anything unusable collapses to one chapter holding all
    /// points in input order.
    pub async fn cluster(&self, points: &[KnowledgePoint]) -> CourseStructure {
        if points.is_empty() {
            return CourseStructure {
                name: self.config.default_course_name.clone(),
                chapters: Vec::new(),
                prerequisites: BTreeMap::new(),
                warnings: Vec::new(),
                fallback: false,
            };
        }

        info!(points = points.len(), "Clustering knowledge points");
        match self.try_cluster(points).await {
            Ok(structure) if structure.partitions(points) && structure.is_topologically_ordered() => {
                info!(
                    chapters = structure.chapters.len(),
                    warnings = structure.warnings.len(),
                    "Course structure built"
                );
                structure
            }
            Ok(structure) => {
                let mut warnings = structure.warnings;
                warnings.push("proposed structure did not cover every point exactly once".to_string());
                self.fallback(points, warnings)
            }
            Err((e, mut warnings)) => {
                warn!(error = %e, "Clustering failed, using single-chapter fallback");
                warnings.push(format!("clustering failed: {}", e));
                self.fallback(points, warnings)
            }
        }
    }

    async fn try_cluster(&self, points: &[KnowledgePoint]) -> Result<CourseStructure, (PipelineError, Vec<String>)> {
        let model = self.model.as_ref();
        let assignment = identify_topics(model, points, self.config.max_points_per_batch, &self.config.retry)
            .await
            .map_err(|e| (e, Vec::new()))?;
        let assignment = if assignment.clusters.len() > self.config.merge_topics_above {
            merge_similar_topics(model, assignment, points, &self.config.retry).await
        } else {
            assignment
        };
        let mut warnings = assignment.warnings;
        let clusters = assignment.clusters;

        let request = structure_request(&clusters, points);
        let proposal = match complete_parsed(model, &request, &self.config.retry, parse_structure).await {
            Ok(answer) => answer.value,
            Err(exhausted) => return Err((exhausted.into(), warnings)),
        };

        let structure = self.build(points, &clusters, proposal, &mut warnings);
        Ok(CourseStructure { warnings, ..structure })
    }

    /// Phase 2 post-processing: place clusters, repair the graph, order chapters
    fn build(
        &self,
        points: &[KnowledgePoint],
        clusters: &[TopicCluster],
        proposal: StructureProposal,
        warnings: &mut Vec<String>,
    ) -> CourseStructure {
        let mut placed = vec![false; clusters.len()];
        let mut drafts: Vec<ChapterDraft> = Vec::new();
        // proposed chapter position -> draft index
        let mut draft_of: Vec<Option<usize>> = Vec::with_capacity(proposal.chapters.len());

        for chapter in &proposal.chapters {
            let mut members = Vec::new();
            for &id in &chapter.cluster_ids {
                let Some(cluster) = usize::try_from(id).ok().filter(|&c| c < clusters.len()) else {
                    warnings.push(format!("chapter referenced unknown topic {}", id));
                    continue;
                };
                if placed[cluster] {
                    warnings.push(format!(
                        "topic '{}' placed in more than one chapter, keeping the first",
                        clusters[cluster].topic_label
                    ));
                    continue;
                }
                placed[cluster] = true;
                members.push(cluster);
            }

            if members.is_empty() {
                draft_of.push(None);
                continue;
            }
            let title = chapter
                .title
                .clone()
                .unwrap_or_else(|| clusters[members[0]].topic_label.clone());
            draft_of.push(Some(drafts.len()));
            drafts.push(draft(title, members, clusters));
        }

        for (cluster, _) in placed.iter().enumerate().filter(|(_, p)| !**p) {
            warnings.push(format!(
                "topic '{}' not placed in any chapter, giving it its own",
                clusters[cluster].topic_label
            ));
            drafts.push(draft(clusters[cluster].topic_label.clone(), vec![cluster], clusters));
        }

        let mut graph = PrerequisiteGraph::new(drafts.len());
        for &(prerequisite, dependent) in &proposal.prerequisites {
            let lookup = |p: i64| {
                usize::try_from(p)
                    .ok()
                    .and_then(|p| draft_of.get(p).copied().flatten())
            };
            match (lookup(prerequisite), lookup(dependent)) {
                (Some(from), Some(to)) if from != to => {
                    graph.add_edge(from, to);
                }
                _ => warnings.push(format!(
                    "ignored prerequisite {} -> {} between unknown or identical chapters",
                    prerequisite, dependent
                )),
            }
        }

        for (from, to) in graph.break_cycles() {
            let message = format!(
                "prerequisite cycle broken by dropping '{}' before '{}'",
                drafts[from].title, drafts[to].title
            );
            warn!("{}", message);
            warnings.push(message);
        }

        let order = graph
            .topological_order(|n| (drafts[n].level, drafts[n].earliest))
            .unwrap_or_else(|| (0..drafts.len()).collect());

        // draft index -> 1-based chapter order
        let mut position = vec![0; drafts.len()];
        for (i, &d) in order.iter().enumerate() {
            position[d] = i + 1;
        }

        let chapters = order
            .iter()
            .map(|&d| {
                let members: BTreeSet<usize> = drafts[d]
                    .clusters
                    .iter()
                    .flat_map(|&c| clusters[c].member_indices.iter().copied())
                    .collect();
                Chapter {
                    title: drafts[d].title.clone(),
                    order: position[d],
                    level: drafts[d].level,
                    point_ids: members.into_iter().map(|i| points[i].id.clone()).collect(),
                }
            })
            .collect();

        let mut prerequisites: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for (from, to) in graph.edges() {
            prerequisites.entry(position[to]).or_default().insert(position[from]);
        }

        CourseStructure {
            name: proposal
                .course_name
                .unwrap_or_else(|| self.config.default_course_name.clone()),
            chapters,
            prerequisites,
            warnings: Vec::new(),
            fallback: false,
        }
    }

    fn fallback(&self, points: &[KnowledgePoint], warnings: Vec<String>) -> CourseStructure {
        CourseStructure {
            name: self.config.default_course_name.clone(),
            chapters: vec![Chapter {
                title: self.config.fallback_chapter_title.clone(),
                order: 1,
                level: TopicLevel::Core,
                point_ids: points.iter().map(|p| p.id.clone()).collect(),
            }],
            prerequisites: BTreeMap::new(),
            warnings,
            fallback: true,
        }
    }
}

fn draft(title: String, members: Vec<usize>, clusters: &[TopicCluster]) -> ChapterDraft {
    let level = members
        .iter()
        .map(|&c| clusters[c].level)
        .min()
        .unwrap_or(TopicLevel::Core);
    let earliest = members
        .iter()
        .filter_map(|&c| clusters[c].earliest_point())
        .min()
        .unwrap_or(usize::MAX);
    ChapterDraft {
        title,
        clusters: members,
        level,
        earliest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::llm::testing::ScriptedModel;
    use crate::llm::ModelTask;
    use crate::models::SourceId;

    fn points(titles: &[&str]) -> Vec<KnowledgePoint> {
        let source = SourceId::new("a.srt");
        titles
            .iter()
            .enumerate()
            .map(|(i, t)| KnowledgePoint::new(&source, i, *t, "content", 3))
            .collect()
    }

    fn clusterer(model: ScriptedModel) -> Clusterer {
        Clusterer::new(
            Arc::new(model),
            ClusterConfig {
                retry: RetryPolicy::immediate(1),
                ..Default::default()
            },
        )
    }

    fn chapter_titles(structure: &CourseStructure) -> Vec<&str> {
        structure.chapters.iter().map(|c| c.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_levels_order_chapters() {
        let model = ScriptedModel::offline();
        model.push(
            ModelTask::IdentifyTopics,
            Ok(r#"{"topics": [
                {"label": "Applications", "level": "applied", "point_indices": [0]},
                {"label": "Limits", "level": "foundational", "point_indices": [1]},
                {"label": "Derivatives", "level": "core", "point_indices": [2]}
            ]}"#
            .to_string()),
        );
        model.push(
            ModelTask::BuildStructure,
            Ok(r#"{"course_name": "Calculus", "chapters": [
                {"title": "Applications", "clusters": [0]},
                {"title": "Limits", "clusters": [1]},
                {"title": "Derivatives", "clusters": [2]}
            ]}"#
            .to_string()),
        );

        let pts = points(&["Optimization", "Limit definition", "Derivative rules"]);
        let structure = clusterer(model).cluster(&pts).await;

        assert_eq!(structure.name, "Calculus");
        assert_eq!(chapter_titles(&structure), vec!["Limits", "Derivatives", "Applications"]);
        assert_eq!(structure.chapters.iter().map(|c| c.order).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(structure.partitions(&pts));
        assert!(!structure.fallback);
    }

    #[tokio::test]
    async fn test_prerequisite_cycle_broken_with_warning() {
        let model = ScriptedModel::offline();
        model.push(
            ModelTask::IdentifyTopics,
            Ok(r#"{"topics": [
                {"label": "A", "point_indices": [0]},
                {"label": "B", "point_indices": [1]},
                {"label": "C", "point_indices": [2]}
            ]}"#
            .to_string()),
        );
        model.push(
            ModelTask::BuildStructure,
            Ok(r#"{"chapters": [
                {"title": "A", "clusters": [0]},
                {"title": "B", "clusters": [1]},
                {"title": "C", "clusters": [2]}
            ], "prerequisites": [
                {"chapter": 1, "requires": [0]},
                {"chapter": 2, "requires": [1]},
                {"chapter": 0, "requires": [2]}
            ]}"#
            .to_string()),
        );

        let pts = points(&["a", "b", "c"]);
        let structure = clusterer(model).cluster(&pts).await;

        assert!(structure.is_topologically_ordered());
        assert_eq!(chapter_titles(&structure), vec!["A", "B", "C"]);
        assert!(structure.warnings.iter().any(|w| w.contains("cycle")));
        assert_eq!(structure.prerequisites.get(&2), Some(&BTreeSet::from([1])));
    }

    #[tokio::test]
    async fn test_prerequisite_overrides_level() {
        let model = ScriptedModel::offline();
        model.push(
            ModelTask::IdentifyTopics,
            Ok(r#"{"topics": [
                {"label": "Basics", "level": "foundational", "point_indices": [0]},
                {"label": "Tools", "level": "applied", "point_indices": [1]}
            ]}"#
            .to_string()),
        );
        model.push(
            ModelTask::BuildStructure,
            Ok(r#"{"chapters": [{"clusters": [0]}, {"clusters": [1]}], "prerequisites": {"0": [1]}}"#.to_string()),
        );

        let pts = points(&["x", "y"]);
        let structure = clusterer(model).cluster(&pts).await;

        assert_eq!(chapter_titles(&structure), vec!["Tools", "Basics"]);
        assert!(structure.is_topologically_ordered());
    }

    #[tokio::test]
    async fn test_unplaced_cluster_gets_own_chapter() {
        let model = ScriptedModel::offline();
        model.push(
            ModelTask::IdentifyTopics,
            Ok(r#"{"topics": [
                {"label": "A", "point_indices": [0]},
                {"label": "B", "point_indices": [1]}
            ]}"#
            .to_string()),
        );
        model.push(
            ModelTask::BuildStructure,
            Ok(r#"{"chapters": [{"title": "A", "clusters": [0, 0, 5]}]}"#.to_string()),
        );

        let pts = points(&["a", "b"]);
        let structure = clusterer(model).cluster(&pts).await;

        assert_eq!(structure.chapters.len(), 2);
        assert!(structure.partitions(&pts));
        assert_eq!(structure.warnings.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_single_chapter() {
        let model = ScriptedModel::new(|_| Err(ModelError::Timeout));
        let pts = points(&["a", "b", "c"]);
        let structure = clusterer(model).cluster(&pts).await;

        assert!(structure.fallback);
        assert_eq!(structure.chapters.len(), 1);
        let ids: Vec<_> = pts.iter().map(|p| p.id.clone()).collect();
        assert_eq!(structure.chapters[0].point_ids, ids);
    }

    #[tokio::test]
    async fn test_structure_phase_failure_falls_back() {
        let model = ScriptedModel::offline();
        model.push(ModelTask::BuildStructure, Ok("not json".to_string()));
        model.push(ModelTask::BuildStructure, Ok(r#"{"chapters": []}"#.to_string()));

        let pts = points(&["a"]);
        let structure = clusterer(model).cluster(&pts).await;
        assert!(structure.fallback);
        assert!(!structure.chapters.is_empty());
    }

    #[tokio::test]
    async fn test_many_topics_trigger_merge() {
        let model = Arc::new(ScriptedModel::offline());
        model.push(
            ModelTask::IdentifyTopics,
            Ok(r#"{"topics": [
                {"label": "Limits", "point_indices": [0]},
                {"label": "Derivatives", "point_indices": [1]},
                {"label": "Integrals", "point_indices": [2]},
                {"label": "Series", "point_indices": [3]},
                {"label": "Vectors", "point_indices": [4]},
                {"label": "Limit laws", "point_indices": [5]}
            ]}"#
            .to_string()),
        );
        model.push(
            ModelTask::MergeTopics,
            Ok(r#"{"groups": [{"label": "Limits", "topic_ids": [0, 5]}]}"#.to_string()),
        );
        let clusterer = Clusterer::new(
            model.clone(),
            ClusterConfig {
                retry: RetryPolicy::immediate(1),
                ..Default::default()
            },
        );

        let pts = points(&["a", "b", "c", "d", "e", "f"]);
        let structure = clusterer.cluster(&pts).await;

        assert_eq!(model.calls(ModelTask::MergeTopics), 1);
        assert_eq!(structure.chapters.len(), 5);
        assert_eq!(structure.chapters[0].title, "Limits");
        assert_eq!(structure.chapters[0].point_ids, vec![pts[0].id.clone(), pts[5].id.clone()]);
        assert!(structure.partitions(&pts));
    }

    #[tokio::test]
    async fn test_few_topics_skip_merge() {
        let model = Arc::new(ScriptedModel::offline());
        let clusterer = Clusterer::new(model.clone(), ClusterConfig::default());
        clusterer.cluster(&points(&["a", "b"])).await;
        assert_eq!(model.calls(ModelTask::MergeTopics), 0);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let model = Arc::new(ScriptedModel::offline());
        let clusterer = Clusterer::new(model.clone(), ClusterConfig::default());
        let structure = clusterer.cluster(&[]).await;
        assert!(structure.chapters.is_empty());
        assert_eq!(model.total_calls(), 0);
    }
}
