use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::{
    complete_parsed, merge_topics_request, parse_topic_groups, parse_topics, topics_request, LanguageModel,
    RetryPolicy,
};
use crate::models::{KnowledgePoint, TopicCluster, TopicLevel};

/// Label of the cluster that collects points the model did not place
pub const MISCELLANEOUS: &str = "Miscellaneous";

/// Result of topic identification
#[derive(Debug)]
pub struct TopicAssignment {
    /// Clusters in first-seen order; every point is in exactly one
    pub clusters: Vec<TopicCluster>,
    pub warnings: Vec<String>,
    pub retries: u32,
}

/// Phase 1: group points into topic clusters, one model call per batch
///
/// Fails only when a call failed and no batch produced a topic.
pub async fn identify_topics(
    model: &dyn LanguageModel,
    points: &[KnowledgePoint],
    batch_size: usize,
    policy: &RetryPolicy,
) -> Result<TopicAssignment, PipelineError> {
    let batch_size = batch_size.max(1);
    let mut clusters: Vec<TopicCluster> = Vec::new();
    let mut by_label: HashMap<String, usize> = HashMap::new();
    let mut assigned: Vec<bool> = vec![false; points.len()];
    let mut warnings = Vec::new();
    let mut retries = 0;
    let mut last_failure = None;

    for (batch_index, batch) in points.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        let refs: Vec<&KnowledgePoint> = batch.iter().collect();
        let request = topics_request(&refs);

        let proposals = match complete_parsed(model, &request, policy, parse_topics).await {
            Ok(answer) => {
                retries += answer.retries;
                answer.value
            }
            Err(exhausted) => {
                warn!(batch = batch_index, error = %exhausted, "Topic identification failed for batch");
                retries += exhausted.retries;
                warnings.push(format!(
                    "topic identification failed for points {}..{}: {}",
                    offset,
                    offset + batch.len(),
                    exhausted.last_error
                ));
                last_failure = Some(exhausted);
                continue;
            }
        };

        for proposal in proposals {
            let key = normalize_label(&proposal.label);
            for local in proposal.point_indices {
                let Some(global) = usize::try_from(local)
                    .ok()
                    .filter(|&l| l < batch.len())
                    .map(|l| offset + l)
                else {
                    warnings.push(format!("topic '{}' referenced unknown point {}", proposal.label, local));
                    continue;
                };
                if assigned[global] {
                    warnings.push(format!(
                        "point '{}' assigned to more than one topic, keeping the first",
                        points[global].title
                    ));
                    continue;
                }
                assigned[global] = true;

                let slot = *by_label.entry(key.clone()).or_insert_with(|| {
                    clusters.push(TopicCluster {
                        topic_label: proposal.label.clone(),
                        level: proposal.level,
                        member_indices: BTreeSet::new(),
                    });
                    clusters.len() - 1
                });
                clusters[slot].member_indices.insert(global);
            }
        }
    }

    if clusters.is_empty()
        && let Some(exhausted) = last_failure
    {
        return Err(exhausted.into());
    }

    let unplaced: BTreeSet<usize> = (0..points.len()).filter(|&i| !assigned[i]).collect();
    if !unplaced.is_empty() {
        warnings.push(format!("{} points not placed in a topic, assigned to {}", unplaced.len(), MISCELLANEOUS));
        let key = normalize_label(MISCELLANEOUS);
        match by_label.get(&key) {
            Some(&slot) => clusters[slot].member_indices.extend(unplaced),
            None => clusters.push(TopicCluster {
                topic_label: MISCELLANEOUS.to_string(),
                level: TopicLevel::Applied,
                member_indices: unplaced,
            }),
        }
    }

    debug!(clusters = clusters.len(), warnings = warnings.len(), "Topics identified");
    Ok(TopicAssignment {
        clusters,
        warnings,
        retries,
    })
}

/// Combine clusters the model judges to cover the same subject
///
/// Batches see disjoint points, so one subject can come back under several
/// labels. Each accepted group becomes one cluster at the position of its
/// first member with the most foundational level among them. A failed call
/// leaves the clusters unchanged; membership stays a partition either way.
pub async fn merge_similar_topics(
    model: &dyn LanguageModel,
    assignment: TopicAssignment,
    points: &[KnowledgePoint],
    policy: &RetryPolicy,
) -> TopicAssignment {
    let TopicAssignment {
        clusters,
        mut warnings,
        mut retries,
    } = assignment;

    let request = merge_topics_request(&clusters, points);
    let groups = match complete_parsed(model, &request, policy, parse_topic_groups).await {
        Ok(answer) => {
            retries += answer.retries;
            answer.value
        }
        Err(exhausted) => {
            warn!(error = %exhausted, "Topic merge failed, keeping topics as identified");
            retries += exhausted.retries;
            warnings.push(format!("topic merge failed: {}", exhausted.last_error));
            return TopicAssignment {
                clusters,
                warnings,
                retries,
            };
        }
    };

    // cluster id -> id of the cluster it is folded into
    let mut target: Vec<usize> = (0..clusters.len()).collect();
    let mut labels: HashMap<usize, String> = HashMap::new();
    let mut grouped = vec![false; clusters.len()];

    for group in groups {
        let mut members: Vec<usize> = Vec::new();
        for id in group.topic_ids {
            let Some(id) = usize::try_from(id).ok().filter(|&c| c < clusters.len()) else {
                warnings.push(format!("topic merge referenced unknown topic {}", id));
                continue;
            };
            if grouped[id] {
                if !members.contains(&id) {
                    warnings.push(format!(
                        "topic '{}' proposed for more than one merge, keeping the first",
                        clusters[id].topic_label
                    ));
                }
                continue;
            }
            members.push(id);
        }
        if members.len() < 2 {
            continue;
        }
        let head = members.iter().copied().min().unwrap_or(members[0]);
        for &m in &members {
            grouped[m] = true;
            target[m] = head;
        }
        if let Some(label) = group.label {
            labels.insert(head, label);
        }
    }

    let mut merged: Vec<TopicCluster> = Vec::with_capacity(clusters.len());
    let mut slot_of: HashMap<usize, usize> = HashMap::new();
    for (id, cluster) in clusters.into_iter().enumerate() {
        let head = target[id];
        match slot_of.get(&head) {
            Some(&slot) => {
                let into = &mut merged[slot];
                into.level = into.level.min(cluster.level);
                into.member_indices.extend(cluster.member_indices);
            }
            None => {
                slot_of.insert(head, merged.len());
                let mut cluster = cluster;
                if let Some(label) = labels.remove(&head) {
                    cluster.topic_label = label;
                }
                merged.push(cluster);
            }
        }
    }

    debug!(topics = merged.len(), "Similar topics merged");
    TopicAssignment {
        clusters: merged,
        warnings,
        retries,
    }
}

fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
