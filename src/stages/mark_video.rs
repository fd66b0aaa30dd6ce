use std::collections::HashSet;

use tracing::{debug, warn};

use crate::llm::{complete_parsed, mark_video_request, parse_marker_choices, LanguageModel, RetryPolicy};
use crate::models::{KnowledgePoint, SubtitleEntry, VideoMarker};

/// Configuration for the mark-video stage
#[derive(Debug, Clone)]
pub struct MarkVideoConfig {
    /// Phrases that signal the lecturer is pointing at something on screen
    pub cue_phrases: Vec<String>,
    /// Shared keywords needed to tie a cue to a point without a model call
    pub min_keyword_overlap: usize,
    pub max_markers_per_point: usize,
    /// Cue entries offered to the model per call
    pub max_cues_per_call: usize,
}

impl Default for MarkVideoConfig {
    fn default() -> Self {
        let cues = [
            "see this",
            "look at",
            "as you can see",
            "you can see",
            "this graph",
            "this diagram",
            "this figure",
            "this chart",
            "this picture",
            "this image",
            "on the screen",
            "on the slide",
            "on the board",
            "shown here",
            "看这个",
            "看这里",
            "大家看",
            "大家可以看到",
            "如图",
            "这张图",
            "这个图",
            "屏幕上",
            "黑板上",
        ];
        Self {
            cue_phrases: cues.iter().map(|c| c.to_string()).collect(),
            min_keyword_overlap: 2,
            max_markers_per_point: 3,
            max_cues_per_call: 40,
        }
    }
}

/// Result of the mark-video stage
#[derive(Debug, Default)]
pub struct MarkVideoResult {
    pub cue_entries: usize,
    /// Points that received at least one marker
    pub marked: usize,
    /// Points marked by keyword rule alone
    pub rule_matches: usize,
    pub model_calls: usize,
    pub retries: u32,
    pub warnings: Vec<String>,
}

/// Execute the mark-video stage
///
/// Points without a match keep an empty marker list; a failed call only
/// produces a warning.
pub async fn execute_mark_video(
    model: &dyn LanguageModel,
    points: Vec<KnowledgePoint>,
    entries: &[SubtitleEntry],
    config: &MarkVideoConfig,
    policy: &RetryPolicy,
) -> (Vec<KnowledgePoint>, MarkVideoResult) {
    let cues = cue_entries(entries, &config.cue_phrases);
    let mut result = MarkVideoResult {
        cue_entries: cues.len(),
        ..Default::default()
    };

    if cues.is_empty() {
        debug!("No visual cues in document, skipping marking");
        return (points, result);
    }

    let offered: Vec<(usize, &SubtitleEntry)> = cues
        .iter()
        .take(config.max_cues_per_call)
        .map(|&(i, e)| (i, e))
        .collect();

    let mut marked_points = Vec::with_capacity(points.len());
    for point in points {
        let mut markers = rule_markers(&point, &cues, config);

        if markers.is_empty() {
            let request = mark_video_request(&point, &offered);
            result.model_calls += 1;
            match complete_parsed(model, &request, policy, parse_marker_choices).await {
                Ok(answer) => {
                    result.retries += answer.retries;
                    for choice in answer.value {
                        let Some((_, entry)) = usize::try_from(choice.cue)
                            .ok()
                            .and_then(|c| offered.iter().find(|(index, _)| *index == c))
                        else {
                            debug!(point = %point.id, cue = choice.cue, "Ignoring unknown cue index");
                            continue;
                        };
                        markers.push(VideoMarker {
                            start_ms: entry.start_ms,
                            end_ms: entry.end_ms,
                            description: choice.description.unwrap_or_else(|| entry.text.clone()),
                        });
                    }
                }
                Err(exhausted) => {
                    warn!(point = %point.id, error = %exhausted, "Video marking failed, leaving point unmarked");
                    result.retries += exhausted.retries;
                    result.warnings.push(format!("video marking for '{}': {}", point.title, exhausted.last_error));
                }
            }
        } else {
            result.rule_matches += 1;
        }

        markers.sort_by_key(|m| (m.start_ms, m.end_ms));
        markers.dedup_by(|a, b| a.start_ms == b.start_ms && a.end_ms == b.end_ms);
        markers.truncate(config.max_markers_per_point);
        if !markers.is_empty() {
            result.marked += 1;
        }
        marked_points.push(point.with_markers(markers));
    }

    (marked_points, result)
}

/// Timed entries containing a visual-reference phrase, with their positions
pub fn cue_entries<'a>(entries: &'a [SubtitleEntry], phrases: &[String]) -> Vec<(usize, &'a SubtitleEntry)> {
    let phrases: Vec<String> = phrases.iter().map(|p| p.to_lowercase()).collect();
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_timed())
        .filter(|(_, e)| {
            let text = e.text.to_lowercase();
            phrases.iter().any(|p| text.contains(p.as_str()))
        })
        .collect()
}

fn rule_markers(point: &KnowledgePoint, cues: &[(usize, &SubtitleEntry)], config: &MarkVideoConfig) -> Vec<VideoMarker> {
    let point_words = keywords(&format!("{} {}", point.title, point.content));
    let title = point.title.trim().to_lowercase();

    cues.iter()
        .filter(|(_, entry)| {
            let text = entry.text.to_lowercase();
            let overlap = keywords(&text).intersection(&point_words).count();
            overlap >= config.min_keyword_overlap || (title.chars().count() >= 2 && text.contains(&title))
        })
        .map(|(_, entry)| VideoMarker {
            start_ms: entry.start_ms,
            end_ms: entry.end_ms,
            description: entry.text.clone(),
        })
        .collect()
}

const STOP_WORDS: &[&str] = &[
    "this", "that", "these", "those", "with", "from", "here", "there", "what", "when", "which", "have",
    "will", "look", "see", "they", "them", "then", "than", "into", "about", "your", "just",
];

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::llm::testing::ScriptedModel;
    use crate::llm::ModelTask;
    use crate::models::SourceId;

    fn point(title: &str, content: &str) -> KnowledgePoint {
        KnowledgePoint::new(&SourceId::new("a.srt"), 0, title, content, 3)
    }

    #[tokio::test]
    async fn test_no_cues_means_no_calls() {
        let model = ScriptedModel::offline();
        let entries = vec![SubtitleEntry::new(0, 2_000, "Limits are important.")];

        let (points, result) = execute_mark_video(
            &model,
            vec![point("Limits", "Limits are important.")],
            &entries,
            &MarkVideoConfig::default(),
            &RetryPolicy::immediate(1),
        )
        .await;

        assert!(points[0].video_markers.is_empty());
        assert_eq!(model.total_calls(), 0);
        assert_eq!(result.cue_entries, 0);
    }

    #[tokio::test]
    async fn test_keyword_rule_marks_without_model() {
        let model = ScriptedModel::offline();
        let entries = vec![
            SubtitleEntry::new(0, 2_000, "Intro."),
            SubtitleEntry::new(65_000, 70_000, "Look at this graph of the tangent slope."),
        ];

        let (points, result) = execute_mark_video(
            &model,
            vec![point("Tangent slope", "The derivative is the slope of the tangent line.")],
            &entries,
            &MarkVideoConfig::default(),
            &RetryPolicy::immediate(1),
        )
        .await;

        assert_eq!(points[0].video_markers.len(), 1);
        assert_eq!(points[0].video_markers[0].time_label(), "01:05-01:10");
        assert_eq!(result.rule_matches, 1);
        assert_eq!(model.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_model_choice_and_invalid_index() {
        let model = ScriptedModel::offline();
        model.push(
            ModelTask::MarkVideo,
            Ok(r#"{"markers": [{"cue": 1, "description": "area under curve"}, {"cue": 7}]}"#.to_string()),
        );
        let entries = vec![
            SubtitleEntry::new(0, 2_000, "Intro."),
            SubtitleEntry::new(3_000, 6_000, "As you can see on the slide."),
        ];

        let (points, _) = execute_mark_video(
            &model,
            vec![point("Integral", "Accumulated quantity.")],
            &entries,
            &MarkVideoConfig::default(),
            &RetryPolicy::immediate(1),
        )
        .await;

        assert_eq!(points[0].video_markers.len(), 1);
        assert_eq!(points[0].video_markers[0].description, "area under curve");
    }

    #[tokio::test]
    async fn test_failed_call_is_warning() {
        let model = ScriptedModel::new(|_| Err(ModelError::Timeout));
        let entries = vec![SubtitleEntry::new(3_000, 6_000, "See this figure.")];

        let (points, result) = execute_mark_video(
            &model,
            vec![point("Integral", "Accumulated quantity.")],
            &entries,
            &MarkVideoConfig::default(),
            &RetryPolicy::immediate(1),
        )
        .await;

        assert!(points[0].video_markers.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }
}
