//! Deterministic placeholder model for offline runs and tests
//!
//! Answers are computed from the request payload alone, so a run with this
//! model is reproducible and never touches the network. It is only selected
//! explicitly (`--offline`), never as a silent fallback.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::client::{LanguageModel, ModelRequest, ModelTask};
use crate::error::ModelError;

/// Words used for an offline point title
const TITLE_WORDS: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct OfflineModel;

impl OfflineModel {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous answer for a request
    pub fn respond(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let payload = &request.payload;
        let text = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or_default();

        let answer = match request.task {
            ModelTask::ReduceNoise => return Ok(text("text").to_string()),
            ModelTask::ExtractPoints => extract_points(text("text")),
            ModelTask::MarkVideo => json!({ "markers": [] }),
            ModelTask::IdentifyTopics => {
                let count = payload
                    .get("points")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                json!({
                    "topics": [{
                        "label": "Course Content",
                        "level": "core",
                        "point_indices": (0..count).collect::<Vec<_>>(),
                    }]
                })
            }
            ModelTask::MergeTopics => json!({ "groups": [] }),
            ModelTask::BuildStructure => {
                let clusters = payload
                    .get("clusters")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let chapters: Vec<Value> = clusters
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        json!({
                            "title": c.get("label").and_then(Value::as_str).unwrap_or("Chapter"),
                            "clusters": [c.get("id").cloned().unwrap_or(json!(i))],
                        })
                    })
                    .collect();
                json!({ "course_name": "Course", "chapters": chapters, "prerequisites": [] })
            }
            ModelTask::ConfirmMerge => {
                let field = |side: &str, key: &str| {
                    payload
                        .get(side)
                        .and_then(|v| v.get(key))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                json!({
                    "merge": true,
                    "title": field("first", "title"),
                    "content": format!("{}\n\n{}", field("first", "content"), field("second", "content")),
                    "transition": format!("The following also covers \"{}\".", field("second", "title")),
                })
            }
            ModelTask::ConsolidateGroup => {
                let versions = payload
                    .get("versions")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let title = versions
                    .first()
                    .and_then(|v| v.get("title"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let content = versions
                    .iter()
                    .filter_map(|v| v.get("content").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                json!({ "title": title, "content": content })
            }
            ModelTask::WriteTransition => {
                return Ok(format!(
                    "Having covered {}, we now turn to {}.",
                    text("previous"),
                    text("next")
                ));
            }
        };

        serde_json::to_string(&answer).map_err(|e| ModelError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OfflineModel {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.respond(request)
    }

    fn name(&self) -> &str {
        "offline"
    }
}

/// One point per paragraph, titled by its opening words
fn extract_points(text: &str) -> Value {
    let points: Vec<Value> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|paragraph| {
            let first_sentence = paragraph
                .split(['.', '?', '!', '。', '？', '！'])
                .next()
                .unwrap_or(paragraph);
            let title = first_sentence
                .split_whitespace()
                .take(TITLE_WORDS)
                .collect::<Vec<_>>()
                .join(" ");
            let title = if title.is_empty() {
                first_sentence.chars().take(20).collect()
            } else {
                title
            };
            json!({ "title": title, "content": paragraph, "importance": 3 })
        })
        .collect();
    json!({ "points": points })
}
