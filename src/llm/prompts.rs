//! Prompt and request builders for every model task
//!
//! Each builder renders the prompt from a JSON payload and keeps the payload
//! on the request, so offline and scripted models can answer from it.

use serde_json::{json, Value};

use super::client::{ModelRequest, ModelTask, ResponseShape};
use crate::models::{KnowledgePoint, SubtitleEntry, TopicCluster};

/// Characters of point content shown when only a preview is needed
pub const SNIPPET_CHARS: usize = 200;

pub const REDUCE_SYSTEM: &str = r#"You edit lecture transcripts into study material.
Remove greetings, small talk, course logistics and off-topic asides.
Keep every definition, formula, example, argument and technical term exactly.
Do not summarize and do not add content. Return only the edited text."#;

pub const EXTRACT_SYSTEM: &str = r#"You extract knowledge points from lecture text.
A knowledge point is one self-contained concept with a short title and a
complete explanation written as textbook prose.
Rules:
- title and content must both be non-empty
- importance is an integer from 1 (peripheral) to 5 (essential)
- keep the order in which concepts appear in the lecture
Answer with JSON only."#;

pub const MARK_VIDEO_SYSTEM: &str = r#"You link knowledge points to moments in a lecture video.
Given a knowledge point and a numbered list of subtitle cues in which the
lecturer refers to something on screen, pick the cues that show this point.
Pick nothing if none fits. Answer with JSON only."#;

pub const TOPICS_SYSTEM: &str = r#"You organise knowledge points from many lectures into topics.
Every point index must be assigned to exactly one topic.
Tag each topic with a level: "foundational" for introductory concepts,
"core" for the main body, "applied" for applications and advanced material.
Answer with JSON only."#;

pub const MERGE_TOPICS_SYSTEM: &str = r#"You tidy the topic list of a course.
Topics were identified in separate batches, so the same subject may appear
under different names. Group only topics that cover the same subject; leave
distinct topics out of every group. Answer with JSON only."#;

pub const STRUCTURE_SYSTEM: &str = r#"You design the chapter structure of a textbook.
Group the given topics into chapters, order them from foundational to applied,
and list which chapters must be read before which. Every topic id belongs to
exactly one chapter. Answer with JSON only."#;

pub const CONFIRM_MERGE_SYSTEM: &str = r#"You decide whether two knowledge points describe the same concept.
If they do, write one combined explanation that keeps every detail from both
and a single sentence linking the two sources. Answer with JSON only."#;

pub const CONSOLIDATE_SYSTEM: &str = r#"You consolidate several versions of the same knowledge point
into one complete explanation. Keep every detail, remove repetition, and keep
the level of detail of the most thorough version. Answer with JSON only."#;

pub const TRANSITION_SYSTEM: &str = r#"You write textbook prose.
Write one or two sentences leading the reader from the previous chapter into
the next one. Return only the sentences."#;

fn snippet(text: &str, chars: usize) -> String {
    let mut out: String = text.chars().take(chars).collect();
    if text.chars().count() > chars {
        out.push_str("...");
    }
    out
}

fn payload_block(payload: &Value) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
}

/// Strip chatter from one chunk of cleaned text
pub fn reduce_request(text: &str) -> ModelRequest {
    let payload = json!({ "text": text });
    ModelRequest {
        task: ModelTask::ReduceNoise,
        system: REDUCE_SYSTEM.to_string(),
        prompt: format!("## Transcript\n\n{}\n\n## Edited text\n", text),
        shape: ResponseShape::Text,
        payload,
    }
}

/// Extract knowledge-point candidates from one chunk of core text
pub fn extract_request(document_title: &str, text: &str) -> ModelRequest {
    let payload = json!({ "title": document_title, "text": text });
    ModelRequest {
        task: ModelTask::ExtractPoints,
        system: EXTRACT_SYSTEM.to_string(),
        prompt: format!(
            "# Lecture: {}\n\n{}\n\nReturn JSON: {{\"points\": [{{\"title\": ..., \"content\": ..., \"importance\": 1-5}}]}}",
            document_title, text
        ),
        shape: ResponseShape::Json {
            schema: json!({
                "type": "object",
                "properties": {
                    "points": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": {"type": "string"},
                                "content": {"type": "string"},
                                "importance": {"type": "integer", "minimum": 1, "maximum": 5}
                            },
                            "required": ["title", "content"]
                        }
                    }
                },
                "required": ["points"]
            }),
        },
        payload,
    }
}

/// Choose cue entries (by index) that visually illustrate a point
pub fn mark_video_request(point: &KnowledgePoint, cues: &[(usize, &SubtitleEntry)]) -> ModelRequest {
    let cue_list: Vec<Value> = cues
        .iter()
        .map(|(index, entry)| {
            json!({
                "index": index,
                "start_ms": entry.start_ms,
                "end_ms": entry.end_ms,
                "text": entry.text,
            })
        })
        .collect();
    let payload = json!({
        "point": { "title": point.title, "content": snippet(&point.content, SNIPPET_CHARS) },
        "cues": cue_list,
    });

    ModelRequest {
        task: ModelTask::MarkVideo,
        system: MARK_VIDEO_SYSTEM.to_string(),
        prompt: format!(
            "{}\n\nReturn JSON: {{\"markers\": [{{\"cue\": <index>, \"description\": ...}}]}}",
            payload_block(&payload)
        ),
        shape: ResponseShape::Json {
            schema: json!({
                "type": "object",
                "properties": {
                    "markers": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "cue": {"type": "integer"},
                                "description": {"type": "string"}
                            },
                            "required": ["cue"]
                        }
                    }
                },
                "required": ["markers"]
            }),
        },
        payload,
    }
}

/// Group one batch of points into topics; indices are local to the batch
pub fn topics_request(points: &[&KnowledgePoint]) -> ModelRequest {
    let listed: Vec<Value> = points
        .iter()
        .enumerate()
        .map(|(i, p)| json!({ "index": i, "title": p.title, "snippet": snippet(&p.content, 100) }))
        .collect();
    let payload = json!({ "points": listed });

    ModelRequest {
        task: ModelTask::IdentifyTopics,
        system: TOPICS_SYSTEM.to_string(),
        prompt: format!(
            "Group these {} knowledge points into topics.\n\n{}\n\nReturn JSON: {{\"topics\": [{{\"label\": ..., \"level\": \"foundational|core|applied\", \"point_indices\": [..]}}]}}",
            points.len(),
            payload_block(&payload)
        ),
        shape: ResponseShape::Json {
            schema: json!({
                "type": "object",
                "properties": {
                    "topics": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "label": {"type": "string"},
                                "level": {"type": "string", "enum": ["foundational", "core", "applied"]},
                                "point_indices": {"type": "array", "items": {"type": "integer"}}
                            },
                            "required": ["label", "point_indices"]
                        }
                    }
                },
                "required": ["topics"]
            }),
        },
        payload,
    }
}

/// Ask which of the identified topics cover the same subject
pub fn merge_topics_request(clusters: &[TopicCluster], points: &[KnowledgePoint]) -> ModelRequest {
    let listed: Vec<Value> = clusters
        .iter()
        .enumerate()
        .map(|(id, c)| {
            let samples: Vec<&str> = c
                .member_indices
                .iter()
                .filter_map(|&i| points.get(i))
                .take(3)
                .map(|p| p.title.as_str())
                .collect();
            json!({ "id": id, "label": c.topic_label, "level": c.level, "samples": samples })
        })
        .collect();
    let payload = json!({ "topics": listed });

    ModelRequest {
        task: ModelTask::MergeTopics,
        system: MERGE_TOPICS_SYSTEM.to_string(),
        prompt: format!(
            "Which of these {} topics should be merged?\n\n{}\n\nReturn JSON: {{\"groups\": [{{\"label\": ..., \"topic_ids\": [ids]}}]}} (an empty list if nothing should merge)",
            clusters.len(),
            payload_block(&payload)
        ),
        shape: ResponseShape::Json {
            schema: json!({
                "type": "object",
                "properties": {
                    "groups": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "label": {"type": "string"},
                                "topic_ids": {"type": "array", "items": {"type": "integer"}}
                            },
                            "required": ["topic_ids"]
                        }
                    }
                },
                "required": ["groups"]
            }),
        },
        payload,
    }
}

/// Arrange clusters into chapters with prerequisite edges
pub fn structure_request(clusters: &[TopicCluster], points: &[KnowledgePoint]) -> ModelRequest {
    let listed: Vec<Value> = clusters
        .iter()
        .enumerate()
        .map(|(id, c)| {
            let samples: Vec<&str> = c
                .member_indices
                .iter()
                .filter_map(|&i| points.get(i))
                .take(5)
                .map(|p| p.title.as_str())
                .collect();
            json!({
                "id": id,
                "label": c.topic_label,
                "level": c.level,
                "size": c.member_indices.len(),
                "samples": samples,
            })
        })
        .collect();
    let payload = json!({ "clusters": listed });

    ModelRequest {
        task: ModelTask::BuildStructure,
        system: STRUCTURE_SYSTEM.to_string(),
        prompt: format!(
            "Design chapters for these {} topics.\n\n{}\n\nReturn JSON: {{\"course_name\": ..., \"chapters\": [{{\"title\": ..., \"clusters\": [ids]}}], \"prerequisites\": [{{\"chapter\": <chapter position>, \"requires\": [<chapter positions>]}}]}}",
            clusters.len(),
            payload_block(&payload)
        ),
        shape: ResponseShape::Json {
            schema: json!({
                "type": "object",
                "properties": {
                    "course_name": {"type": "string"},
                    "chapters": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": {"type": "string"},
                                "clusters": {"type": "array", "items": {"type": "integer"}}
                            },
                            "required": ["title", "clusters"]
                        }
                    },
                    "prerequisites": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "chapter": {"type": "integer"},
                                "requires": {"type": "array", "items": {"type": "integer"}}
                            },
                            "required": ["chapter", "requires"]
                        }
                    }
                },
                "required": ["chapters"]
            }),
        },
        payload,
    }
}

/// Ask whether two similar points are the same concept
pub fn confirm_merge_request(first: &KnowledgePoint, second: &KnowledgePoint, similarity: f64) -> ModelRequest {
    let payload = json!({
        "first": { "title": first.title, "content": first.content, "source": first.source_document_id },
        "second": { "title": second.title, "content": second.content, "source": second.source_document_id },
        "similarity": similarity,
    });

    ModelRequest {
        task: ModelTask::ConfirmMerge,
        system: CONFIRM_MERGE_SYSTEM.to_string(),
        prompt: format!(
            "{}\n\nReturn JSON: {{\"merge\": true|false, \"title\": ..., \"content\": <combined explanation>, \"transition\": <one sentence>}}",
            payload_block(&payload)
        ),
        shape: ResponseShape::Json {
            schema: json!({
                "type": "object",
                "properties": {
                    "merge": {"type": "boolean"},
                    "title": {"type": "string"},
                    "content": {"type": "string"},
                    "transition": {"type": "string"}
                },
                "required": ["merge"]
            }),
        },
        payload,
    }
}

/// Consolidate a group of three or more duplicates
pub fn consolidate_request(points: &[&KnowledgePoint]) -> ModelRequest {
    let versions: Vec<Value> = points
        .iter()
        .map(|p| json!({ "title": p.title, "content": p.content }))
        .collect();
    let payload = json!({ "versions": versions });

    ModelRequest {
        task: ModelTask::ConsolidateGroup,
        system: CONSOLIDATE_SYSTEM.to_string(),
        prompt: format!(
            "Consolidate these {} versions.\n\n{}\n\nReturn JSON: {{\"title\": ..., \"content\": ...}}",
            points.len(),
            payload_block(&payload)
        ),
        shape: ResponseShape::Json {
            schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["content"]
            }),
        },
        payload,
    }
}

/// Bridge paragraph between two consecutive chapters
pub fn transition_request(previous: &str, next: &str, next_titles: &[&str]) -> ModelRequest {
    let payload = json!({ "previous": previous, "next": next, "next_titles": next_titles });
    ModelRequest {
        task: ModelTask::WriteTransition,
        system: TRANSITION_SYSTEM.to_string(),
        prompt: format!(
            "Previous chapter: {}\nNext chapter: {}\nNext chapter covers: {}\n",
            previous,
            next,
            next_titles.join(", ")
        ),
        shape: ResponseShape::Text,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceId;

    #[test]
    fn test_snippet_truncates_on_chars() {
        assert_eq!(snippet("导数的定义", 2), "导数...");
        assert_eq!(snippet("short", 10), "short");
    }

    #[test]
    fn test_topics_request_uses_local_indices() {
        let source = SourceId::new("a.srt");
        let a = KnowledgePoint::new(&source, 7, "Limits", "content", 3);
        let b = KnowledgePoint::new(&source, 9, "Derivatives", "content", 3);
        let request = topics_request(&[&a, &b]);

        assert_eq!(request.task, ModelTask::IdentifyTopics);
        assert_eq!(request.payload["points"][1]["index"], 1);
        assert!(request.prompt.contains("Derivatives"));
        assert!(matches!(request.shape, ResponseShape::Json { .. }));
    }
}
