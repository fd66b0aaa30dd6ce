//! Parsing and validation of model answers
//!
//! Models wrap JSON in prose or code fences and drift on field names, so every
//! parser here is lenient about the envelope and strict about the content.

use serde_json::Value;

use crate::models::{clamp_importance, TopicLevel, DEFAULT_IMPORTANCE};

/// Pull a JSON value out of a model response
///
/// Accepts bare JSON, a fenced block, or the outermost `{...}` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(block) = fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str(block.trim())
    {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let rest = &text[open + 3..];
    let body = &rest[rest.find('\n')? + 1..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Find the first array among `keys`, or accept a top-level array
fn array_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    if let Value::Array(items) = value {
        return Some(items);
    }
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_array))
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Integer from a JSON number or numeric string
pub fn as_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "merge" => Some(true),
            "false" | "no" | "n" | "separate" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

/// A knowledge-point candidate that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCandidate {
    pub title: String,
    pub content: String,
    pub importance: u8,
}

/// A candidate the model produced that cannot become a knowledge point
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedCandidate {
    pub raw: Value,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Valid(ValidCandidate),
    Malformed(MalformedCandidate),
}

/// Parse an extraction answer into candidates
///
/// Errors only when the envelope itself is unusable; individual bad entries
/// come back as `Candidate::Malformed`.
pub fn parse_candidates(response: &str) -> Result<Vec<Candidate>, String> {
    let value = extract_json(response).ok_or_else(|| "response is not JSON".to_string())?;
    let items = array_field(&value, &["points", "knowledge_points", "items"])
        .ok_or_else(|| "no points array in response".to_string())?;

    Ok(items.iter().map(validate_candidate).collect())
}

fn validate_candidate(raw: &Value) -> Candidate {
    let malformed = |reason: &str| {
        Candidate::Malformed(MalformedCandidate {
            raw: raw.clone(),
            reason: reason.to_string(),
        })
    };

    if !raw.is_object() {
        return malformed("candidate is not an object");
    }
    let Some(title) = string_field(raw, &["title", "name"]) else {
        return malformed("missing title");
    };
    let Some(content) = string_field(raw, &["content", "text", "summary"]) else {
        return malformed("missing content");
    };
    let importance = raw
        .get("importance")
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64().map(|f| f.round() as i64),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
        .map(clamp_importance)
        .unwrap_or(DEFAULT_IMPORTANCE);

    Candidate::Valid(ValidCandidate {
        title,
        content,
        importance,
    })
}

/// One topic proposed by the model, indices relative to the batch it saw
#[derive(Debug, Clone, PartialEq)]
pub struct TopicProposal {
    pub label: String,
    pub level: TopicLevel,
    pub point_indices: Vec<i64>,
}

pub fn parse_topics(response: &str) -> Result<Vec<TopicProposal>, String> {
    let value = extract_json(response).ok_or_else(|| "response is not JSON".to_string())?;
    let items = array_field(&value, &["topics", "clusters"])
        .ok_or_else(|| "no topics array in response".to_string())?;

    let topics: Vec<TopicProposal> = items
        .iter()
        .filter_map(|item| {
            let indices = ["point_indices", "points", "indices"]
                .iter()
                .find_map(|k| item.get(*k).and_then(Value::as_array))?;
            Some(TopicProposal {
                label: string_field(item, &["label", "title", "name"])
                    .unwrap_or_else(|| "Untitled topic".to_string()),
                level: item
                    .get("level")
                    .and_then(Value::as_str)
                    .map(TopicLevel::parse)
                    .unwrap_or(TopicLevel::Core),
                point_indices: indices.iter().filter_map(as_index).collect(),
            })
        })
        .collect();

    if topics.is_empty() && !items.is_empty() {
        return Err("no usable topic entries".to_string());
    }
    Ok(topics)
}

/// Topics the model wants combined under one label
#[derive(Debug, Clone, PartialEq)]
pub struct TopicGroup {
    pub label: Option<String>,
    pub topic_ids: Vec<i64>,
}

pub fn parse_topic_groups(response: &str) -> Result<Vec<TopicGroup>, String> {
    let value = extract_json(response).ok_or_else(|| "response is not JSON".to_string())?;
    let items = array_field(&value, &["groups", "merged_topics", "merges"])
        .ok_or_else(|| "no groups array in response".to_string())?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let ids = ["topic_ids", "original_indices", "topics", "ids"]
                .iter()
                .find_map(|k| item.get(*k).and_then(Value::as_array))?;
            Some(TopicGroup {
                label: string_field(item, &["label", "title", "name"]),
                topic_ids: ids.iter().filter_map(as_index).collect(),
            })
        })
        .collect())
}

/// A chapter proposed by the model: its title and the cluster ids it holds
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterProposal {
    pub title: Option<String>,
    pub cluster_ids: Vec<i64>,
}

/// The model's course structure, chapter references are positions in `chapters`
#[derive(Debug, Clone, PartialEq)]
pub struct StructureProposal {
    pub course_name: Option<String>,
    pub chapters: Vec<ChapterProposal>,
    /// (prerequisite, dependent) pairs
    pub prerequisites: Vec<(i64, i64)>,
}

pub fn parse_structure(response: &str) -> Result<StructureProposal, String> {
    let value = extract_json(response).ok_or_else(|| "response is not JSON".to_string())?;
    let items = value
        .get("chapters")
        .and_then(Value::as_array)
        .ok_or_else(|| "no chapters array in response".to_string())?;

    let chapters: Vec<ChapterProposal> = items
        .iter()
        .filter_map(|item| {
            let ids = ["clusters", "cluster_ids", "topic_ids", "topics"]
                .iter()
                .find_map(|k| item.get(*k).and_then(Value::as_array))?;
            Some(ChapterProposal {
                title: string_field(item, &["title", "name"]),
                cluster_ids: ids.iter().filter_map(as_index).collect(),
            })
        })
        .collect();

    if chapters.is_empty() {
        return Err("no usable chapters in response".to_string());
    }

    let mut prerequisites = Vec::new();
    match value.get("prerequisites") {
        Some(Value::Array(edges)) => {
            for edge in edges {
                let Some(chapter) = edge.get("chapter").and_then(as_index) else {
                    continue;
                };
                if let Some(requires) = edge.get("requires").and_then(Value::as_array) {
                    prerequisites.extend(requires.iter().filter_map(as_index).map(|r| (r, chapter)));
                }
            }
        }
        Some(Value::Object(map)) => {
            for (chapter, requires) in map {
                let (Ok(chapter), Some(requires)) = (chapter.trim().parse::<i64>(), requires.as_array()) else {
                    continue;
                };
                prerequisites.extend(requires.iter().filter_map(as_index).map(|r| (r, chapter)));
            }
        }
        _ => {}
    }

    Ok(StructureProposal {
        course_name: string_field(&value, &["course_name", "name", "title"]),
        chapters,
        prerequisites,
    })
}

/// Outcome of a pairwise duplicate check
#[derive(Debug, Clone, PartialEq)]
pub struct MergeDecision {
    pub merge: bool,
    pub title: Option<String>,
    pub content: Option<String>,
    pub transition: Option<String>,
}

pub fn parse_merge_decision(response: &str) -> Result<MergeDecision, String> {
    let value = extract_json(response).ok_or_else(|| "response is not JSON".to_string())?;
    let merge = ["merge", "is_duplicate", "same"]
        .iter()
        .find_map(|k| value.get(*k).and_then(as_bool))
        .ok_or_else(|| "no merge decision in response".to_string())?;

    Ok(MergeDecision {
        merge,
        title: string_field(&value, &["title", "merged_title"]),
        content: string_field(&value, &["content", "merged_content"]),
        transition: string_field(&value, &["transition", "transition_text"]),
    })
}

/// Consolidated entry for a group of duplicates
#[derive(Debug, Clone, PartialEq)]
pub struct Consolidation {
    pub title: Option<String>,
    pub content: String,
}

pub fn parse_consolidation(response: &str) -> Result<Consolidation, String> {
    let value = extract_json(response).ok_or_else(|| "response is not JSON".to_string())?;
    let content = string_field(&value, &["content", "merged_content"])
        .ok_or_else(|| "no content in response".to_string())?;
    Ok(Consolidation {
        title: string_field(&value, &["title", "merged_title"]),
        content,
    })
}

/// A subtitle cue the model tied to a knowledge point
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerChoice {
    pub cue: i64,
    pub description: Option<String>,
}

pub fn parse_marker_choices(response: &str) -> Result<Vec<MarkerChoice>, String> {
    let value = extract_json(response).ok_or_else(|| "response is not JSON".to_string())?;
    let items = array_field(&value, &["markers", "cues"])
        .ok_or_else(|| "no markers array in response".to_string())?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let cue = match item {
                Value::Object(_) => ["cue", "index", "cue_index"].iter().find_map(|k| item.get(*k).and_then(as_index)),
                other => as_index(other),
            }?;
            Some(MarkerChoice {
                cue,
                description: string_field(item, &["description", "reason"]),
            })
        })
        .collect())
}

/// Tidy a free-text transition sentence
pub fn clean_transition(response: &str) -> Option<String> {
    let text = response.trim();
    let text = text
        .strip_prefix("Transition:")
        .or_else(|| text.strip_prefix("transition:"))
        .unwrap_or(text)
        .trim()
        .trim_matches(|c| c == '"' || c == '“' || c == '”')
        .trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Non-empty free-text answer
pub fn non_empty_text(response: &str) -> Result<String, String> {
    let text = response.trim();
    if text.is_empty() {
        Err("empty response".to_string())
    } else {
        Ok(text.to_string())
    }
}
