use tracing::{debug, info, warn};

use super::split_chunks;
use crate::error::PipelineError;
use crate::llm::{complete_parsed, extract_request, parse_candidates, Candidate, LanguageModel, RetryPolicy, ValidCandidate};
use crate::models::StageStatus;

/// Configuration for the structure stage
#[derive(Debug, Clone)]
pub struct StructureConfig {
    /// Maximum characters sent to the model per call
    pub max_chunk_chars: usize,
    /// Characters of leading text used for the fallback point
    pub fallback_content_chars: usize,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 3_000,
            fallback_content_chars: 1_000,
        }
    }
}

/// Result of the structure stage
#[derive(Debug)]
pub struct StructureResult {
    /// Accepted candidates in extraction order
    pub candidates: Vec<ValidCandidate>,
    /// Candidates rejected as malformed
    pub dropped: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub retries: u32,
    pub failures: Vec<String>,
}

/// Execute the structure stage: extract knowledge-point candidates
///
/// Fails only when every chunk's call is exhausted.
pub async fn execute_structure(
    model: &dyn LanguageModel,
    document_title: &str,
    core_text: &str,
    config: &StructureConfig,
    policy: &RetryPolicy,
) -> Result<StructureResult, PipelineError> {
    let chunks = split_chunks(core_text, config.max_chunk_chars);
    let mut result = StructureResult {
        candidates: Vec::new(),
        dropped: 0,
        chunks: chunks.len(),
        failed_chunks: 0,
        retries: 0,
        failures: Vec::new(),
    };

    for (i, chunk) in chunks.iter().enumerate() {
        let request = extract_request(document_title, chunk);
        match complete_parsed(model, &request, policy, parse_candidates).await {
            Ok(answer) => {
                result.retries += answer.retries;
                for candidate in answer.value {
                    match candidate {
                        Candidate::Valid(valid) => result.candidates.push(valid),
                        Candidate::Malformed(malformed) => {
                            debug!(chunk = i, reason = %malformed.reason, "Dropping malformed candidate");
                            result.dropped += 1;
                        }
                    }
                }
            }
            Err(exhausted) => {
                warn!(chunk = i, error = %exhausted, "Structure call failed");
                result.retries += exhausted.retries;
                result.failed_chunks += 1;
                result.failures.push(format!("structure chunk {}: {}", i, exhausted.last_error));
            }
        }
    }

    if result.chunks > 0 && result.failed_chunks == result.chunks {
        return Err(PipelineError::StageFailure {
            stage: StageStatus::Structuring,
            reason: result.failures.join("; "),
        });
    }

    info!(
        chunks = result.chunks,
        candidates = result.candidates.len(),
        dropped = result.dropped,
        failed_chunks = result.failed_chunks,
        "Structure complete"
    );
    Ok(result)
}

/// The single point emitted when extraction yields nothing usable
pub fn fallback_candidate(document_title: &str, text: &str, config: &StructureConfig) -> ValidCandidate {
    let content: String = text.trim().chars().take(config.fallback_content_chars).collect();
    ValidCandidate {
        title: document_title.to_string(),
        content,
        importance: crate::models::DEFAULT_IMPORTANCE,
    }
}
