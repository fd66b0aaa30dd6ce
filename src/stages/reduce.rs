use tracing::{info, warn};

use super::split_chunks;
use crate::llm::{complete_parsed, non_empty_text, reduce_request, LanguageModel, RetryPolicy};

/// Configuration for the reduce stage
#[derive(Debug, Clone)]
pub struct ReduceConfig {
    /// Maximum characters sent to the model per call
    pub max_chunk_chars: usize,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self { max_chunk_chars: 4_000 }
    }
}

/// Result of the reduce stage
#[derive(Debug)]
pub struct ReduceResult {
    /// Core content text (cleaned text where a chunk fell back)
    pub core_text: String,
    pub chunks: usize,
    /// Chunks whose model call failed and kept their cleaned text
    pub degraded_chunks: usize,
    pub retries: u32,
    pub failures: Vec<String>,
}

impl ReduceResult {
    pub fn is_degraded(&self) -> bool {
        self.degraded_chunks > 0
    }
}

/// Execute the reduce stage: strip chatter, keep technical substance
///
/// Never fails: a chunk whose call is exhausted keeps its cleaned text.
pub async fn execute_reduce(
    model: &dyn LanguageModel,
    cleaned_text: &str,
    config: &ReduceConfig,
    policy: &RetryPolicy,
) -> ReduceResult {
    let chunks = split_chunks(cleaned_text, config.max_chunk_chars);
    let mut reduced = Vec::with_capacity(chunks.len());
    let mut result = ReduceResult {
        core_text: String::new(),
        chunks: chunks.len(),
        degraded_chunks: 0,
        retries: 0,
        failures: Vec::new(),
    };

    for (i, chunk) in chunks.iter().enumerate() {
        let request = reduce_request(chunk);
        match complete_parsed(model, &request, policy, non_empty_text).await {
            Ok(answer) => {
                result.retries += answer.retries;
                reduced.push(answer.value);
            }
            Err(exhausted) => {
                warn!(chunk = i, error = %exhausted, "Reduce call failed, keeping cleaned text");
                result.retries += exhausted.retries;
                result.degraded_chunks += 1;
                result.failures.push(format!("reduce chunk {}: {}", i, exhausted.last_error));
                reduced.push(chunk.clone());
            }
        }
    }

    result.core_text = reduced.join("\n\n");
    info!(
        chunks = result.chunks,
        degraded_chunks = result.degraded_chunks,
        chars_in = cleaned_text.len(),
        chars_out = result.core_text.len(),
        "Reduce complete"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::llm::testing::ScriptedModel;
    use crate::llm::ModelTask;

    #[tokio::test]
    async fn test_reduce_uses_model_output() {
        let model = ScriptedModel::offline();
        model.push(ModelTask::ReduceNoise, Ok("Limits are the foundation.".to_string()));

        let result = execute_reduce(
            &model,
            "Hello everyone! Limits are the foundation.",
            &ReduceConfig::default(),
            &RetryPolicy::immediate(2),
        )
        .await;

        assert_eq!(result.core_text, "Limits are the foundation.");
        assert!(!result.is_degraded());
    }

    #[tokio::test]
    async fn test_exhausted_chunk_falls_back_to_cleaned_text() {
        let model = ScriptedModel::new(|_| Err(ModelError::Timeout));

        let result = execute_reduce(
            &model,
            "Derivatives measure change.",
            &ReduceConfig::default(),
            &RetryPolicy::immediate(2),
        )
        .await;

        assert_eq!(result.core_text, "Derivatives measure change.");
        assert!(result.is_degraded());
        assert_eq!(result.retries, 2);
        assert_eq!(model.calls(ModelTask::ReduceNoise), 3);
    }
}
