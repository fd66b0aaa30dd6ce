use std::sync::Arc;

use tracing::warn;

use crate::llm::{clean_transition, complete_parsed, transition_request, LanguageModel, RetryPolicy};

/// Deterministic bridge used when the model cannot write one
pub fn fallback_transition(next_chapter: &str) -> String {
    format!("Next, we turn to {}.", next_chapter)
}

/// Writes the bridging paragraph between consecutive chapters
pub struct TransitionWriter {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl TransitionWriter {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Returns the transition and, if the fallback was used, why
    pub async fn write(&self, previous: &str, next: &str, next_titles: &[&str]) -> (String, Option<String>) {
        let request = transition_request(previous, next, next_titles);
        let parse = |text: &str| clean_transition(text).ok_or_else(|| "empty transition".to_string());

        match complete_parsed(self.model.as_ref(), &request, &self.retry, parse).await {
            Ok(answer) => (answer.value, None),
            Err(exhausted) => {
                warn!(chapter = next, error = %exhausted, "Chapter transition failed, using fallback");
                (
                    fallback_transition(next),
                    Some(format!("transition into '{}': {}", next, exhausted.last_error)),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::llm::testing::ScriptedModel;

    #[tokio::test]
    async fn test_model_transition() {
        let writer = TransitionWriter::new(Arc::new(ScriptedModel::offline()), RetryPolicy::immediate(0));
        let (text, warning) = writer.write("Limits", "Derivatives", &["Derivative rules"]).await;
        assert_eq!(text, "Having covered Limits, we now turn to Derivatives.");
        assert!(warning.is_none());
    }

    #[tokio::test]
    async fn test_fallback_transition() {
        let writer = TransitionWriter::new(
            Arc::new(ScriptedModel::new(|_| Err(ModelError::Timeout))),
            RetryPolicy::immediate(1),
        );
        let (text, warning) = writer.write("Limits", "Derivatives", &[]).await;
        assert_eq!(text, "Next, we turn to Derivatives.");
        assert!(warning.is_some());
    }
}
