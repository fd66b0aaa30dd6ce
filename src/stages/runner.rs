use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    execute_clean, execute_mark_video, execute_reduce, execute_structure, fallback_candidate, CleanConfig,
    MarkVideoConfig, ReduceConfig, StructureConfig,
};
use crate::error::PipelineError;
use crate::heuristics::NoiseFilter;
use crate::llm::{LanguageModel, RetryPolicy};
use crate::models::{Document, KnowledgePoint, StageStatus};
use crate::store::{ProgressStore, RecordStatus, StageRecord};

/// Configuration for the per-document runner
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub clean: CleanConfig,
    pub reduce: ReduceConfig,
    pub structure: StructureConfig,
    pub mark_video: MarkVideoConfig,
    pub retry: RetryPolicy,
    /// Reuse stored results of documents already done
    pub resume: bool,
}

/// How a document's run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Completed,
    /// Completed, but a fallback replaced at least one model stage
    Degraded,
    Failed { reason: String },
    /// Cancelled at a stage boundary after starting
    Interrupted { at_stage: StageStatus },
    /// Cancelled before starting
    Skipped,
}

/// A document together with the outcome of running it
#[derive(Debug, Clone)]
pub struct DocumentRun {
    pub document: Document,
    pub outcome: DocumentOutcome,
}

enum Halt {
    Cancelled,
    Failed(PipelineError),
}

impl From<PipelineError> for Halt {
    fn from(e: PipelineError) -> Self {
        Halt::Failed(e)
    }
}

/// Drives one document through clean, reduce, structure and mark-video
pub struct DocumentRunner {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn ProgressStore>,
    filter: NoiseFilter,
    config: RunnerConfig,
}

impl DocumentRunner {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn ProgressStore>,
        filter: NoiseFilter,
        config: RunnerConfig,
    ) -> Self {
        Self {
            model,
            store,
            filter,
            config,
        }
    }

    /// Run a document to a terminal state, or to the next stage boundary
    /// once `cancel` fires
    pub async fn run(&self, mut document: Document, cancel: &CancellationToken) -> DocumentRun {
        if self.config.resume && self.resume(&mut document).await {
            let outcome = if document.degraded {
                DocumentOutcome::Degraded
            } else {
                DocumentOutcome::Completed
            };
            return DocumentRun { document, outcome };
        }

        let outcome = match self.process(&mut document, cancel).await {
            Ok(()) if document.degraded => DocumentOutcome::Degraded,
            Ok(()) => DocumentOutcome::Completed,
            Err(Halt::Cancelled) if document.stage_status == StageStatus::Pending => DocumentOutcome::Skipped,
            Err(Halt::Cancelled) => {
                let at_stage = document.stage_status;
                info!(source_id = %document.source_id, stage = ?at_stage, "Document interrupted");
                self.record(&document, at_stage, RecordStatus::Interrupted).await;
                DocumentOutcome::Interrupted { at_stage }
            }
            Err(Halt::Failed(e)) => {
                let reason = e.to_string();
                warn!(source_id = %document.source_id, stage = ?document.stage_status, error = %reason, "Document failed");
                self.record(&document, document.stage_status, RecordStatus::Failed(reason.clone()))
                    .await;
                document.fail(reason.clone());
                DocumentOutcome::Failed { reason }
            }
        };

        DocumentRun { document, outcome }
    }

    async fn process(&self, document: &mut Document, cancel: &CancellationToken) -> Result<(), Halt> {
        let model = self.model.as_ref();
        let retry = &self.config.retry;

        // clean
        self.enter(document, StageStatus::Cleaning, cancel).await?;
        document.cleaned_text = execute_clean(&document.raw_entries, &self.filter, &self.config.clean)?;
        self.record(document, StageStatus::Cleaning, RecordStatus::Completed).await;

        // reduce
        self.enter(document, StageStatus::Reducing, cancel).await?;
        let reduced = execute_reduce(model, &document.cleaned_text, &self.config.reduce, retry).await;
        document.retries += reduced.retries;
        document.core_text = reduced.core_text.clone();
        if reduced.is_degraded() {
            document.degraded = true;
            for failure in &reduced.failures {
                document.warn(failure.clone());
            }
            let reason = format!("{} of {} reduce chunks kept cleaned text", reduced.degraded_chunks, reduced.chunks);
            self.record(document, StageStatus::Reducing, RecordStatus::Degraded(reason)).await;
        } else {
            self.record(document, StageStatus::Reducing, RecordStatus::Completed).await;
        }

        // structure
        self.enter(document, StageStatus::Structuring, cancel).await?;
        let structured = execute_structure(
            model,
            &document.title,
            &document.core_text,
            &self.config.structure,
            retry,
        )
        .await?;
        document.retries += structured.retries;
        document.dropped_candidates = structured.dropped;
        for failure in &structured.failures {
            document.warn(failure.clone());
        }

        let mut candidates = structured.candidates;
        let mut structure_status = RecordStatus::Completed;
        if candidates.is_empty() {
            warn!(source_id = %document.source_id, "No valid knowledge points, using fallback point");
            candidates.push(fallback_candidate(&document.title, &document.core_text, &self.config.structure));
            document.degraded = true;
            structure_status = RecordStatus::Degraded("no valid candidates, fallback point emitted".to_string());
        } else if structured.failed_chunks > 0 {
            document.degraded = true;
            structure_status = RecordStatus::Degraded(format!(
                "{} of {} structure chunks failed",
                structured.failed_chunks, structured.chunks
            ));
        }
        document.knowledge_points = candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| KnowledgePoint::new(&document.source_id, i, c.title, c.content, c.importance))
            .collect();
        self.record(document, StageStatus::Structuring, structure_status).await;

        // mark-video
        self.enter(document, StageStatus::Marking, cancel).await?;
        let points = std::mem::take(&mut document.knowledge_points);
        let (points, marked) =
            execute_mark_video(model, points, &document.raw_entries, &self.config.mark_video, retry).await;
        document.knowledge_points = points;
        document.retries += marked.retries;
        for warning in marked.warnings {
            document.warn(warning);
        }
        self.record(document, StageStatus::Marking, RecordStatus::Completed).await;

        document.advance_to(StageStatus::Done)?;
        if let Err(e) = self
            .store
            .save_artifacts(&document.source_id, &document.knowledge_points)
            .await
        {
            warn!(source_id = %document.source_id, error = %e, "Failed to save knowledge points");
        }
        let status = if document.degraded {
            RecordStatus::Degraded(document.warnings.join("; "))
        } else {
            RecordStatus::Completed
        };
        self.record(document, StageStatus::Done, status).await;

        info!(
            source_id = %document.source_id,
            points = document.knowledge_points.len(),
            dropped = document.dropped_candidates,
            retries = document.retries,
            degraded = document.degraded,
            "Document done"
        );
        Ok(())
    }

    /// Stage boundary: stop if cancelled, otherwise move to `stage`
    async fn enter(&self, document: &mut Document, stage: StageStatus, cancel: &CancellationToken) -> Result<(), Halt> {
        if cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        document.advance_to(stage)?;
        info!(source_id = %document.source_id, stage = ?stage, "Stage started");
        self.record(document, stage, RecordStatus::Started).await;
        Ok(())
    }

    /// Progress is advisory; store failures never fail the document
    async fn record(&self, document: &Document, stage: StageStatus, status: RecordStatus) {
        let record = StageRecord::new(&document.source_id, stage, status, document.retries);
        if let Err(e) = self.store.record(record).await {
            warn!(source_id = %document.source_id, error = %e, "Failed to record progress");
        }
    }

    async fn resume(&self, document: &mut Document) -> bool {
        let record = match self.store.query(&document.source_id).await {
            Ok(Some(record)) if record.is_reusable() => record,
            Ok(_) => return false,
            Err(e) => {
                warn!(source_id = %document.source_id, error = %e, "Progress lookup failed, reprocessing");
                return false;
            }
        };

        info!(source_id = %document.source_id, points = record.knowledge_points.len(), "Reusing stored results");
        document.knowledge_points = record.knowledge_points;
        document.degraded = record.degraded;
        document.retries = record.retries;
        document.stage_status = StageStatus::Done;
        true
    }
}
