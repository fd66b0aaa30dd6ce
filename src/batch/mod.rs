//! Bounded-concurrency batch coordinator
//!
//! Documents are dispatched in input order to a worker pool of at most
//! `worker_limit` concurrently running documents. Results are collected back
//! in input order regardless of completion order.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{Document, KnowledgePoint, SourceId};
use crate::stages::{DocumentOutcome, DocumentRun, DocumentRunner};

/// Result of a batch run
#[derive(Debug)]
pub enum BatchOutcome {
    /// No documents were given; nothing ran
    NoInput,
    Finished(BatchReport),
}

/// Per-document line of a batch report
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub source_id: SourceId,
    pub title: String,
    #[serde(flatten)]
    pub outcome: DocumentOutcome,
    pub points: usize,
    pub dropped_candidates: usize,
    pub retries: u32,
    pub warnings: Vec<String>,
}

impl BatchEntry {
    fn from_run(run: &DocumentRun) -> Self {
        let document = &run.document;
        Self {
            source_id: document.source_id.clone(),
            title: document.title.clone(),
            outcome: run.outcome.clone(),
            points: document.knowledge_points.len(),
            dropped_candidates: document.dropped_candidates,
            retries: document.retries,
            warnings: document.warnings.clone(),
        }
    }
}

/// Counts per outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub degraded: usize,
    pub failed: usize,
    pub interrupted: usize,
    pub skipped: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} documents ({} completed, {} degraded, {} failed, {} interrupted, {} skipped)",
            self.total, self.completed, self.degraded, self.failed, self.interrupted, self.skipped
        )
    }
}

/// Everything a finished batch produced
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub worker_limit: usize,
    /// One entry per input document, in input order
    pub entries: Vec<BatchEntry>,
    #[serde(skip)]
    pub documents: Vec<Document>,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.outcome {
                DocumentOutcome::Completed => summary.completed += 1,
                DocumentOutcome::Degraded => summary.degraded += 1,
                DocumentOutcome::Failed { .. } => summary.failed += 1,
                DocumentOutcome::Interrupted { .. } => summary.interrupted += 1,
                DocumentOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn completed(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| e.outcome == DocumentOutcome::Completed)
    }

    pub fn degraded(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| e.outcome == DocumentOutcome::Degraded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, DocumentOutcome::Failed { .. }))
    }

    /// Knowledge points of completed and degraded documents, in input order
    pub fn knowledge_points(&self) -> Vec<KnowledgePoint> {
        self.documents
            .iter()
            .zip(&self.entries)
            .filter(|(_, entry)| matches!(entry.outcome, DocumentOutcome::Completed | DocumentOutcome::Degraded))
            .flat_map(|(document, _)| document.knowledge_points.iter().cloned())
            .collect()
    }

    /// Human-readable summary listing every document and its outcome
    pub fn render(&self) -> String {
        let mut out = format!("Batch {}: {}\n", self.run_id, self.summary());
        for entry in &self.entries {
            let line = match &entry.outcome {
                DocumentOutcome::Completed => format!("  completed    {} ({} points)", entry.source_id, entry.points),
                DocumentOutcome::Degraded => format!(
                    "  degraded     {} ({} points): {}",
                    entry.source_id,
                    entry.points,
                    entry.warnings.first().map(String::as_str).unwrap_or("fallback used")
                ),
                DocumentOutcome::Failed { reason } => format!("  failed       {}: {}", entry.source_id, reason),
                DocumentOutcome::Interrupted { at_stage } => {
                    format!("  interrupted  {} (after {:?})", entry.source_id, at_stage)
                }
                DocumentOutcome::Skipped => format!("  skipped      {}", entry.source_id),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

enum Slot {
    Running {
        source_id: SourceId,
        title: String,
        handle: JoinHandle<DocumentRun>,
    },
    Skipped(Document),
}

/// Runs the document runner over many documents
pub struct BatchCoordinator {
    runner: Arc<DocumentRunner>,
}

impl BatchCoordinator {
    pub fn new(runner: Arc<DocumentRunner>) -> Self {
        Self { runner }
    }

    /// Process `documents` with at most `worker_limit` running at once
    ///
    /// Once `cancel` fires no further document starts; running documents
    /// stop at their next stage boundary.
    pub async fn run(&self, documents: Vec<Document>, worker_limit: usize, cancel: &CancellationToken) -> BatchOutcome {
        if documents.is_empty() {
            info!("No documents to process");
            return BatchOutcome::NoInput;
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let worker_limit = worker_limit.max(1);
        let total = documents.len();
        let semaphore = Arc::new(Semaphore::new(worker_limit));

        info!(%run_id, documents = total, workers = worker_limit, "Starting batch");

        let mut slots = Vec::with_capacity(total);
        let mut pending = documents.into_iter();
        while let Some(document) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                warn!(%run_id, remaining = pending.len() + 1, "Batch cancelled, not starting remaining documents");
                slots.push(Slot::Skipped(document));
                slots.extend(pending.by_ref().map(Slot::Skipped));
                break;
            };

            let runner = Arc::clone(&self.runner);
            let cancel = cancel.clone();
            let source_id = document.source_id.clone();
            let title = document.title.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                runner.run(document, &cancel).await
            });
            slots.push(Slot::Running {
                source_id,
                title,
                handle,
            });
        }

        let mut entries = Vec::with_capacity(total);
        let mut processed = Vec::with_capacity(total);
        for slot in slots {
            let run = match slot {
                Slot::Skipped(document) => DocumentRun {
                    document,
                    outcome: DocumentOutcome::Skipped,
                },
                Slot::Running {
                    source_id,
                    title,
                    handle,
                } => match handle.await {
                    Ok(run) => run,
                    Err(e) => {
                        error!(%source_id, error = %e, "Document worker crashed");
                        let reason = format!("worker task failed: {}", e);
                        let mut document = Document::new(source_id, title, Vec::new());
                        document.fail(reason.clone());
                        DocumentRun {
                            document,
                            outcome: DocumentOutcome::Failed { reason },
                        }
                    }
                },
            };
            entries.push(BatchEntry::from_run(&run));
            processed.push(run.document);
        }

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            worker_limit,
            entries,
            documents: processed,
        };
        info!(%run_id, summary = %report.summary(), "Batch finished");
        BatchOutcome::Finished(report)
    }
}
