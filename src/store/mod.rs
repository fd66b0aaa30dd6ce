//! Progress and provenance store
//!
//! Each document's writes touch only its own record (keyed by source id), so
//! concurrent documents never contend on the same record.

pub mod json;
pub mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{KnowledgePoint, SourceId, StageStatus};

/// Status of a stage as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum RecordStatus {
    Started,
    Completed,
    Degraded(String),
    Failed(String),
    Interrupted,
}

/// One append to a document's record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub source_id: SourceId,
    pub stage: StageStatus,
    pub status: RecordStatus,
    /// Model retries spent on the document so far
    pub retries: u32,
}

impl StageRecord {
    pub fn new(source_id: &SourceId, stage: StageStatus, status: RecordStatus, retries: u32) -> Self {
        Self {
            source_id: source_id.clone(),
            stage,
            status,
            retries,
        }
    }
}

/// Last known state of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub source_id: SourceId,
    pub stage: StageStatus,
    pub status: RecordStatus,
    pub retries: u32,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub knowledge_points: Vec<KnowledgePoint>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            stage: StageStatus::Pending,
            status: RecordStatus::Started,
            retries: 0,
            degraded: false,
            error: None,
            knowledge_points: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Fold a stage record into this state
    ///
    /// A started clean stage opens a new run and discards what the previous
    /// run left behind.
    pub fn apply(&mut self, record: &StageRecord) {
        if record.stage == StageStatus::Cleaning && record.status == RecordStatus::Started {
            self.retries = 0;
            self.degraded = false;
            self.knowledge_points.clear();
        }
        self.stage = record.stage;
        self.retries = self.retries.max(record.retries);
        match &record.status {
            RecordStatus::Degraded(_) => {
                self.degraded = true;
                self.error = None;
            }
            RecordStatus::Failed(reason) => self.error = Some(reason.clone()),
            _ => self.error = None,
        }
        self.status = record.status.clone();
        self.updated_at = Utc::now();
    }

    /// Finished with saved points, safe to reuse on resume
    pub fn is_reusable(&self) -> bool {
        self.stage == StageStatus::Done && !self.knowledge_points.is_empty()
    }
}

/// Append/query interface the pipeline persists progress through
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn record(&self, record: StageRecord) -> Result<(), StoreError>;

    async fn query(&self, source_id: &SourceId) -> Result<Option<DocumentRecord>, StoreError>;

    /// Persist the final knowledge points of a document
    async fn save_artifacts(&self, source_id: &SourceId, points: &[KnowledgePoint]) -> Result<(), StoreError>;

    /// All known records, ordered by source id
    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError>;
}
