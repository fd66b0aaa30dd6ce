use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DocumentRecord, ProgressStore, StageRecord};
use crate::error::StoreError;
use crate::models::{KnowledgePoint, SourceId};

/// Directory of JSON records, one file per document
///
/// File names are name-based UUIDs of the source id, so any path maps to a
/// safe, stable file name. Writes go to a temp file first and are renamed
/// into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, source_id: &SourceId) -> PathBuf {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, source_id.as_str().as_bytes());
        self.dir.join(format!("{}.json", id))
    }

    async fn load(&self, path: &Path) -> Result<Option<DocumentRecord>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.source_id);
        let json = serde_json::to_vec_pretty(record)?;

        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(source_id = %record.source_id, path = %path.display(), "Progress record written");
        Ok(())
    }

    async fn load_or_new(&self, source_id: &SourceId) -> Result<DocumentRecord, StoreError> {
        Ok(self
            .load(&self.record_path(source_id))
            .await?
            .unwrap_or_else(|| DocumentRecord::new(source_id.clone())))
    }
}

#[async_trait]
impl ProgressStore for JsonFileStore {
    async fn record(&self, record: StageRecord) -> Result<(), StoreError> {
        let mut current = self.load_or_new(&record.source_id).await?;
        current.apply(&record);
        self.write(&current).await
    }

    async fn query(&self, source_id: &SourceId) -> Result<Option<DocumentRecord>, StoreError> {
        self.load(&self.record_path(source_id)).await
    }

    async fn save_artifacts(&self, source_id: &SourceId, points: &[KnowledgePoint]) -> Result<(), StoreError> {
        let mut current = self.load_or_new(source_id).await?;
        current.knowledge_points = points.to_vec();
        self.write(&current).await
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable progress record"),
            }
        }

        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(records)
    }
}
