use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{DocumentRecord, ProgressStore, StageRecord};
use crate::error::StoreError;
use crate::models::{KnowledgePoint, SourceId};

/// In-process store; state lives for the duration of one run
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<SourceId, DocumentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn record(&self, record: StageRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records
            .entry(record.source_id.clone())
            .or_insert_with(|| DocumentRecord::new(record.source_id.clone()))
            .apply(&record);
        Ok(())
    }

    async fn query(&self, source_id: &SourceId) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(self.records.lock().await.get(source_id).cloned())
    }

    async fn save_artifacts(&self, source_id: &SourceId, points: &[KnowledgePoint]) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records
            .entry(source_id.clone())
            .or_insert_with(|| DocumentRecord::new(source_id.clone()))
            .knowledge_points = points.to_vec();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageStatus;
    use crate::store::RecordStatus;

    #[tokio::test]
    async fn test_record_and_query() {
        let store = MemoryStore::new();
        let source = SourceId::new("a.srt");

        assert!(store.query(&source).await.unwrap().is_none());

        store
            .record(StageRecord::new(&source, StageStatus::Cleaning, RecordStatus::Started, 0))
            .await
            .unwrap();
        let record = store.query(&source).await.unwrap().unwrap();
        assert_eq!(record.stage, StageStatus::Cleaning);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
