use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use skillforge_core::error::{Result, SkillforgeError};
use skillforge_core::record::{ExecutionRecord, RecordPatch};
use skillforge_core::traits::ExecutionRecordStore;

/// In-process record store. Keeps insertion order for inspection.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<ExecutionRecord>>,
    index: Mutex<HashMap<String, usize>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let index = self.index.lock().ok()?;
        let records = self.records.lock().ok()?;
        index.get(execution_id).and_then(|&i| records.get(i).cloned())
    }

    /// All records in the order they were saved.
    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExecutionRecordStore for MemoryRecordStore {
    fn save(&self, record: ExecutionRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut index = self
                .index
                .lock()
                .map_err(|e| SkillforgeError::Database(e.to_string()))?;
            let mut records = self
                .records
                .lock()
                .map_err(|e| SkillforgeError::Database(e.to_string()))?;
            if let Some(&i) = index.get(&record.id) {
                records[i] = record;
            } else {
                index.insert(record.id.clone(), records.len());
                records.push(record);
            }
            Ok(())
        })
    }

    fn update(&self, execution_id: &str, patch: RecordPatch) -> BoxFuture<'_, Result<()>> {
        let execution_id = execution_id.to_string();
        Box::pin(async move {
            let index = self
                .index
                .lock()
                .map_err(|e| SkillforgeError::Database(e.to_string()))?;
            let mut records = self
                .records
                .lock()
                .map_err(|e| SkillforgeError::Database(e.to_string()))?;
            let i = *index.get(&execution_id).ok_or_else(|| {
                SkillforgeError::Database(format!("No execution record: {}", execution_id))
            })?;
            records[i].apply(&patch);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skillforge_core::record::ExecutionStatus;
    use skillforge_core::types::TriggerSource;

    fn record(id: &str) -> ExecutionRecord {
        ExecutionRecord {
            id: id.into(),
            skill_id: "echo".into(),
            status: ExecutionStatus::Running,
            input: serde_json::json!({}),
            output: None,
            error: None,
            error_code: None,
            triggered_by: "test".into(),
            trigger_source: TriggerSource::Manual,
            listing_id: None,
            campaign_id: None,
            parent_execution_id: None,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_ms: None,
            tokens_used: None,
            cost_usd: None,
            retry_count: None,
        }
    }

    #[tokio::test]
    async fn save_then_update() {
        let store = MemoryRecordStore::new();
        store.save(record("a")).await.unwrap();
        store.save(record("b")).await.unwrap();

        let patch = RecordPatch {
            status: Some(ExecutionStatus::Completed),
            output: Some(serde_json::json!("done")),
            ..Default::default()
        };
        store.update("a", patch).await.unwrap();

        let a = store.get("a").unwrap();
        assert_eq!(a.status, ExecutionStatus::Completed);
        assert_eq!(a.output, Some(serde_json::json!("done")));
        assert_eq!(store.get("b").unwrap().status, ExecutionStatus::Running);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn update_unknown_record_fails() {
        let store = MemoryRecordStore::new();
        let err = store.update("ghost", RecordPatch::default()).await.unwrap_err();
        assert!(matches!(err, SkillforgeError::Database(_)));
    }
}
