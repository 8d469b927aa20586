use async_trait::async_trait;
use serde_json::Value;
use site_scout_core::{CheckpointRepository, Result, RunId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local checkpoint storage, lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointRepository {
    documents: RwLock<HashMap<RunId, Value>>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn load(&self, run_id: &RunId) -> Result<Option<Value>> {
        Ok(self.documents.read().await.get(run_id).cloned())
    }

    async fn store(&self, run_id: &RunId, document: Value) -> Result<()> {
        self.documents.write().await.insert(*run_id, document);
        Ok(())
    }

    async fn remove(&self, run_id: &RunId) -> Result<()> {
        self.documents.write().await.remove(run_id);
        Ok(())
    }
}
