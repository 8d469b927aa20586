use async_trait::async_trait;

use crate::domain::RunId;
use crate::error::Result;

/// Key-value persistence collaborator behind the checkpoint store.
///
/// Documents are opaque JSON; the store owns their shape.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn load(&self, run_id: &RunId) -> Result<Option<serde_json::Value>>;
    async fn store(&self, run_id: &RunId, document: serde_json::Value) -> Result<()>;
    async fn remove(&self, run_id: &RunId) -> Result<()>;
}
