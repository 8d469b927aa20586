use async_trait::async_trait;
use serde_json::Value;
use site_scout_core::{CheckpointRepository, Result, RunId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// One `<run_id>.json` file per run under a directory.
///
/// Writes go to a temporary file first and are renamed into place, so a crash
/// mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointRepository {
    directory: PathBuf,
}

impl FileCheckpointRepository {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.directory.join(format!("{}.json", run_id))
    }
}

#[async_trait]
impl CheckpointRepository for FileCheckpointRepository {
    async fn load(&self, run_id: &RunId) -> Result<Option<Value>> {
        match fs::read(self.path_for(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, run_id: &RunId, document: Value) -> Result<()> {
        fs::create_dir_all(&self.directory).await?;

        let path = self.path_for(run_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&document)?).await?;
        fs::rename(&tmp, &path).await?;

        tracing::debug!(path = %path.display(), "Checkpoint written");
        Ok(())
    }

    async fn remove(&self, run_id: &RunId) -> Result<()> {
        match fs::remove_file(self.path_for(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_through_directory() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCheckpointRepository::new(dir.path().join("checkpoints"));
        let run_id = RunId::new();

        assert!(repo.load(&run_id).await.unwrap().is_none());

        repo.store(&run_id, json!({"phase": "tier2"})).await.unwrap();
        assert!(dir
            .path()
            .join("checkpoints")
            .join(format!("{}.json", run_id))
            .exists());
        assert_eq!(
            repo.load(&run_id).await.unwrap(),
            Some(json!({"phase": "tier2"}))
        );

        repo.remove(&run_id).await.unwrap();
        repo.remove(&run_id).await.unwrap();
        assert!(repo.load(&run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCheckpointRepository::new(dir.path());
        let run_id = RunId::new();

        std::fs::write(dir.path().join(format!("{}.json", run_id)), b"{not json").unwrap();

        assert!(repo.load(&run_id).await.is_err());
    }
}
