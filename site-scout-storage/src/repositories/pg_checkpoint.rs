use async_trait::async_trait;
use serde_json::Value;
use site_scout_core::{CheckpointRepository, Result, RunId};
use sqlx::{PgPool, Row};

/// Checkpoints in the `run_checkpoints` table, one row per run.
pub struct PgCheckpointRepository {
    pool: PgPool,
}

impl PgCheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn load(&self, run_id: &RunId) -> Result<Option<Value>> {
        let row = sqlx::query(
            r#"
            SELECT document
            FROM run_checkpoints
            WHERE run_id = $1
            "#,
        )
        .bind(run_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<Value, _>("document")?)),
            None => Ok(None),
        }
    }

    async fn store(&self, run_id: &RunId, document: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_checkpoints (run_id, document, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (run_id) DO UPDATE
            SET document = EXCLUDED.document, updated_at = NOW()
            "#,
        )
        .bind(run_id.0)
        .bind(document)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, run_id: &RunId) -> Result<()> {
        sqlx::query("DELETE FROM run_checkpoints WHERE run_id = $1")
            .bind(run_id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
