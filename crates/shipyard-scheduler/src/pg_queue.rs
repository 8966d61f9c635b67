//! Job queue backend using PostgreSQL.
//!
//! Expects a `build_jobs` table:
//!
//! ```sql
//! CREATE TABLE build_jobs (
//!     id          UUID PRIMARY KEY,
//!     queue       TEXT NOT NULL,
//!     payload     JSONB NOT NULL,
//!     status      TEXT NOT NULL DEFAULT 'pending',
//!     claimed_by  TEXT,
//!     claimed_at  TIMESTAMPTZ,
//!     created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shipyard_config::QueueConfig;
use shipyard_core::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::debug;

use crate::queue::{JobBackend, QueuedJob};

/// A row of the `build_jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: uuid::Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One named queue in the `build_jobs` table.
///
/// Claimed jobs that are not removed within the visibility timeout become
/// claimable again.
pub struct PgJobQueue {
    pool: PgPool,
    queue: String,
    worker_id: String,
    visibility_timeout: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, config: &QueueConfig, worker_id: impl Into<String>) -> Self {
        Self {
            pool,
            queue: config.name.clone(),
            worker_id: worker_id.into(),
            visibility_timeout: config.visibility_timeout,
        }
    }

    /// Connect a small pool for `config.database_url`.
    pub async fn connect(config: &QueueConfig, worker_id: impl Into<String>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&config.database_url)
            .await
            .map_err(queue_error)?;
        Ok(Self::new(pool, config, worker_id))
    }

    /// Claim the next available job.
    /// Uses SKIP LOCKED so several schedulers can share a queue.
    pub async fn claim(&self) -> Result<Option<JobRow>> {
        let job = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE build_jobs
            SET status = 'claimed', claimed_by = $2, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM build_jobs
                WHERE queue = $1
                  AND (
                    status = 'pending'
                    OR (status = 'claimed' AND claimed_at < NOW() - make_interval(secs => $3))
                  )
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(&self.queue)
        .bind(&self.worker_id)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(queue_error)?;
        Ok(job)
    }

    /// Delete a job once it has been handed to a build.
    pub async fn remove(&self, job_id: uuid::Uuid) -> Result<()> {
        sqlx::query("DELETE FROM build_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;
        Ok(())
    }
}

fn queue_error(e: sqlx::Error) -> Error {
    Error::Queue(e.to_string())
}

#[async_trait]
impl JobBackend for PgJobQueue {
    async fn next_job(&self) -> Result<Option<QueuedJob>> {
        let Some(row) = self.claim().await? else {
            return Ok(None);
        };
        debug!(queue = %self.queue, job_id = %row.id, "Claimed job");

        Ok(Some(QueuedJob {
            id: row.id.to_string(),
            data: row.payload,
        }))
    }

    async fn remove_job(&self, job_id: &str) -> Result<()> {
        let id = uuid::Uuid::parse_str(job_id)
            .map_err(|e| Error::Queue(format!("invalid job id {}: {}", job_id, e)))?;
        self.remove(id).await
    }
}
