//! Durable store.
//!
//! Postgres, keyed by line hash with (sport, game_id, ingested_ts)
//! secondary indices. Writes are idempotent upserts; nothing in the
//! pipeline joins across providers, so the table is effectively an
//! append-with-upsert log. Sustained write failure flips the store into
//! degraded mode: reads keep coming from L1 while writes buffer in a
//! bounded queue that sheds oldest on overflow.

use crate::metrics::PipelineMetrics;
use crate::models::{CanonicalProp, LineHash, Sport};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Bounded degraded-mode write buffer.
const WRITE_BUFFER_CAP: usize = 10_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store write failed: {0}")]
    WriteFailed(String),
}

pub struct PropStore {
    pool: PgPool,
    degraded: AtomicBool,
    buffer: Mutex<VecDeque<CanonicalProp>>,
    metrics: Arc<PipelineMetrics>,
}

impl PropStore {
    pub async fn connect(url: &str, metrics: Arc<PipelineMetrics>) -> Result<Self> {
        let pool = Self::connect_with_retry(url, 5).await?;
        let store = Self {
            pool,
            degraded: AtomicBool::new(false),
            buffer: Mutex::new(VecDeque::new()),
            metrics,
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn connect_with_retry(url: &str, max_retries: u32) -> Result<PgPool> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("connected_to_store");
                    return Ok(pool);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(anyhow!(
                            "failed to connect to store after {max_retries} attempts: {e}"
                        ));
                    }
                    warn!(attempt, error = %e, "store_connection_retry");
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS canonical_props (
                line_hash TEXT PRIMARY KEY,
                sport TEXT NOT NULL,
                game_id TEXT NOT NULL,
                game_status TEXT NOT NULL,
                ingested_ts TIMESTAMPTZ NOT NULL,
                updated_ts TIMESTAMPTZ NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating canonical_props")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_props_sport ON canonical_props (sport, ingested_ts DESC)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_props_game ON canonical_props (game_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    async fn write_row(&self, prop: &CanonicalProp) -> Result<(), sqlx::Error> {
        let payload = serde_json::to_string(prop).unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO canonical_props (
                line_hash, sport, game_id, game_status, ingested_ts, updated_ts, payload
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (line_hash) DO UPDATE SET
                game_status = EXCLUDED.game_status,
                ingested_ts = EXCLUDED.ingested_ts,
                updated_ts = EXCLUDED.updated_ts,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(prop.line_hash.to_hex())
        .bind(prop.sport.as_str())
        .bind(prop.game_id.as_str())
        .bind(prop.game_status.as_str())
        .bind(prop.ingested_ts)
        .bind(prop.updated_ts)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map(|_| ())
    }

    /// Idempotent upsert with one retry. A second failure buffers the
    /// record and flips degraded mode.
    pub async fn upsert(&self, prop: &CanonicalProp) -> Result<(), StoreError> {
        for attempt in 0..2 {
            match self.write_row(prop).await {
                Ok(()) => {
                    self.metrics.record_store_write();
                    if self.degraded.swap(false, Ordering::Relaxed) {
                        info!("store_recovered");
                    }
                    return Ok(());
                }
                Err(e) if attempt == 0 => {
                    warn!(hash = %prop.line_hash, error = %e, "store_write_retrying");
                }
                Err(e) => {
                    self.metrics.record_store_failure();
                    self.enter_degraded(prop.clone());
                    return Err(StoreError::WriteFailed(e.to_string()));
                }
            }
        }
        unreachable!("upsert loop returns on success or second failure")
    }

    fn enter_degraded(&self, prop: CanonicalProp) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            error!("store_degraded_buffering_writes");
        }
        let mut buffer = self.buffer.lock();
        if buffer.len() >= WRITE_BUFFER_CAP {
            buffer.pop_front();
            self.metrics.record_store_shed();
        }
        buffer.push_back(prop);
        self.metrics.record_store_buffered(buffer.len());
    }

    /// Retry buffered writes; called from a background task while
    /// degraded. Stops at the first failure to avoid hammering a down
    /// database.
    pub async fn flush_buffer(&self) -> usize {
        let mut flushed = 0;
        loop {
            let next = { self.buffer.lock().pop_front() };
            let Some(prop) = next else { break };

            match self.write_row(&prop).await {
                Ok(()) => {
                    flushed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "store_flush_still_failing");
                    self.buffer.lock().push_front(prop);
                    return flushed;
                }
            }
        }

        if flushed > 0 {
            self.degraded.store(false, Ordering::Relaxed);
            info!(flushed, "store_buffer_flushed");
        }
        flushed
    }

    /// Most recent ingestion for cache warming.
    pub async fn recent(&self, sport: Option<Sport>, limit: i64) -> Result<Vec<CanonicalProp>> {
        let rows = match sport {
            Some(sport) => {
                sqlx::query(
                    "SELECT payload FROM canonical_props WHERE sport = $1 \
                     ORDER BY ingested_ts DESC LIMIT $2",
                )
                .bind(sport.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT payload FROM canonical_props ORDER BY ingested_ts DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut props = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            match serde_json::from_str::<CanonicalProp>(&payload) {
                Ok(prop) => props.push(prop),
                Err(e) => warn!(error = %e, "store_payload_undecodable"),
            }
        }
        Ok(props)
    }

    pub async fn get(&self, hash: &LineHash) -> Result<Option<CanonicalProp>> {
        let row = sqlx::query("SELECT payload FROM canonical_props WHERE line_hash = $1")
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| {
            let payload: String = r.get("payload");
            serde_json::from_str(&payload).ok()
        }))
    }
}
