//! External cache tier (redis).
//!
//! Strictly optimistic: writes are best-effort, reads that fail count as
//! misses, and the pipeline keeps running with this tier entirely absent.
//! Failed invalidations are the one thing that must not be dropped
//! silently — they queue for retry so a recovered redis doesn't serve
//! entries the pipeline already killed.

use crate::models::{CanonicalProp, LineHash};
use crossbeam::queue::SegQueue;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on queued invalidation retries; beyond this the oldest
/// are shed (TTL will still reap them upstream).
const RETRY_QUEUE_CAP: usize = 10_000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("l2 unavailable: {0}")]
    Unavailable(String),
}

fn prop_key(hash: &LineHash) -> String {
    format!("prop:{}", hash.to_hex())
}

#[derive(Clone)]
pub struct L2Cache {
    conn: redis::aio::ConnectionManager,
    retry_queue: Arc<SegQueue<LineHash>>,
    retry_len: Arc<std::sync::atomic::AtomicUsize>,
}

impl L2Cache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        info!("connected_to_l2_cache");
        Ok(Self {
            conn,
            retry_queue: Arc::new(SegQueue::new()),
            retry_len: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        })
    }

    pub async fn get(&self, hash: &LineHash) -> Result<Option<CanonicalProp>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(prop_key(hash))
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(json) => match serde_json::from_str(&json) {
                Ok(prop) => Ok(Some(prop)),
                Err(e) => {
                    // A mangled entry is worse than a miss; drop it.
                    warn!(hash = %hash, error = %e, "l2_entry_undecodable");
                    let _: Result<(), _> = conn.del(prop_key(hash)).await;
                    Ok(None)
                }
            },
        }
    }

    pub async fn put(&self, prop: &CanonicalProp, ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(prop)
            .map_err(|e| CacheError::Unavailable(format!("encode: {e}")))?;
        let mut conn = self.conn.clone();
        conn.set_ex(prop_key(&prop.line_hash), json, ttl.as_secs().max(1))
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    /// Delete; on failure the hash joins the retry queue.
    pub async fn remove(&self, hashes: &[LineHash]) {
        if hashes.is_empty() {
            return;
        }
        let keys: Vec<String> = hashes.iter().map(prop_key).collect();
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> = conn.del(keys).await;
        if let Err(e) = result {
            warn!(count = hashes.len(), error = %e, "l2_invalidation_failed_queueing_retry");
            for hash in hashes {
                self.enqueue_retry(*hash);
            }
        }
    }

    fn enqueue_retry(&self, hash: LineHash) {
        use std::sync::atomic::Ordering;
        if self.retry_len.load(Ordering::Relaxed) >= RETRY_QUEUE_CAP {
            // Shed the oldest; its TTL still bounds staleness.
            if self.retry_queue.pop().is_some() {
                self.retry_len.fetch_sub(1, Ordering::Relaxed);
            }
        }
        self.retry_queue.push(hash);
        self.retry_len.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain queued invalidation retries. Called from a background task;
    /// anything that fails again goes back on the queue.
    pub async fn drain_retries(&self) -> usize {
        use std::sync::atomic::Ordering;
        let mut drained = 0;
        let mut batch = Vec::new();
        while let Some(hash) = self.retry_queue.pop() {
            self.retry_len.fetch_sub(1, Ordering::Relaxed);
            batch.push(hash);
            if batch.len() >= 256 {
                break;
            }
        }
        if batch.is_empty() {
            return 0;
        }

        let keys: Vec<String> = batch.iter().map(prop_key).collect();
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> = conn.del(keys).await;
        match result {
            Ok(()) => {
                drained = batch.len();
                debug!(count = drained, "l2_invalidation_retries_drained");
            }
            Err(e) => {
                warn!(error = %e, "l2_invalidation_retry_failed");
                for hash in batch {
                    self.enqueue_retry(hash);
                }
            }
        }
        drained
    }

    pub fn pending_retries(&self) -> usize {
        self.retry_len.load(std::sync::atomic::Ordering::Relaxed)
    }
}
