use crate::departure::Language;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub const DEFAULT_TTL_HOURS: i64 = 168;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache metadata error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("remote cache request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote cache rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Who an entry belongs to, so an operator's entries can be cleared together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheScope {
    pub operator_id: String,
    pub language: Language,
}

impl CacheScope {
    pub fn new(operator_id: impl Into<String>, language: Language) -> Self {
        Self {
            operator_id: operator_id.into(),
            language,
        }
    }
}

/// One tier of the announcement audio cache.
///
/// An entry is usable iff `now < expires_at`. Implementations drop stale
/// entries they come across on `get_at`.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &str;

    async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, audio: &[u8], scope: &CacheScope, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns the number of entries removed.
    async fn clear_for_operator(&self, operator_id: &str) -> Result<usize>;

    /// Returns the number of entries removed.
    async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_at(key, Utc::now()).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(Utc::now()).await
    }
}

pub fn default_ttl() -> Duration {
    Duration::hours(DEFAULT_TTL_HOURS)
}
