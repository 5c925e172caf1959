//! Shared (per-operator) cache tier.
//!
//! [`RestRemoteCache`] talks to the hosted row API that backs the departure
//! board; [`MemoryRemoteCache`] keeps rows in process and is used when no
//! remote URL is configured.

use super::tier::{CacheError, CacheScope, CacheTier, Result};
use crate::departure::Language;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRow {
    pub cache_key: String,
    pub operator_id: String,
    pub language: Language,
    pub audio_base64: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryRemoteCache {
    rows: Mutex<HashMap<String, CacheRow>>,
}

impl MemoryRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheRow>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheTier for MemoryRemoteCache {
    fn name(&self) -> &str {
        "remote-memory"
    }

    async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        let mut rows = self.lock();
        let Some(row) = rows.get(key) else {
            return Ok(None);
        };
        if now >= row.expires_at {
            rows.remove(key);
            return Ok(None);
        }
        decode_row(row).map(Some)
    }

    async fn set(&self, key: &str, audio: &[u8], scope: &CacheScope, ttl: Duration) -> Result<()> {
        let row = CacheRow {
            cache_key: key.to_string(),
            operator_id: scope.operator_id.clone(),
            language: scope.language,
            audio_base64: STANDARD.encode(audio),
            expires_at: Utc::now() + ttl,
        };
        self.lock().insert(key.to_string(), row);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn clear_for_operator(&self, operator_id: &str) -> Result<usize> {
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|_, row| row.operator_id != operator_id);
        Ok(before - rows.len())
    }

    async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|_, row| now < row.expires_at);
        Ok(before - rows.len())
    }
}

/// Remote tier over a PostgREST-style row API (`?column=eq.value` filters).
pub struct RestRemoteCache {
    client: reqwest::Client,
    table_url: String,
    api_key: Option<String>,
}

impl RestRemoteCache {
    pub fn new(base_url: &str, table: &str, api_key: Option<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            table_url: format!("{}/{}", base_url.trim_end_matches('/'), table),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, &self.table_url);
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key).bearer_auth(key);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CacheError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn delete_where(&self, filters: &[(&str, String)]) -> Result<usize> {
        let response = self
            .request(reqwest::Method::DELETE)
            .query(filters)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = Self::check(response).await?.json().await?;
        Ok(rows.len())
    }
}

#[async_trait]
impl CacheTier for RestRemoteCache {
    fn name(&self) -> &str {
        "remote"
    }

    async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&[("cache_key", format!("eq.{key}")), ("limit", "1".to_string())])
            .send()
            .await?;
        let rows: Vec<CacheRow> = Self::check(response).await?.json().await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        if now >= row.expires_at {
            if let Err(err) = self.delete(key).await {
                tracing::debug!(error = %err, key, "failed to drop expired remote row");
            }
            return Ok(None);
        }
        decode_row(&row).map(Some)
    }

    async fn set(&self, key: &str, audio: &[u8], scope: &CacheScope, ttl: Duration) -> Result<()> {
        let row = CacheRow {
            cache_key: key.to_string(),
            operator_id: scope.operator_id.clone(),
            language: scope.language,
            audio_base64: STANDARD.encode(audio),
            expires_at: Utc::now() + ttl,
        };
        let response = self
            .request(reqwest::Method::POST)
            .query(&[("on_conflict", "cache_key")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&row)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_where(&[("cache_key", format!("eq.{key}"))])
            .await
            .map(|_| ())
    }

    async fn clear_for_operator(&self, operator_id: &str) -> Result<usize> {
        self.delete_where(&[("operator_id", format!("eq.{operator_id}"))])
            .await
    }

    async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        self.delete_where(&[("expires_at", format!("lte.{}", now.to_rfc3339()))])
            .await
    }
}

fn decode_row(row: &CacheRow) -> Result<Vec<u8>> {
    STANDARD
        .decode(row.audio_base64.as_bytes())
        .map_err(|err| CacheError::Corrupt {
            key: row.cache_key.clone(),
            reason: err.to_string(),
        })
}
