use super::tier::{CacheError, CacheScope, CacheTier, Result};
use crate::departure::Language;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use filetime::{set_file_mtime, FileTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const AUDIO_EXT: &str = "audio";
const META_EXT: &str = "meta";

/// Durable on-disk audio cache. Each entry is an `<key>.audio` blob plus a
/// `<key>.meta` JSON sidecar carrying its scope and expiry.
#[derive(Debug, Clone)]
pub struct LocalCache {
    pub dir: PathBuf,
    pub max_size_bytes: u64,
    pub max_entries: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    operator_id: String,
    language: Language,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    size: usize,
}

impl LocalCache {
    pub async fn open(dir: PathBuf, max_size_bytes: u64, max_entries: usize) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            max_size_bytes,
            max_entries,
        })
    }

    fn audio_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{AUDIO_EXT}"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{META_EXT}"))
    }

    async fn read_meta(&self, path: &Path) -> Result<Option<EntryMeta>> {
        match fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_entry(&self, key: &str) -> Result<()> {
        for path in [self.audio_path(key), self.meta_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Keys of every entry that has a metadata sidecar.
    async fn meta_entries(&self) -> Result<Vec<(String, EntryMeta)>> {
        let mut out = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match self.read_meta(&path).await {
                Ok(Some(meta)) => out.push((key, meta)),
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(error = %err, key = %key, "unreadable cache metadata; removing");
                    self.remove_entry(&key).await?;
                }
            }
        }
        Ok(out)
    }

    /// Evicts least recently used entries until size and count limits hold.
    async fn prune(&self) -> Result<()> {
        let mut entries = Vec::new();
        let mut total_size = 0u64;

        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(AUDIO_EXT) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let meta = entry.metadata().await?;
            let size = meta.len();
            total_size += size;
            let mtime = FileTime::from_last_modification_time(&meta);
            entries.push((key, mtime, size));
        }

        // Oldest first
        entries.sort_by_key(|(_, mtime, _)| (mtime.unix_seconds(), mtime.nanoseconds()));

        let mut current_entries = entries.len();
        let mut current_size = total_size;

        for (key, _mtime, size) in entries {
            if current_size <= self.max_size_bytes && current_entries <= self.max_entries {
                break;
            }
            self.remove_entry(&key).await?;
            current_size = current_size.saturating_sub(size);
            current_entries = current_entries.saturating_sub(1);
        }

        Ok(())
    }
}

#[async_trait]
impl CacheTier for LocalCache {
    fn name(&self) -> &str {
        "local"
    }

    async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        let Some(meta) = self.read_meta(&self.meta_path(key)).await? else {
            return Ok(None);
        };

        if now >= meta.expires_at {
            tracing::debug!(key, expires_at = %meta.expires_at, "local cache entry expired");
            self.remove_entry(key).await?;
            return Ok(None);
        }

        let path = self.audio_path(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.remove_entry(key).await?;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        if data.len() != meta.size {
            self.remove_entry(key).await?;
            return Err(CacheError::Corrupt {
                key: key.to_string(),
                reason: format!("expected {} bytes, found {}", meta.size, data.len()),
            });
        }

        let _ = set_file_mtime(&path, FileTime::now());
        Ok(Some(data))
    }

    async fn set(&self, key: &str, audio: &[u8], scope: &CacheScope, ttl: Duration) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }

        if audio.len() as u64 > self.max_size_bytes {
            tracing::debug!(key, size = audio.len(), "clip larger than local cache; not stored");
            return Ok(());
        }

        fs::create_dir_all(&self.dir).await?;
        let now = Utc::now();
        let meta = EntryMeta {
            operator_id: scope.operator_id.clone(),
            language: scope.language,
            created_at: now,
            expires_at: now + ttl,
            size: audio.len(),
        };

        self.write_atomic(&self.audio_path(key), audio).await?;
        self.write_atomic(&self.meta_path(key), &serde_json::to_vec(&meta)?)
            .await?;

        self.prune().await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.remove_entry(key).await
    }

    async fn clear_for_operator(&self, operator_id: &str) -> Result<usize> {
        let mut removed = 0;
        for (key, meta) in self.meta_entries().await? {
            if meta.operator_id == operator_id {
                self.remove_entry(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (key, meta) in self.meta_entries().await? {
            if now >= meta.expires_at {
                self.remove_entry(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn cache(dir: &TempDir) -> LocalCache {
        LocalCache::open(dir.path().join("audio"), 1024 * 1024, 100)
            .await
            .unwrap()
    }

    fn scope(operator: &str) -> CacheScope {
        CacheScope::new(operator, Language::English)
    }

    #[tokio::test]
    async fn round_trip_then_expiry() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        cache
            .set("k1", b"mp3-bytes", &scope("op"), Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(cache.get("k1").await.unwrap(), Some(b"mp3-bytes".to_vec()));

        let later = Utc::now() + Duration::hours(2);
        assert_eq!(cache.get_at("k1", later).await.unwrap(), None);
        assert!(!cache.audio_path("k1").exists());
        assert!(!cache.meta_path("k1").exists());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = cache(&dir).await;
            cache
                .set("k1", b"abc", &scope("op"), Duration::hours(1))
                .await
                .unwrap();
        }
        let reopened = cache(&dir).await;
        assert_eq!(reopened.get("k1").await.unwrap(), Some(b"abc".to_vec()));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        cache.set("k", b"one", &scope("op"), Duration::hours(1)).await.unwrap();
        cache.set("k", b"two!", &scope("op"), Duration::hours(1)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"two!".to_vec()));
    }

    #[tokio::test]
    async fn clear_for_operator_only_touches_that_operator() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        cache.set("a", b"1", &scope("op-a"), Duration::hours(1)).await.unwrap();
        cache.set("b", b"2", &scope("op-a"), Duration::hours(1)).await.unwrap();
        cache.set("c", b"3", &scope("op-c"), Duration::hours(1)).await.unwrap();

        assert_eq!(cache.clear_for_operator("op-a").await.unwrap(), 2);
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("c").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        cache.set("short", b"1", &scope("op"), Duration::minutes(5)).await.unwrap();
        cache.set("long", b"2", &scope("op"), Duration::hours(5)).await.unwrap();

        let later = Utc::now() + Duration::hours(1);
        assert_eq!(cache.purge_expired_at(later).await.unwrap(), 1);
        assert_eq!(cache.get("long").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn prunes_past_entry_limit() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::open(dir.path().to_path_buf(), 1024, 2).await.unwrap();
        for key in ["a", "b", "c"] {
            cache.set(key, b"x", &scope("op"), Duration::hours(1)).await.unwrap();
        }
        let mut remaining = 0;
        for key in ["a", "b", "c"] {
            if cache.get(key).await.unwrap().is_some() {
                remaining += 1;
            }
        }
        assert_eq!(remaining, 2);
    }

    #[tokio::test]
    async fn missing_key_is_absent() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        assert_eq!(cache.get("nope").await.unwrap(), None);
        cache.delete("nope").await.unwrap();
    }
}
