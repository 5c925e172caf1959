use super::tier::{CacheScope, CacheTier};
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHit {
    Local,
    Remote,
}

/// Local tier in front of the shared remote tier.
///
/// Tier errors never escape: a failed read is a miss, a failed write is dropped.
#[derive(Clone)]
pub struct CacheChain {
    local: Arc<dyn CacheTier>,
    remote: Arc<dyn CacheTier>,
    local_ttl: Duration,
    remote_ttl: Duration,
}

impl CacheChain {
    pub fn new(
        local: Arc<dyn CacheTier>,
        remote: Arc<dyn CacheTier>,
        local_ttl: Duration,
        remote_ttl: Duration,
    ) -> Self {
        Self {
            local,
            remote,
            local_ttl,
            remote_ttl,
        }
    }

    pub async fn lookup(&self, key: &str, scope: &CacheScope) -> Option<(Vec<u8>, CacheHit)> {
        if let Some(audio) = read(self.local.as_ref(), key).await {
            return Some((audio, CacheHit::Local));
        }

        let audio = read(self.remote.as_ref(), key).await?;
        write(self.local.as_ref(), key, &audio, scope, self.local_ttl).await;
        Some((audio, CacheHit::Remote))
    }

    pub async fn store(&self, key: &str, audio: &[u8], scope: &CacheScope) {
        tokio::join!(
            write(self.local.as_ref(), key, audio, scope, self.local_ttl),
            write(self.remote.as_ref(), key, audio, scope, self.remote_ttl),
        );
    }

    pub async fn clear_for_operator(&self, operator_id: &str) -> usize {
        let mut removed = 0;
        for tier in [&self.local, &self.remote] {
            match tier.clear_for_operator(operator_id).await {
                Ok(count) => {
                    tracing::info!(tier = tier.name(), operator = operator_id, count, "cleared cached announcements");
                    removed += count;
                }
                Err(err) => {
                    tracing::warn!(tier = tier.name(), operator = operator_id, error = %err, "cache clear failed");
                }
            }
        }
        removed
    }

    pub async fn purge_expired(&self) -> usize {
        let mut removed = 0;
        for tier in [&self.local, &self.remote] {
            match tier.purge_expired().await {
                Ok(count) => removed += count,
                Err(err) => {
                    tracing::warn!(tier = tier.name(), error = %err, "cache sweep failed");
                }
            }
        }
        removed
    }

    /// Starts the periodic expiry sweep. Call [`Sweeper::shutdown`] to stop it.
    pub fn spawn_sweeper(&self, interval: std::time::Duration) -> Sweeper {
        let chain = self.clone();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = chain.purge_expired().await;
                        if removed > 0 {
                            tracing::debug!(removed, "swept expired announcement audio");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        Sweeper {
            stop: stop_tx,
            handle,
        }
    }
}

pub struct Sweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.handle.await {
            tracing::debug!(error = %err, "cache sweeper ended abnormally");
        }
    }
}

async fn read(tier: &dyn CacheTier, key: &str) -> Option<Vec<u8>> {
    match tier.get(key).await {
        Ok(Some(audio)) => {
            tracing::debug!(tier = tier.name(), key, "cache hit");
            Some(audio)
        }
        Ok(None) => {
            tracing::debug!(tier = tier.name(), key, "cache miss");
            None
        }
        Err(err) => {
            tracing::warn!(tier = tier.name(), key, error = %err, "cache read failed; treating as miss");
            None
        }
    }
}

async fn write(tier: &dyn CacheTier, key: &str, audio: &[u8], scope: &CacheScope, ttl: Duration) {
    if let Err(err) = tier.set(key, audio, scope, ttl).await {
        tracing::warn!(tier = tier.name(), key, error = %err, "cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::remote::MemoryRemoteCache;
    use crate::departure::Language;

    fn chain() -> (CacheChain, Arc<MemoryRemoteCache>, Arc<MemoryRemoteCache>) {
        let local = Arc::new(MemoryRemoteCache::new());
        let remote = Arc::new(MemoryRemoteCache::new());
        let chain = CacheChain::new(
            local.clone(),
            remote.clone(),
            Duration::hours(168),
            Duration::hours(168),
        );
        (chain, local, remote)
    }

    #[tokio::test]
    async fn remote_hit_populates_local() {
        let (chain, local, remote) = chain();
        let scope = CacheScope::new("op", Language::English);
        remote.set("k", b"audio", &scope, Duration::hours(1)).await.unwrap();

        let (audio, hit) = chain.lookup("k", &scope).await.unwrap();
        assert_eq!(audio, b"audio");
        assert_eq!(hit, CacheHit::Remote);
        assert_eq!(local.get("k").await.unwrap(), Some(b"audio".to_vec()));

        let (_, hit) = chain.lookup("k", &scope).await.unwrap();
        assert_eq!(hit, CacheHit::Local);
    }

    #[tokio::test]
    async fn store_writes_both_tiers() {
        let (chain, local, remote) = chain();
        let scope = CacheScope::new("op", Language::Khmer);
        assert!(chain.lookup("k", &scope).await.is_none());
        chain.store("k", b"clip", &scope).await;
        assert_eq!(local.len(), 1);
        assert_eq!(remote.len(), 1);
        assert_eq!(chain.clear_for_operator("op").await, 2);
    }

    #[tokio::test]
    async fn sweeper_purges_expired_entries_in_both_tiers() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = Arc::new(
            crate::audio::cache::LocalCache::open(dir.path().join("audio"), 1024 * 1024, 100)
                .await
                .unwrap(),
        );
        let remote = Arc::new(MemoryRemoteCache::new());
        let chain = CacheChain::new(
            local.clone(),
            remote.clone(),
            Duration::milliseconds(1),
            Duration::milliseconds(1),
        );
        let scope = CacheScope::new("op", Language::Chinese);
        chain.store("k", b"clip", &scope).await;
        assert_eq!(remote.len(), 1);
        assert!(dir.path().join("audio").join("k.meta").exists());

        let sweeper = chain.spawn_sweeper(std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        sweeper.shutdown().await;

        assert!(remote.is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("audio")).unwrap().count(), 0);
    }
}
