//! Nonce blacklist: revoked, rotated and chain-revoked token nonces.
//!
//! The repository is authoritative. Positive lookups are cached in process
//! until the entry expires; negative lookups always reach the repository.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use bastion_core::{NonceEntry, NonceReason, NonceRepository, Result};

/// How often expired entries are pruned.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Blacklist key for a whole refresh chain.
pub fn chain_key(chain: &str) -> String {
    format!("chain:{}", chain)
}

pub struct NonceBlacklist {
    repo: Arc<dyn NonceRepository>,
    cache: RwLock<HashMap<String, NonceEntry>>,
}

impl NonceBlacklist {
    pub fn new(repo: Arc<dyn NonceRepository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Preloads live entries into the cache.
    pub async fn warm(&self) -> Result<usize> {
        let now = Utc::now();
        let entries = self.repo.active(now).await?;
        let mut cache = self.cache.write().await;
        for entry in entries {
            cache.insert(entry.nonce.clone(), entry);
        }
        debug!(entries = cache.len(), "nonce blacklist warmed");
        Ok(cache.len())
    }

    /// Reason `nonce` is blocked, if it is.
    pub async fn lookup(&self, nonce: &str) -> Result<Option<NonceReason>> {
        let now = Utc::now();
        if let Some(entry) = self.cache.read().await.get(nonce) {
            if entry.expires_at > now {
                return Ok(Some(entry.reason));
            }
        }
        match self.repo.get(nonce).await? {
            Some(entry) if entry.expires_at > now => {
                let reason = entry.reason;
                self.cache.write().await.insert(entry.nonce.clone(), entry);
                Ok(Some(reason))
            }
            _ => Ok(None),
        }
    }

    /// Blocks `nonce` until `expires_at`, overwriting any earlier reason.
    pub async fn block(&self, nonce: &str, reason: NonceReason, expires_at: DateTime<Utc>) -> Result<()> {
        let entry = NonceEntry {
            nonce: nonce.to_string(),
            reason,
            expires_at,
        };
        self.repo.upsert(&entry).await?;
        self.cache.write().await.insert(entry.nonce.clone(), entry);
        Ok(())
    }

    /// Marks `nonce` rotated. Returns `false` when it was already blocked,
    /// meaning another caller used the token first.
    pub async fn rotate(&self, nonce: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let entry = NonceEntry {
            nonce: nonce.to_string(),
            reason: NonceReason::Rotated,
            expires_at,
        };
        let inserted = self.repo.insert_if_absent(&entry).await?;
        if inserted {
            self.cache.write().await.insert(entry.nonce.clone(), entry);
        }
        Ok(inserted)
    }

    /// Drops entries that expired before `now`.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = self.repo.prune(now).await?;
        self.cache.write().await.retain(|_, e| e.expires_at >= now);
        Ok(removed)
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Prunes every `interval` until `shutdown` fires.
    pub fn spawn_pruner(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("nonce pruner stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        match self.prune(Utc::now()).await {
                            Ok(0) => {}
                            Ok(removed) => debug!(removed, "pruned expired nonces"),
                            Err(e) => error!(error = %e, "nonce prune failed"),
                        }
                    }
                }
            }
        })
    }
}
