use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;

use bastion_core::{NonceEntry, NonceRepository, Result};

use super::MemoryStore;

#[async_trait]
impl NonceRepository for MemoryStore {
    async fn insert_if_absent(&self, entry: &NonceEntry) -> Result<bool> {
        match self.nonces.entry(entry.nonce.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                Ok(true)
            }
        }
    }

    async fn upsert(&self, entry: &NonceEntry) -> Result<()> {
        self.nonces
            .entry(entry.nonce.clone())
            .and_modify(|existing| {
                existing.reason = entry.reason;
                existing.expires_at = existing.expires_at.max(entry.expires_at);
            })
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn get(&self, nonce: &str) -> Result<Option<NonceEntry>> {
        Ok(self.nonces.get(nonce).map(|e| e.value().clone()))
    }

    async fn active(&self, now: DateTime<Utc>) -> Result<Vec<NonceEntry>> {
        Ok(self
            .nonces
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let count = self.nonces.len();
        self.nonces.retain(|_, e| e.expires_at >= before);
        Ok((count.saturating_sub(self.nonces.len())) as u64)
    }
}
