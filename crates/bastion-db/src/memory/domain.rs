use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use bastion_core::{
    BastionError, Domain, DomainFilter, DomainId, DomainPage, DomainRepository, DomainStatus,
    Result, UserId,
};

use super::{MemoryStore, PolicyState};

fn alias_taken(state: &PolicyState, alias: &str, except: Option<DomainId>) -> bool {
    state.domains.values().any(|d| {
        d.alias == alias && d.status != DomainStatus::Frozen && Some(d.id) != except
    })
}

#[async_trait]
impl DomainRepository for MemoryStore {
    #[instrument(skip(self, domain), fields(alias = %domain.alias))]
    async fn create(&self, domain: &Domain) -> Result<Domain> {
        let mut state = self.state.write().await;
        if state.domains.contains_key(&domain.id) {
            return Err(BastionError::conflict("domain id already exists"));
        }
        if alias_taken(&state, &domain.alias, None) {
            return Err(BastionError::conflict("domain alias already in use"));
        }
        state.domains.insert(domain.id, domain.clone());
        Ok(domain.clone())
    }

    async fn get_by_id(&self, id: DomainId) -> Result<Option<Domain>> {
        Ok(self.state.read().await.domains.get(&id).cloned())
    }

    async fn update(&self, domain: &Domain) -> Result<Domain> {
        let mut state = self.state.write().await;
        let stored = state
            .domains
            .get_mut(&domain.id)
            .ok_or_else(|| BastionError::not_found("domain", domain.id.to_string()))?;
        stored.name = domain.name.clone();
        stored.tags = domain.tags.clone();
        stored.metadata = domain.metadata.clone();
        stored.updated_by = domain.updated_by;
        stored.updated_at = domain.updated_at;
        Ok(stored.clone())
    }

    async fn update_status(
        &self,
        id: DomainId,
        status: DomainStatus,
        updated_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Domain> {
        let mut state = self.state.write().await;
        let alias = state
            .domains
            .get(&id)
            .map(|d| d.alias.clone())
            .ok_or_else(|| BastionError::not_found("domain", id.to_string()))?;
        if status != DomainStatus::Frozen && alias_taken(&state, &alias, Some(id)) {
            return Err(BastionError::conflict("domain alias already in use"));
        }
        let stored = state
            .domains
            .get_mut(&id)
            .ok_or_else(|| BastionError::not_found("domain", id.to_string()))?;
        stored.status = status;
        stored.updated_by = Some(updated_by);
        stored.updated_at = Some(at);
        if status == DomainStatus::Frozen && stored.frozen_at.is_none() {
            stored.frozen_at = Some(at);
        }
        Ok(stored.clone())
    }

    async fn list(&self, filter: &DomainFilter) -> Result<DomainPage> {
        let state = self.state.read().await;
        let mut matching: Vec<&Domain> = state.domains.values().filter(|d| filter.matches(d)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(DomainPage {
            total: matching.len() as u64,
            offset: filter.offset,
            limit: filter.limit,
            domains: matching
                .into_iter()
                .skip(filter.offset as usize)
                .take(filter.limit as usize)
                .cloned()
                .collect(),
        })
    }

    async fn delete(&self, id: DomainId) -> Result<()> {
        self.state.write().await.domains.remove(&id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge_frozen(&self, before: DateTime<Utc>) -> Result<Vec<DomainId>> {
        let mut state = self.state.write().await;
        let expired: Vec<DomainId> = state
            .domains
            .values()
            .filter(|d| d.status == DomainStatus::Frozen && d.frozen_at.is_some_and(|at| at < before))
            .map(|d| d.id)
            .collect();
        for id in &expired {
            state.domains.remove(id);
        }
        drop(state);
        for id in &expired {
            self.invitations.retain(|(_, domain), _| domain != id);
        }
        Ok(expired)
    }
}
