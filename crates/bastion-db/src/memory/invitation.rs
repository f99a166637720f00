use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;

use bastion_core::{
    BastionError, DomainId, DomainRelation, Invitation, InvitationFilter, InvitationPage,
    InvitationRepository, Result, UserId,
};

use super::MemoryStore;

fn not_found(user_id: UserId, domain_id: DomainId) -> BastionError {
    BastionError::not_found("invitation", format!("{}/{}", user_id, domain_id))
}

#[async_trait]
impl InvitationRepository for MemoryStore {
    async fn create(&self, invitation: &Invitation) -> Result<()> {
        match self.invitations.entry((invitation.user_id, invitation.domain_id)) {
            Entry::Occupied(_) => Err(BastionError::conflict("invitation already exists")),
            Entry::Vacant(slot) => {
                slot.insert(invitation.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, user_id: UserId, domain_id: DomainId) -> Result<Option<Invitation>> {
        Ok(self
            .invitations
            .get(&(user_id, domain_id))
            .map(|entry| entry.value().clone()))
    }

    async fn replace_token(
        &self,
        user_id: UserId,
        domain_id: DomainId,
        invited_by: UserId,
        relation: DomainRelation,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Invitation> {
        let mut entry = self
            .invitations
            .get_mut(&(user_id, domain_id))
            .filter(|inv| inv.is_pending())
            .ok_or_else(|| not_found(user_id, domain_id))?;
        entry.token = token.to_string();
        entry.invited_by = invited_by;
        entry.relation = relation;
        entry.updated_at = Some(at);
        Ok(entry.clone())
    }

    async fn confirm(&self, user_id: UserId, domain_id: DomainId, at: DateTime<Utc>) -> Result<()> {
        let mut entry = self
            .invitations
            .get_mut(&(user_id, domain_id))
            .filter(|inv| inv.is_pending())
            .ok_or_else(|| not_found(user_id, domain_id))?;
        entry.confirmed_at = Some(at);
        entry.updated_at = Some(at);
        Ok(())
    }

    async fn list(&self, filter: &InvitationFilter) -> Result<InvitationPage> {
        let mut matching: Vec<Invitation> = self
            .invitations
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
                .then_with(|| a.domain_id.cmp(&b.domain_id))
        });

        Ok(InvitationPage {
            total: matching.len() as u64,
            offset: filter.offset,
            limit: filter.limit,
            invitations: matching
                .into_iter()
                .skip(filter.offset as usize)
                .take(filter.limit as usize)
                .collect(),
        })
    }

    async fn delete(&self, user_id: UserId, domain_id: DomainId) -> Result<()> {
        self.invitations
            .remove(&(user_id, domain_id))
            .map(|_| ())
            .ok_or_else(|| not_found(user_id, domain_id))
    }

    async fn delete_for_domain(&self, domain_id: DomainId) -> Result<u64> {
        let before = self.invitations.len();
        self.invitations.retain(|(_, domain), _| *domain != domain_id);
        Ok((before - self.invitations.len()) as u64)
    }
}
