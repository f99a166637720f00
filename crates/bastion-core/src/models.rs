//! Domain models for the Bastion authorization core

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BastionError, Result};
use crate::ids::*;

static ALIAS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]{3,32}$").expect("alias pattern is valid"));

pub const MAX_DOMAIN_NAME_LEN: usize = 254;
pub const MAX_TAGS: usize = 64;

// =============================================================================
// Domain Models
// =============================================================================

/// A tenant boundary owning groups and things.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    pub alias: String,
    pub tags: BTreeSet<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: DomainStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frozen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Enabled,
    Disabled,
    Frozen,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Enabled => "enabled",
            DomainStatus::Disabled => "disabled",
            DomainStatus::Frozen => "frozen",
        }
    }

    /// enabled<->disabled is reversible; frozen is terminal.
    pub fn can_transition_to(&self, next: DomainStatus) -> bool {
        match (self, next) {
            (DomainStatus::Frozen, DomainStatus::Frozen) => true,
            (DomainStatus::Frozen, _) => false,
            _ => true,
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainStatus {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enabled" => Ok(DomainStatus::Enabled),
            "disabled" => Ok(DomainStatus::Disabled),
            "frozen" => Ok(DomainStatus::Frozen),
            other => Err(BastionError::invalid_argument(format!(
                "unknown domain status: {:?}",
                other
            ))),
        }
    }
}

/// Relations a user may hold directly on a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainRelation {
    Administrator,
    Editor,
    Viewer,
    Member,
}

impl DomainRelation {
    pub const ALL: [DomainRelation; 4] = [
        DomainRelation::Administrator,
        DomainRelation::Editor,
        DomainRelation::Viewer,
        DomainRelation::Member,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainRelation::Administrator => "administrator",
            DomainRelation::Editor => "editor",
            DomainRelation::Viewer => "viewer",
            DomainRelation::Member => "member",
        }
    }
}

impl fmt::Display for DomainRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainRelation {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self> {
        DomainRelation::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| {
                BastionError::invalid_argument(format!("unknown domain relation: {:?}", s))
            })
    }
}

/// Input for domain creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDomain {
    pub name: String,
    pub alias: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewDomain {
    pub fn validate(&self) -> Result<()> {
        validate_domain_name(&self.name)?;
        validate_alias(&self.alias)?;
        validate_tags(&self.tags)
    }
}

/// Partial update; the alias is immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl DomainPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.tags.is_none() && self.metadata.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(BastionError::invalid_argument("update contains no fields"));
        }
        if let Some(name) = &self.name {
            validate_domain_name(name)?;
        }
        if let Some(tags) = &self.tags {
            validate_tags(tags)?;
        }
        Ok(())
    }

    pub fn apply(&self, domain: &mut Domain) {
        if let Some(name) = &self.name {
            domain.name = name.clone();
        }
        if let Some(tags) = &self.tags {
            domain.tags = tags.clone();
        }
        if let Some(metadata) = &self.metadata {
            domain.metadata = metadata.clone();
        }
    }
}

pub fn validate_alias(alias: &str) -> Result<()> {
    if !ALIAS_REGEX.is_match(alias) {
        return Err(BastionError::invalid_argument(
            "alias must match [a-z0-9_-]{3,32}",
        ));
    }
    Ok(())
}

fn validate_domain_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BastionError::invalid_argument("name cannot be empty"));
    }
    if trimmed.chars().count() > MAX_DOMAIN_NAME_LEN {
        return Err(BastionError::invalid_argument(format!(
            "name exceeds {} characters",
            MAX_DOMAIN_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_tags(tags: &BTreeSet<String>) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(BastionError::invalid_argument(format!(
            "at most {} tags are allowed",
            MAX_TAGS
        )));
    }
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(BastionError::invalid_argument("tags cannot be empty"));
    }
    Ok(())
}

/// Listing filter for domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainFilter {
    #[serde(default)]
    pub status: Option<DomainStatus>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Restricts the listing to these ids when set.
    #[serde(skip)]
    pub ids: Option<Vec<DomainId>>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_domain_limit")]
    pub limit: u64,
}

pub const MAX_DOMAIN_PAGE: u64 = 100;

fn default_domain_limit() -> u64 {
    10
}

impl Default for DomainFilter {
    fn default() -> Self {
        Self {
            status: None,
            name: None,
            tag: None,
            ids: None,
            offset: 0,
            limit: default_domain_limit(),
        }
    }
}

impl DomainFilter {
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 || self.limit > MAX_DOMAIN_PAGE {
            return Err(BastionError::invalid_argument(format!(
                "limit must be between 1 and {}",
                MAX_DOMAIN_PAGE
            )));
        }
        Ok(())
    }

    pub fn matches(&self, domain: &Domain) -> bool {
        self.status.map_or(true, |s| s == domain.status)
            && self.name.as_ref().map_or(true, |n| {
                domain.name.to_lowercase().contains(&n.to_lowercase())
            })
            && self.tag.as_ref().map_or(true, |t| domain.tags.contains(t))
            && self.ids.as_ref().map_or(true, |ids| ids.contains(&domain.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub domains: Vec<Domain>,
}

// =============================================================================
// Invitation Models
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub invited_by: UserId,
    pub user_id: UserId,
    pub domain_id: DomainId,
    pub relation: DomainRelation,
    #[serde(skip_serializing)]
    pub token: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn is_pending(&self) -> bool {
        self.confirmed_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationState {
    Pending,
    Accepted,
    #[default]
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationFilter {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub invited_by: Option<UserId>,
    #[serde(default)]
    pub domain_id: Option<DomainId>,
    #[serde(default)]
    pub relation: Option<DomainRelation>,
    #[serde(default)]
    pub state: InvitationState,
    /// Visibility restriction applied on top of the other fields.
    #[serde(skip)]
    pub scope: Option<InvitationScope>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_invitation_limit")]
    pub limit: u64,
}

fn default_invitation_limit() -> u64 {
    10
}

pub const MAX_INVITATION_PAGE: u64 = 1000;

impl Default for InvitationFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            invited_by: None,
            domain_id: None,
            relation: None,
            state: InvitationState::All,
            scope: None,
            offset: 0,
            limit: default_invitation_limit(),
        }
    }
}

impl InvitationFilter {
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 || self.limit > MAX_INVITATION_PAGE {
            return Err(BastionError::invalid_argument(format!(
                "limit must be between 1 and {}",
                MAX_INVITATION_PAGE
            )));
        }
        Ok(())
    }

    pub fn matches(&self, inv: &Invitation) -> bool {
        let scope = self.scope.as_ref().map_or(true, |s| s.allows(inv));
        let state = match self.state {
            InvitationState::Pending => inv.confirmed_at.is_none(),
            InvitationState::Accepted => inv.confirmed_at.is_some(),
            InvitationState::All => true,
        };
        scope
            && state
            && self.user_id.map_or(true, |u| u == inv.user_id)
            && self.invited_by.map_or(true, |u| u == inv.invited_by)
            && self.domain_id.map_or(true, |d| d == inv.domain_id)
            && self.relation.map_or(true, |r| r == inv.relation)
    }
}

/// What a non-platform caller may see: invitations addressed to or sent by
/// them, plus everything in the domains they administer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationScope {
    pub user: UserId,
    pub domains: Vec<DomainId>,
}

impl InvitationScope {
    pub fn allows(&self, inv: &Invitation) -> bool {
        inv.user_id == self.user || inv.invited_by == self.user || self.domains.contains(&inv.domain_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub invitations: Vec<Invitation>,
}

// =============================================================================
// Token Nonce Models
// =============================================================================

/// Why a nonce was blacklisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceReason {
    Revoked,
    Rotated,
    ChainRevoked,
}

impl NonceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NonceReason::Revoked => "revoked",
            NonceReason::Rotated => "rotated",
            NonceReason::ChainRevoked => "chain_revoked",
        }
    }
}

impl FromStr for NonceReason {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "revoked" => Ok(NonceReason::Revoked),
            "rotated" => Ok(NonceReason::Rotated),
            "chain_revoked" => Ok(NonceReason::ChainRevoked),
            other => Err(BastionError::internal(format!(
                "unknown nonce reason in store: {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceEntry {
    pub nonce: String,
    pub reason: NonceReason,
    pub expires_at: DateTime<Utc>,
}
