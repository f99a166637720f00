//! Subject lookup used before minting tokens.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use bastion_core::{Result, UserId};

/// Answers whether a user id is known to the owning users service.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn exists(&self, subject: &UserId) -> Result<bool>;
}

/// Treats every well-formed id as known. Used when user records live elsewhere
/// and the caller has already authenticated the subject.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenDirectory;

#[async_trait]
impl SubjectDirectory for OpenDirectory {
    async fn exists(&self, _subject: &UserId) -> Result<bool> {
        Ok(true)
    }
}

/// A fixed set of known users.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users: RwLock<HashSet<UserId>>,
}

impl StaticDirectory {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().collect()),
        }
    }

    pub async fn insert(&self, user: UserId) {
        self.users.write().await.insert(user);
    }
}

#[async_trait]
impl SubjectDirectory for StaticDirectory {
    async fn exists(&self, subject: &UserId) -> Result<bool> {
        Ok(self.users.read().await.contains(subject))
    }
}
