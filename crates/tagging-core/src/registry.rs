//! Group registry contract
//!
//! The registry is the system of record for membership. Keys are prefixed tag
//! ids (see [`crate::normalize::set_tag_prefix`]) and members are passed in
//! normalized form.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::RegistryError;

#[async_trait]
pub trait GroupRegistry: Send + Sync {
    async fn add_member(&self, key: &str, member: &str) -> Result<(), RegistryError>;

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), RegistryError>;

    /// Every group key `member` belongs to. Unknown members have no groups.
    async fn groups_of(&self, member: &str) -> Result<HashSet<String>, RegistryError>;
}

/// In-process registry with call counters and per-member rejection.
#[derive(Default)]
pub struct MemoryRegistry {
    groups: Mutex<HashMap<String, BTreeSet<String>>>,
    rejected: Mutex<HashSet<String>>,
    add_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call naming `member` (normalized form) fails with a 400.
    pub async fn reject_member(&self, member: impl Into<String>) {
        self.rejected.lock().await.insert(member.into());
    }

    pub async fn accept_all(&self) {
        self.rejected.lock().await.clear();
    }

    /// Seed membership directly, bypassing counters.
    pub async fn seed(&self, key: &str, member: &str) {
        self.groups
            .lock()
            .await
            .entry(member.to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub async fn contains(&self, key: &str, member: &str) -> bool {
        self.groups
            .lock()
            .await
            .get(member)
            .is_some_and(|keys| keys.contains(key))
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.add_calls() + self.remove_calls() + self.lookup_calls()
    }

    async fn check_rejected(&self, member: &str) -> Result<(), RegistryError> {
        if self.rejected.lock().await.contains(member) {
            return Err(RegistryError::Rejected {
                status: 400,
                message: format!("member {member} rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GroupRegistry for MemoryRegistry {
    async fn add_member(&self, key: &str, member: &str) -> Result<(), RegistryError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.check_rejected(member).await?;
        self.seed(key, member).await;
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), RegistryError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.check_rejected(member).await?;
        let mut groups = self.groups.lock().await;
        if let Some(keys) = groups.get_mut(member) {
            keys.remove(key);
            if keys.is_empty() {
                groups.remove(member);
            }
        }
        Ok(())
    }

    async fn groups_of(&self, member: &str) -> Result<HashSet<String>, RegistryError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.check_rejected(member).await?;
        Ok(self
            .groups
            .lock()
            .await
            .get(member)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }
}
