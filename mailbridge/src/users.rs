use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Everything an IMAP server needs to know about one logged-in account.
///
/// A binding outlives the server it is attached to: when the server is
/// rebuilt, every binding is attached again to the new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBinding {
    pub user_id: String,
    pub username: String,
    pub addresses: Vec<String>,
    pub show_all_mail: bool,
}

impl UserBinding {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            addresses: Vec::new(),
            show_all_mail: true,
        }
    }

    #[must_use]
    pub fn with_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }
}

/// The logged-in accounts, keyed by user id.
///
/// Iteration order is by user id so that re-attachment after a rebuild is
/// deterministic.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: BTreeMap<String, UserBinding>,
}

impl UserRegistry {
    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<&UserBinding> {
        self.users.get(user_id)
    }

    pub(crate) fn insert(&mut self, binding: UserBinding) -> Option<UserBinding> {
        self.users.insert(binding.user_id.clone(), binding)
    }

    pub(crate) fn remove(&mut self, user_id: &str) -> Option<UserBinding> {
        self.users.remove(user_id)
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = UserBinding> + '_ {
        std::mem::take(&mut self.users).into_values()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserBinding> {
        self.users.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut UserBinding> {
        self.users.values_mut()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// The one lock that orders account changes against service reconfiguration.
///
/// Login, logout and every guarded settings change take the write half, so
/// none of them can observe another half-done. It is not reentrant: a holder
/// must not try to take it again.
#[derive(Debug, Clone, Default)]
pub struct UsersLock(Arc<RwLock<UserRegistry>>);

impl UsersLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, UserRegistry> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, UserRegistry> {
        self.0.write().await
    }
}
