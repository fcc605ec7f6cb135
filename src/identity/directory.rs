//! User Directory: the external reactive data service the session flow reads from.
//!
//! `UserDirectory` is the consumed contract. `MemoryDirectory` is an in-process
//! implementation with the same push semantics as the hosted backend: every
//! mutation of a user record is delivered to that user's subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::user::{Role, User, UserSummary};
use crate::error::{AppError, AppResult};

/// Callback invoked with the latest user record, or `None` once it no longer exists.
pub type Observer = Arc<dyn Fn(Option<&User>) + Send + Sync>;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup_by_id(&self, id: &str) -> AppResult<Option<User>>;

    async fn lookup_by_provider_id(&self, provider_id: &str) -> AppResult<Option<User>>;

    async fn mark_login(&self, id: &str) -> AppResult<()>;

    /// Bind a pending invite to an identity-provider account and activate it.
    /// Fails when the invite was already accepted or has been deleted.
    async fn accept_invite(&self, invite_id: &str, provider_id: &str, picture: Option<&str>) -> AppResult<UserSummary>;

    /// Register for pushes about one user. Dropping the handle unsubscribes.
    fn subscribe(&self, user_id: &str, observer: Observer) -> Subscription;
}

#[derive(Default)]
pub struct SubscriberSet {
    next_id: AtomicU64,
    entries: RwLock<HashMap<u64, (String, Observer)>>,
}

impl SubscriberSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(self: &Arc<Self>, user_id: &str, observer: Observer) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(id, (user_id.to_string(), observer));
        Subscription { id, set: Arc::downgrade(self) }
    }

    /// Deliver `user` to every observer of `user_id`. Observers run outside the lock
    /// so they may call back into the directory.
    pub fn notify(&self, user_id: &str, user: Option<&User>) {
        let targets: Vec<Observer> = self
            .entries
            .read()
            .values()
            .filter(|(uid, _)| uid == user_id)
            .map(|(_, obs)| obs.clone())
            .collect();
        debug!(target: "directory", user_id, observers = targets.len(), "notify");
        for obs in targets {
            obs(user);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Subscription {
    id: u64,
    set: Weak<SubscriberSet>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.entries.write().remove(&self.id);
        }
    }
}

/// In-memory directory with the admin mutations the dashboard performs.
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, User>>,
    subscribers: Arc<SubscriberSet>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self { users: RwLock::new(HashMap::new()), subscribers: SubscriberSet::new() }
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record as-is.
    pub fn insert(&self, user: User) {
        let id = user.id.clone();
        self.users.write().insert(id.clone(), user.clone());
        self.subscribers.notify(&id, Some(&user));
    }

    pub fn get(&self, id: &str) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    /// Create a pending invite. The returned record's id is the invite id.
    pub fn invite(&self, email: &str, name: Option<&str>, role: Role) -> AppResult<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AppError::user("email_required", "an invite needs an email address"));
        }
        let user = User {
            id: Uuid::new_v4().simple().to_string(),
            role,
            active: false,
            deleted_at: None,
            provider_id: None,
            email: email.to_string(),
            name: name.map(|s| s.to_string()),
            picture: None,
            created_at: Utc::now(),
            last_login: None,
        };
        self.users.write().insert(user.id.clone(), user.clone());
        Ok(user)
    }

    /// Ensure an active admin is linked to `provider_id`, creating one if needed.
    pub fn ensure_admin(&self, provider_id: &str, email: &str) -> User {
        let existing = {
            let mut map = self.users.write();
            let found = map
                .values_mut()
                .find(|u| u.provider_id.as_deref() == Some(provider_id) && !u.is_deleted());
            found.map(|u| {
                u.role = Role::Admin;
                u.active = true;
                u.clone()
            })
        };
        if let Some(u) = existing {
            self.subscribers.notify(&u.id, Some(&u));
            return u;
        }
        let user = User {
            id: Uuid::new_v4().simple().to_string(),
            role: Role::Admin,
            active: true,
            deleted_at: None,
            provider_id: Some(provider_id.to_string()),
            email: email.to_string(),
            name: None,
            picture: None,
            created_at: Utc::now(),
            last_login: None,
        };
        self.insert(user.clone());
        user
    }

    pub fn set_active(&self, id: &str, active: bool) -> AppResult<User> {
        self.update(id, |u| {
            u.active = active;
            Ok(())
        })
    }

    pub fn set_role(&self, id: &str, role: Role) -> AppResult<User> {
        self.update(id, |u| {
            u.role = role;
            Ok(())
        })
    }

    /// Mark the record deleted. Repeating the call keeps the first timestamp.
    pub fn soft_delete(&self, id: &str) -> AppResult<User> {
        self.update(id, |u| {
            if u.deleted_at.is_none() {
                u.deleted_at = Some(Utc::now());
            }
            Ok(())
        })
    }

    pub fn list(&self, include_deleted: bool) -> Vec<User> {
        let mut out: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| include_deleted || !u.is_deleted())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn update<F>(&self, id: &str, f: F) -> AppResult<User>
    where
        F: FnOnce(&mut User) -> AppResult<()>,
    {
        let updated = {
            let mut map = self.users.write();
            let Some(u) = map.get_mut(id) else {
                return Err(AppError::not_found("user_not_found".to_string(), format!("no user with id {}", id)));
            };
            f(u)?;
            u.clone()
        };
        self.subscribers.notify(id, Some(&updated));
        Ok(updated)
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn lookup_by_id(&self, id: &str) -> AppResult<Option<User>> {
        Ok(self.get(id))
    }

    async fn lookup_by_provider_id(&self, provider_id: &str) -> AppResult<Option<User>> {
        let map = self.users.read();
        // A provider id may have a deleted record and a live one; the live one wins.
        let mut fallback: Option<&User> = None;
        for u in map.values().filter(|u| u.provider_id.as_deref() == Some(provider_id)) {
            if !u.is_deleted() {
                return Ok(Some(u.clone()));
            }
            if fallback.is_none() {
                fallback = Some(u);
            }
        }
        Ok(fallback.cloned())
    }

    async fn mark_login(&self, id: &str) -> AppResult<()> {
        self.update(id, |u| {
            u.last_login = Some(Utc::now());
            Ok(())
        })
        .map(|_| ())
    }

    async fn accept_invite(&self, invite_id: &str, provider_id: &str, picture: Option<&str>) -> AppResult<UserSummary> {
        let accepted = {
            let mut map = self.users.write();
            let linked_elsewhere = map
                .values()
                .any(|u| u.id != invite_id && !u.is_deleted() && u.provider_id.as_deref() == Some(provider_id));
            let Some(u) = map.get_mut(invite_id) else {
                return Err(AppError::not_found("invite_not_found".to_string(), format!("no invite with id {}", invite_id)));
            };
            if u.is_deleted() {
                return Err(AppError::deleted("invite_deleted".to_string(), format!("invite {} has been deleted", invite_id)));
            }
            if !u.is_pending_invite() {
                return Err(AppError::already_accepted("invite_used".to_string(), format!("invite {} was already accepted", invite_id)));
            }
            if linked_elsewhere {
                return Err(AppError::already_accepted(
                    "provider_linked".to_string(),
                    "this identity is already linked to another account".to_string(),
                ));
            }
            u.provider_id = Some(provider_id.to_string());
            u.active = true;
            u.picture = picture.map(|p| p.to_string());
            u.clone()
        };
        self.subscribers.notify(invite_id, Some(&accepted));
        Ok(accepted.summary())
    }

    fn subscribe(&self, user_id: &str, observer: Observer) -> Subscription {
        self.subscribers.add(user_id, observer)
    }
}
