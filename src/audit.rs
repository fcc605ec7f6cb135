//! Bounded in-memory audit trail of authentication events.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    LoginFailed,
    InviteAccepted,
    InviteFailed,
    Logout,
    SessionCleared,
    UserInvited,
    UserUpdated,
    UserDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    /// User the event is about, when known.
    pub user_id: Option<String>,
    pub detail: String,
}

pub struct AuditLog {
    capacity: usize,
    entries: RwLock<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))) }
    }

    pub fn record(&self, action: AuditAction, user_id: Option<&str>, detail: impl Into<String>) {
        let entry = AuditEntry {
            at: Utc::now(),
            action,
            user_id: user_id.map(|s| s.to_string()),
            detail: detail.into(),
        };
        info!(target: "audit", action = ?entry.action, user_id = ?entry.user_id, "{}", entry.detail);
        let mut q = self.entries.write();
        if q.len() == self.capacity {
            q.pop_front();
        }
        q.push_back(entry);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
