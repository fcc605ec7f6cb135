use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Closed set of dashboard roles. The lowercase name doubles as the first path
/// segment of the role's dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Requester,
    Packer,
    Shipper,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Requester, Role::Packer, Role::Shipper];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Requester => "requester",
            Role::Packer => "packer",
            Role::Shipper => "shipper",
        }
    }

    /// Home route for the role, e.g. `/packer`.
    pub fn route(&self) -> String {
        format!("/{}", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AppError::user("unknown_role".to_string(), format!("unknown role '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub role: Role,
    pub active: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Identity-provider account id; `None` until the invite is accepted.
    #[serde(default)]
    pub provider_id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_pending_invite(&self) -> bool {
        self.provider_id.is_none()
    }

    /// Accepted, active and not soft-deleted. Only such a record may back a session.
    pub fn is_usable(&self) -> bool {
        self.active && !self.is_deleted() && !self.is_pending_invite()
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary { id: self.id.clone(), role: self.role }
    }
}

/// The `{id, role}` pair a session resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub role: Role,
}
