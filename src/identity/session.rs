use std::sync::Arc;

use tracing::{debug, warn};

use super::directory::UserDirectory;
use super::user::User;
use crate::tprintln;

/// Opaque session token; the id of a user record.
pub type SessionToken = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Authenticated(User),
    Unauthenticated,
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(u) => Some(u),
            SessionState::Unauthenticated => None,
        }
    }
}

/// Outcome of resolving one request's token. `clear_cookie` tells the caller to
/// expire the cookie so the next request fails without a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub state: SessionState,
    pub clear_cookie: bool,
}

impl Resolution {
    fn unauthenticated(clear_cookie: bool) -> Self {
        Self { state: SessionState::Unauthenticated, clear_cookie }
    }
}

#[derive(Clone)]
pub struct SessionResolver {
    directory: Arc<dyn UserDirectory>,
}

impl SessionResolver {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Only an active, non-deleted, accepted user record authenticates. The status is
    /// re-read on every call so a deactivation takes effect on the next request.
    pub async fn resolve(&self, token: Option<&str>) -> Resolution {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Resolution::unauthenticated(false);
        };
        match self.directory.lookup_by_id(token).await {
            Ok(Some(user)) => {
                if !user.is_usable() {
                    debug!(target: "auth", user_id = %user.id, active = user.active, deleted = user.is_deleted(), pending = user.is_pending_invite(), "session user no longer usable");
                    return Resolution::unauthenticated(true);
                }
                tprintln!("session.resolve user={} role={}", user.id, user.role);
                Resolution { state: SessionState::Authenticated(user), clear_cookie: false }
            }
            Ok(None) => {
                debug!(target: "auth", "session token does not match any user");
                Resolution::unauthenticated(true)
            }
            Err(e) => {
                warn!(target: "auth", "session lookup failed, clearing session: {}", e);
                Resolution::unauthenticated(true)
            }
        }
    }
}
