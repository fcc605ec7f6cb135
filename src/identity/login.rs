//! Login state machine.
//!
//! `LoggedOut -> LoggingIn -> LoggedIn`, with invite acceptance as a second way into
//! `LoggedIn`. A failed login drops back to `LoggedOut` without producing a token.

use tracing::{info, warn};

use super::directory::UserDirectory;
use super::session::SessionToken;
use super::user::{User, UserSummary};
use crate::error::{AppError, AppResult};
use crate::tprintln;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    LoggedOut,
    LoggingIn { provider_id: String },
    LoggedIn { user: UserSummary },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub user: UserSummary,
    pub token: SessionToken,
}

#[derive(Debug)]
pub struct LoginMachine {
    state: LoginState,
}

impl Default for LoginMachine {
    fn default() -> Self {
        Self { state: LoginState::LoggedOut }
    }
}

impl LoginMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Machine for a request that already carries a valid session.
    pub fn signed_in(user: UserSummary) -> Self {
        Self { state: LoginState::LoggedIn { user } }
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    /// The identity provider reported success for `provider_id`.
    pub fn begin(&mut self, provider_id: &str) -> AppResult<()> {
        if self.state != LoginState::LoggedOut {
            return Err(invalid_transition(&self.state, "begin"));
        }
        let provider_id = provider_id.trim();
        if provider_id.is_empty() {
            return Err(AppError::user("provider_id_required", "identity provider did not return an account id"));
        }
        self.state = LoginState::LoggingIn { provider_id: provider_id.to_string() };
        Ok(())
    }

    /// Confirm the provider account against the directory and issue the session token.
    pub async fn complete(&mut self, directory: &dyn UserDirectory) -> AppResult<LoginOutcome> {
        let LoginState::LoggingIn { provider_id } = &self.state else {
            return Err(invalid_transition(&self.state, "complete"));
        };
        let provider_id = provider_id.clone();
        match confirm(directory, &provider_id).await {
            Ok(user) => {
                let outcome = LoginOutcome { token: user.id.clone(), user: user.summary() };
                info!(target: "auth", user_id = %user.id, role = %user.role, "login");
                self.state = LoginState::LoggedIn { user: outcome.user.clone() };
                Ok(outcome)
            }
            Err(e) => {
                warn!(target: "auth", provider_id = %provider_id, "login rejected: {}", e);
                self.state = LoginState::LoggedOut;
                Err(e)
            }
        }
    }

    /// Accept a pending invite and sign the new user in.
    pub async fn accept_invite(
        &mut self,
        directory: &dyn UserDirectory,
        invite_id: &str,
        provider_id: &str,
        picture: Option<&str>,
    ) -> AppResult<LoginOutcome> {
        if self.state != LoginState::LoggedOut {
            return Err(invalid_transition(&self.state, "accept_invite"));
        }
        if invite_id.trim().is_empty() || provider_id.trim().is_empty() {
            return Err(AppError::user("invite_fields_required", "invite id and provider id are required"));
        }
        let user = directory.accept_invite(invite_id, provider_id.trim(), picture).await?;
        directory.mark_login(&user.id).await?;
        info!(target: "auth", user_id = %user.id, role = %user.role, "invite accepted");
        tprintln!("auth.invite user={} provider={}", user.id, provider_id);
        self.state = LoginState::LoggedIn { user: user.clone() };
        Ok(LoginOutcome { token: user.id.clone(), user })
    }

    pub fn logout(&mut self) -> AppResult<UserSummary> {
        let LoginState::LoggedIn { user } = &self.state else {
            return Err(invalid_transition(&self.state, "logout"));
        };
        let user = user.clone();
        self.state = LoginState::LoggedOut;
        Ok(user)
    }
}

async fn confirm(directory: &dyn UserDirectory, provider_id: &str) -> AppResult<User> {
    let Some(user) = directory.lookup_by_provider_id(provider_id).await? else {
        return Err(AppError::not_found("user_not_found".to_string(), format!("no user for provider id {}", provider_id)));
    };
    if user.is_deleted() {
        return Err(AppError::deleted("user_deleted".to_string(), format!("user {} has been deleted", user.id)));
    }
    if !user.active {
        return Err(AppError::inactive("user_inactive".to_string(), format!("user {} is inactive", user.id)));
    }
    directory.mark_login(&user.id).await?;
    Ok(user)
}

fn invalid_transition(state: &LoginState, action: &str) -> AppError {
    let from = match state {
        LoginState::LoggedOut => "logged_out",
        LoginState::LoggingIn { .. } => "logging_in",
        LoginState::LoggedIn { .. } => "logged_in",
    };
    AppError::user("invalid_transition".to_string(), format!("cannot {} while {}", action, from))
}
