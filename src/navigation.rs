//! Client-side route correction.
//!
//! A `RoleGate` belongs to one rendered view. It re-evaluates the role/route match
//! whenever the user directory pushes a new record for the signed-in user or the
//! route changes. On a mismatch it shows the loading overlay and asks its
//! `Navigator` to move to the user's home route. The `RedirectGuard` keeps a burst
//! of mismatch evaluations down to a single navigation until it resets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::identity::{match_route, RouteDecision, Subscription, User, UserDirectory};

pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// Single in-flight action flag with a timed reset.
#[derive(Debug, Clone)]
pub struct RedirectGuard {
    in_flight: Arc<AtomicBool>,
    reset_after: Duration,
}

impl RedirectGuard {
    pub fn new(reset_after: Duration) -> Self {
        Self { in_flight: Arc::new(AtomicBool::new(false)), reset_after }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Arm the guard. Returns `false` if it is already armed; otherwise the caller owns
    /// the action and the flag clears itself after `reset_after`.
    pub fn try_arm(&self) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let flag = self.in_flight.clone();
        let delay = self.reset_after;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    flag.store(false, Ordering::Release);
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    flag.store(false, Ordering::Release);
                });
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateView {
    /// Route matches the user's role; render the page.
    Render,
    /// Overlay shown while moving to `target`.
    Redirecting { target: String },
    /// No usable user any more; heading back to the public entry.
    SignedOut,
}

pub struct RoleGate<N: Navigator> {
    path: RwLock<String>,
    overlay: AtomicBool,
    guard: RedirectGuard,
    navigator: N,
}

impl<N: Navigator + 'static> RoleGate<N> {
    pub fn new(path: &str, navigator: N, reset_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            path: RwLock::new(path.to_string()),
            overlay: AtomicBool::new(false),
            guard: RedirectGuard::new(reset_after),
            navigator,
        })
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay.load(Ordering::Acquire)
    }

    pub fn path(&self) -> String {
        self.path.read().clone()
    }

    pub fn set_path(&self, path: &str) {
        *self.path.write() = path.to_string();
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn evaluate(&self, user: Option<&User>) -> GateView {
        let user = match user {
            Some(u) if u.is_usable() => u,
            _ => {
                self.overlay.store(true, Ordering::Release);
                self.redirect("/");
                return GateView::SignedOut;
            }
        };
        let path = self.path();
        match match_route(user.role, &path) {
            RouteDecision::Match => {
                self.overlay.store(false, Ordering::Release);
                GateView::Render
            }
            RouteDecision::Mismatch { correct_route } => {
                self.overlay.store(true, Ordering::Release);
                self.redirect(&correct_route);
                GateView::Redirecting { target: correct_route }
            }
        }
    }

    /// Look the user up once and evaluate, e.g. on first render.
    pub async fn refresh(&self, directory: &dyn UserDirectory, user_id: &str) -> GateView {
        match directory.lookup_by_id(user_id).await {
            Ok(user) => self.evaluate(user.as_ref()),
            Err(e) => {
                debug!(target: "navigation", "user refresh failed: {}", e);
                self.evaluate(None)
            }
        }
    }

    /// Re-evaluate on every directory push for `user_id` while the handle lives.
    pub fn attach(self: &Arc<Self>, directory: &dyn UserDirectory, user_id: &str) -> Subscription {
        let gate: Weak<Self> = Arc::downgrade(self);
        directory.subscribe(
            user_id,
            Arc::new(move |user: Option<&User>| {
                if let Some(gate) = gate.upgrade() {
                    gate.evaluate(user);
                }
            }),
        )
    }

    fn redirect(&self, target: &str) {
        if self.guard.try_arm() {
            debug!(target: "navigation", to = target, "redirect");
            self.navigator.navigate(target);
        } else {
            debug!(target: "navigation", to = target, "redirect already in flight");
        }
    }
}
