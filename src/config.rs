//! Runtime configuration read from `FULFILLMENT_*` environment variables.
//! Every value has a default; anything unset or unparsable is logged and replaced.

use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub http_port: u16,
    pub environment: Environment,
    /// How long the client redirect guard stays armed after a navigation.
    pub redirect_reset: Duration,
    pub audit_capacity: usize,
    /// Provider id that is provisioned as an active admin on startup.
    pub bootstrap_admin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            http_port: 3000,
            environment: Environment::Production,
            redirect_reset: Duration::from_millis(300),
            audit_capacity: 1000,
            bootstrap_admin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Config::default();
        Self {
            bind: env::var("FULFILLMENT_BIND").unwrap_or(d.bind),
            http_port: try_load("FULFILLMENT_HTTP_PORT", d.http_port),
            environment: try_load("FULFILLMENT_ENV", d.environment),
            redirect_reset: Duration::from_millis(try_load("FULFILLMENT_REDIRECT_RESET_MS", 300u64)),
            audit_capacity: try_load("FULFILLMENT_AUDIT_CAPACITY", d.audit_capacity),
            bootstrap_admin: env::var("FULFILLMENT_BOOTSTRAP_ADMIN").ok().filter(|s| !s.trim().is_empty()),
        }
    }

    /// `Secure` is dropped from the session cookie only for local development over plain http.
    pub fn secure_cookies(&self) -> bool {
        self.environment != Environment::Development
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "startup", "Invalid {key} value '{raw}': {e}; using default {default:?}");
                default
            }
        },
        Err(_) => {
            info!(target: "startup", "{key} not set, using default: {default:?}");
            default
        }
    }
}
