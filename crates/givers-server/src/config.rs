//! Server Configuration
//!
//! Read once at startup from the environment (after `.env` is loaded).

use givers_payments::StripeConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:8080";
const DEFAULT_MAX_CONNECTIONS: usize = 10;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,

    /// Base URL of the frontend, used for checkout and onboarding redirects
    pub frontend_url: String,

    /// Externally reachable base URL of this server (onboarding callback)
    pub public_url: String,

    /// Absent means the in-memory store
    pub database_url: Option<String>,

    pub database_max_connections: usize,

    /// HS256 secret shared with the identity layer; empty rejects every session
    pub session_secret: String,

    pub payments: StripeConfig,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let database_max_connections = var("DATABASE_MAX_CONNECTIONS")
            .and_then(|v| match v.parse::<usize>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    tracing::warn!(value = %v, "Ignoring invalid DATABASE_MAX_CONNECTIONS");
                    None
                }
            })
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            frontend_url: var("FRONTEND_URL")
                .unwrap_or_else(|| DEFAULT_FRONTEND_URL.into())
                .trim_end_matches('/')
                .to_string(),
            public_url: var("PUBLIC_URL")
                .unwrap_or_else(|| DEFAULT_PUBLIC_URL.into())
                .trim_end_matches('/')
                .to_string(),
            database_url: var("DATABASE_URL"),
            database_max_connections,
            session_secret: var("SESSION_SECRET").unwrap_or_default(),
            payments: StripeConfig::from_env(),
        }
    }

    /// Where the provider sends owners back after onboarding
    pub fn connect_redirect_uri(&self) -> String {
        format!("{}/payments/connect/callback", self.public_url)
    }
}
