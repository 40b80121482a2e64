use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{AppError, Result};

/// Default idle timeout in minutes.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u64 = 30;
/// Longest accepted idle timeout in minutes (one year).
pub const MAX_SESSION_TIMEOUT_MINUTES: u64 = 365 * 24 * 60;
/// Default backend base URL.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
/// Default namespace prefix of the provider's custom claims.
pub const DEFAULT_CLAIM_NAMESPACE: &str = "https://nextera.com/";

/// Which login flow owns the session.
///
/// Only one flow is live per process; each persists under its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    /// Identity provider redirect flow (the provider holds the tokens).
    Provider,
    /// Email/password against the backend (the session holds a bearer token).
    Credentials,
}

impl AuthFlow {
    /// The storage key of this flow's persisted subset.
    pub fn storage_key(self) -> &'static str {
        match self {
            AuthFlow::Provider => "auth0-storage",
            AuthFlow::Credentials => "auth-storage",
        }
    }
}

/// Identity provider settings.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Provider tenant domain, e.g. `nextera.eu.auth0.com`.
    pub domain: String,
    /// OAuth2 client ID.
    pub client_id: String,
    /// Callback URI registered with the provider.
    pub redirect_uri: Url,
    /// API audience requested in the access token.
    pub audience: Option<String>,
    /// Requested scopes.
    pub scope: String,
}

impl ProviderConfig {
    /// Base URL of the provider tenant.
    pub fn base_url(&self) -> Result<Url> {
        let raw = if self.domain.starts_with("http://") || self.domain.starts_with("https://") {
            self.domain.clone()
        } else {
            format!("https://{}", self.domain)
        };
        Url::parse(&raw).map_err(|e| AppError::Configuration(format!("AUTH0_DOMAIN: {}", e)))
    }
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the app shell listens on.
    pub bind_addr: SocketAddr,
    /// Public origin of the app shell.
    pub app_origin: Url,
    /// Base URL of the backend REST API.
    pub api_base_url: Url,
    /// Inactivity window after which the session is ended.
    pub idle_timeout: Duration,
    /// The authoritative login flow.
    pub auth_flow: AuthFlow,
    /// Directory holding the durable client storage.
    pub storage_dir: PathBuf,
    /// Namespace prefix of custom claims (`<ns>role`, `<ns>skills`, ...).
    pub claim_namespace: String,
    /// Identity provider settings.
    pub provider: ProviderConfig,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Configuration`] if `AUTH0_DOMAIN` or
    /// `AUTH0_CLIENT_ID` is missing, or if any value fails to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Configuration(format!("{} must be set", key)))
        };

        let domain = required("AUTH0_DOMAIN")?;
        let client_id = required("AUTH0_CLIENT_ID")?;

        let bind_addr: SocketAddr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|e| AppError::Configuration(format!("Invalid BIND_ADDR: {}", e)))?;

        let app_origin = parse_url(
            "APP_ORIGIN",
            &lookup("APP_ORIGIN").unwrap_or_else(|| "http://127.0.0.1:3000".to_string()),
        )?;

        let redirect_uri = match lookup("AUTH0_REDIRECT_URI") {
            Some(raw) => parse_url("AUTH0_REDIRECT_URI", &raw)?,
            None => app_origin
                .join("/callback")
                .map_err(|e| AppError::Configuration(format!("APP_ORIGIN: {}", e)))?,
        };

        let api_base_url = parse_url(
            "API_BASE_URL",
            &lookup("API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        )?;

        let timeout_minutes: u64 = match lookup("SESSION_TIMEOUT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Configuration("Invalid SESSION_TIMEOUT".to_string()))?,
            None => DEFAULT_SESSION_TIMEOUT_MINUTES,
        };
        if !(1..=MAX_SESSION_TIMEOUT_MINUTES).contains(&timeout_minutes) {
            return Err(AppError::Configuration(format!(
                "SESSION_TIMEOUT must be between 1 and {} minutes",
                MAX_SESSION_TIMEOUT_MINUTES
            )));
        }
        let idle_timeout = timeout_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| AppError::Configuration("SESSION_TIMEOUT is too large".to_string()))?;

        let auth_flow = match lookup("AUTH_FLOW").as_deref().map(str::trim) {
            None | Some("") | Some("provider") => AuthFlow::Provider,
            Some("credentials") => AuthFlow::Credentials,
            Some(other) => {
                return Err(AppError::Configuration(format!(
                    "Invalid AUTH_FLOW '{}' (expected 'provider' or 'credentials')",
                    other
                )));
            }
        };

        Ok(Self {
            bind_addr,
            app_origin,
            api_base_url,
            idle_timeout,
            auth_flow,
            storage_dir: PathBuf::from(
                lookup("STORAGE_DIR").unwrap_or_else(|| ".nextera".to_string()),
            ),
            claim_namespace: lookup("CLAIM_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_CLAIM_NAMESPACE.to_string()),
            provider: ProviderConfig {
                domain,
                client_id,
                redirect_uri,
                audience: lookup("AUTH0_AUDIENCE").filter(|v| !v.is_empty()),
                scope: "openid profile email".to_string(),
            },
        })
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| AppError::Configuration(format!("{}: {}", key, e)))
}
