//! Identity provider adapter (authorization code flow with PKCE).
//!
//! The provider is the source of authentication truth under the provider
//! flow. This client turns its redirects and token endpoint into a
//! [`ProviderState`] stream that the identity bridge follows.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::{HeaderValue, header};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;
use zeroize::Zeroizing;

use crate::auth::identity::ProviderState;
use crate::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::models::claims::Claims;
use crate::services::api::BearerSource;
use crate::services::pkce;
use crate::storage::Storage;

/// Storage key of the provider's token cache.
pub const PROVIDER_CACHE_KEY: &str = "auth0-token-cache";

/// How long an authorization request may wait for its callback.
const PENDING_LOGIN_TTL: Duration = Duration::from_secs(10 * 60);
/// Outstanding authorization requests kept at most.
const MAX_PENDING_LOGINS: usize = 8;

/// Upstream identity connections offered on the login page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    Google,
    Microsoft,
    UsernamePassword,
}

impl Connection {
    pub fn as_str(self) -> &'static str {
        match self {
            Connection::Google => "google-oauth2",
            Connection::Microsoft => "windowslive",
            Connection::UsernamePassword => "Username-Password-Authentication",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub connection: Option<Connection>,
    pub login_hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogoutOptions {
    pub return_to: Option<Url>,
}

/// What started a pending login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginKind {
    /// The user picked a connection on the login page.
    Explicit,
    /// A signed-out navigation was sent to the provider.
    Navigation,
}

struct PendingLogin {
    state: String,
    code_verifier: Zeroizing<String>,
    created_at: Instant,
    kind: LoginKind,
    url: Url,
}

/// Token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// What survives a restart: the access token and the claims it was issued
/// with.
#[derive(Serialize, Deserialize)]
struct TokenCache {
    access_token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    claims: Claims,
}

/// Client of the identity provider tenant.
pub struct ProviderClient {
    config: ProviderConfig,
    base_url: Url,
    http: reqwest::Client,
    state: Arc<watch::Sender<ProviderState>>,
    pending: Mutex<Vec<PendingLogin>>,
    // `Authorization` header carrying the access token.
    bearer: Arc<RwLock<Option<HeaderValue>>>,
    storage: Arc<dyn Storage>,
    expiry: Mutex<Option<JoinHandle<()>>>,
}

impl ProviderClient {
    /// Creates a client in the loading state. Call
    /// [`restore`](Self::restore) to resolve it.
    pub fn new(config: ProviderConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let base_url = config.base_url()?;
        let (state, _) = watch::channel(ProviderState::loading());
        Ok(Self {
            config,
            base_url,
            http: reqwest::Client::new(),
            state: Arc::new(state),
            pending: Mutex::new(Vec::new()),
            bearer: Arc::new(RwLock::new(None)),
            storage,
            expiry: Mutex::new(None),
        })
    }

    /// Use a custom HTTP client (connection pool reuse or testing).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ProviderState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ProviderState {
        self.state.borrow().clone()
    }

    /// Resolves the initial state from the token cache of a previous run.
    ///
    /// An unreadable or expired cache is removed and the provider reports
    /// unauthenticated.
    pub fn restore(&self) {
        let cache = match self.storage.get(PROVIDER_CACHE_KEY) {
            Ok(Some(raw)) => match sonic_rs::from_str::<TokenCache>(&raw) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    tracing::warn!("❌ Discarding unreadable provider cache: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("❌ Provider cache unavailable: {}", e);
                None
            }
        };

        let usable = cache.filter(|c| c.expires_at.is_none_or(|at| at > Utc::now()));
        let Some(cache) = usable else {
            self.clear_tokens();
            self.state.send_replace(ProviderState::unauthenticated(None));
            return;
        };

        match self.install_tokens(&cache.access_token, cache.expires_at) {
            Ok(()) => {
                tracing::info!("🔑 Provider session restored");
                self.state.send_replace(ProviderState::authenticated(cache.claims));
            }
            Err(e) => {
                tracing::warn!("❌ Discarding unusable provider token: {}", e);
                self.clear_tokens();
                self.state.send_replace(ProviderState::unauthenticated(None));
            }
        }
    }

    /// Builds the provider's authorize URL and remembers the PKCE pair
    /// until the callback arrives.
    pub fn login_with_redirect(&self, options: &LoginOptions) -> Result<Url> {
        self.start_login(options, LoginKind::Explicit)
    }

    /// The authorize URL for a signed-out navigation.
    ///
    /// At most one navigation login is pending at a time and it is handed
    /// out again until it expires or completes, so background navigations
    /// never push out a login started from the login page.
    pub fn navigation_redirect(&self) -> Result<Url> {
        self.start_login(&LoginOptions::default(), LoginKind::Navigation)
    }

    fn start_login(&self, options: &LoginOptions, kind: LoginKind) -> Result<Url> {
        let mut pending = self.pending()?;
        pending.retain(|p| p.created_at.elapsed() < PENDING_LOGIN_TTL);
        if kind == LoginKind::Navigation {
            if let Some(existing) = pending.iter().find(|p| p.kind == LoginKind::Navigation) {
                return Ok(existing.url.clone());
            }
        }

        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);

        let mut url = self.endpoint("/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", self.config.redirect_uri.as_str())
                .append_pair("scope", &self.config.scope)
                .append_pair("state", &state)
                .append_pair("code_challenge", &code_challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(audience) = &self.config.audience {
                query.append_pair("audience", audience);
            }
            if let Some(connection) = options.connection {
                query.append_pair("connection", connection.as_str());
            }
            if let Some(hint) = options.login_hint.as_deref().filter(|h| !h.is_empty()) {
                query.append_pair("login_hint", hint);
            }
        }

        if pending.len() >= MAX_PENDING_LOGINS {
            // Oldest navigation login goes first, then the oldest overall.
            let evict = pending
                .iter()
                .position(|p| p.kind == LoginKind::Navigation)
                .unwrap_or(0);
            pending.remove(evict);
        }
        pending.push(PendingLogin {
            state,
            code_verifier: Zeroizing::new(code_verifier),
            created_at: Instant::now(),
            kind,
            url: url.clone(),
        });

        tracing::debug!("🔐 Redirecting to identity provider ({:?})", kind);
        Ok(url)
    }

    /// Finishes a login from the provider's callback parameters.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Authentication`] for an unknown or expired
    /// `state`, a refused code exchange or an unreachable provider. The
    /// failure is also published as the provider's `error`.
    pub async fn complete_login(&self, code: &str, state: &str) -> Result<Claims> {
        let verifier = self.take_pending(state)?.ok_or_else(|| {
            self.fail("Login request expired or was not started here");
            AppError::Authentication("Unknown or expired login state".to_string())
        })?;

        self.state.send_modify(|s| s.is_loading = true);

        match self.exchange(code, &verifier).await {
            Ok((tokens, claims)) => {
                let expires_at = tokens
                    .expires_in
                    .and_then(|secs| chrono::Duration::try_seconds(secs as i64))
                    .map(|ttl| Utc::now() + ttl);
                if let Err(e) = self.install_tokens(&tokens.access_token, expires_at) {
                    self.fail(&e.user_message());
                    return Err(AppError::Authentication(e.user_message()));
                }
                self.write_cache(&TokenCache {
                    access_token: tokens.access_token,
                    expires_at,
                    claims: claims.clone(),
                });
                tracing::info!("✅ Provider login completed");
                self.state.send_replace(ProviderState::authenticated(claims.clone()));
                Ok(claims)
            }
            Err(e) => {
                let message = e.user_message();
                tracing::warn!("❌ Provider login failed: {}", message);
                self.fail(&message);
                Err(AppError::Authentication(message))
            }
        }
    }

    /// Ends the provider session locally and returns the provider's logout
    /// URL for the browser to visit.
    pub fn logout(&self, options: &LogoutOptions) -> Result<Url> {
        let mut url = self.endpoint("/v2/logout")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            if let Some(return_to) = &options.return_to {
                query.append_pair("returnTo", return_to.as_str());
            }
        }

        self.clear_tokens();
        self.state.send_replace(ProviderState::unauthenticated(None));
        tracing::info!("👋 Provider session ended");
        Ok(url)
    }

    /// Reports a failed login: tokens are dropped and `message` is
    /// published as the provider error.
    pub fn fail(&self, message: &str) {
        self.clear_tokens();
        self.state
            .send_replace(ProviderState::unauthenticated(Some(message.to_string())));
    }

    async fn exchange(&self, code: &str, verifier: &str) -> Result<(TokenResponse, Claims)> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let response = self
            .http
            .post(self.endpoint("/oauth/token")?)
            .form(&params)
            .send()
            .await?;
        let tokens: TokenResponse = ensure_success(response, "token exchange").await?.json().await?;

        let response = self
            .http
            .get(self.endpoint("/userinfo")?)
            .bearer_auth(&tokens.access_token)
            .send()
            .await?;
        let claims: Claims = ensure_success(response, "userinfo request").await?.json().await?;

        Ok((tokens, claims))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Configuration(format!("Provider endpoint {}: {}", path, e)))
    }

    fn pending(&self) -> Result<std::sync::MutexGuard<'_, Vec<PendingLogin>>> {
        self.pending
            .lock()
            .map_err(|_| AppError::Internal("pending login lock poisoned".to_string()))
    }

    fn take_pending(&self, state: &str) -> Result<Option<Zeroizing<String>>> {
        let mut pending = self.pending()?;
        pending.retain(|p| p.created_at.elapsed() < PENDING_LOGIN_TTL);
        let position = pending
            .iter()
            .position(|p| bool::from(p.state.as_bytes().ct_eq(state.as_bytes())));
        Ok(position.map(|i| pending.swap_remove(i).code_verifier))
    }

    fn install_tokens(&self, access_token: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut header = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|_| AppError::Authentication("Provider issued an unusable token".to_string()))?;
        header.set_sensitive(true);

        *self
            .bearer
            .write()
            .map_err(|_| AppError::Internal("provider token lock poisoned".to_string()))? = Some(header);
        self.schedule_expiry(expires_at);
        Ok(())
    }

    /// Publishes unauthenticated once the access token runs out.
    fn schedule_expiry(&self, expires_at: Option<DateTime<Utc>>) {
        let task = expires_at.map(|at| {
            let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            let state = self.state.clone();
            let bearer = self.bearer.clone();
            let storage = self.storage.clone();
            tokio::spawn(async move {
                tokio::time::sleep(remaining).await;
                if let Ok(mut bearer) = bearer.write() {
                    *bearer = None;
                }
                if let Err(e) = storage.remove(PROVIDER_CACHE_KEY) {
                    tracing::warn!("❌ Failed to drop provider cache: {}", e);
                }
                tracing::info!("⏰ Provider access token expired");
                state.send_replace(ProviderState::unauthenticated(Some(
                    "Access token expired".to_string(),
                )));
            })
        });

        if let Ok(mut slot) = self.expiry.lock() {
            if let Some(previous) = slot.take() {
                previous.abort();
            }
            *slot = task;
        }
    }

    fn clear_tokens(&self) {
        if let Ok(mut slot) = self.expiry.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        if let Ok(mut bearer) = self.bearer.write() {
            *bearer = None;
        }
        if let Err(e) = self.storage.remove(PROVIDER_CACHE_KEY) {
            tracing::warn!("❌ Failed to drop provider cache: {}", e);
        }
    }

    fn write_cache(&self, cache: &TokenCache) {
        let result = sonic_rs::to_string(cache)
            .map_err(AppError::from)
            .and_then(|json| self.storage.set(PROVIDER_CACHE_KEY, &json));
        if let Err(e) = result {
            tracing::error!("❌ Failed to persist provider cache: {}", e);
        }
    }
}

impl BearerSource for ProviderClient {
    fn authorization_header(&self) -> Option<HeaderValue> {
        self.bearer.read().ok().and_then(|header| header.clone())
    }
}

impl Drop for ProviderClient {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.expiry.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Returns the response on success, or the provider's error details.
async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response.text().await.unwrap_or_default();
    let detail = if content_type.starts_with("application/json") {
        serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error_description")
                    .or_else(|| v.get("error"))
                    .and_then(|d| d.as_str())
                    .map(str::to_string)
            })
            .unwrap_or(body)
    } else {
        body
    };
    Err(AppError::Backend {
        status: Some(status.as_u16()),
        message: format!("Provider {} failed: {}", operation, detail),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn config() -> ProviderConfig {
        ProviderConfig {
            domain: "nextera.eu.auth0.com".to_string(),
            client_id: "client-123".to_string(),
            redirect_uri: "http://127.0.0.1:3000/callback".parse().unwrap(),
            audience: Some("https://api.nextera.com".to_string()),
            scope: "openid profile email".to_string(),
        }
    }

    fn client() -> ProviderClient {
        ProviderClient::new(config(), Arc::new(MemoryStorage::new())).unwrap()
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn authorize_url_carries_pkce_and_options() {
        let client = client();
        let url = client
            .login_with_redirect(&LoginOptions {
                connection: Some(Connection::Google),
                login_hint: Some("ana@nextera.com".to_string()),
            })
            .unwrap();

        assert_eq!(url.host_str(), Some("nextera.eu.auth0.com"));
        assert_eq!(url.path(), "/authorize");
        assert_eq!(query(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query(&url, "client_id").as_deref(), Some("client-123"));
        assert_eq!(query(&url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(query(&url, "connection").as_deref(), Some("google-oauth2"));
        assert_eq!(query(&url, "login_hint").as_deref(), Some("ana@nextera.com"));
        assert_eq!(query(&url, "audience").as_deref(), Some("https://api.nextera.com"));
        assert_eq!(query(&url, "scope").as_deref(), Some("openid profile email"));
        assert!(query(&url, "state").is_some());
    }

    #[tokio::test]
    async fn each_redirect_gets_a_fresh_state() {
        let client = client();
        let a = client.login_with_redirect(&LoginOptions::default()).unwrap();
        let b = client.login_with_redirect(&LoginOptions::default()).unwrap();
        assert_ne!(query(&a, "state"), query(&b, "state"));
        assert!(query(&a, "connection").is_none());
    }

    #[tokio::test]
    async fn navigations_share_one_pending_login() {
        let client = client();
        let first = client.navigation_redirect().unwrap();
        let again = client.navigation_redirect().unwrap();
        assert_eq!(first, again);
        assert_eq!(client.pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn navigations_never_evict_an_explicit_login() {
        let client = client();
        let explicit = client
            .login_with_redirect(&LoginOptions {
                connection: Some(Connection::Microsoft),
                login_hint: None,
            })
            .unwrap();
        let state = query(&explicit, "state").unwrap();

        for _ in 0..(MAX_PENDING_LOGINS * 3) {
            client.navigation_redirect().unwrap();
        }
        for _ in 0..(MAX_PENDING_LOGINS - 2) {
            client.login_with_redirect(&LoginOptions::default()).unwrap();
        }

        assert_eq!(client.pending().unwrap().len(), MAX_PENDING_LOGINS);

        // A full table makes room by dropping the navigation login
        client.login_with_redirect(&LoginOptions::default()).unwrap();
        assert_eq!(client.pending().unwrap().len(), MAX_PENDING_LOGINS);
        assert!(client.take_pending(&state).unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_state_is_rejected_and_published() {
        let client = client();
        client.login_with_redirect(&LoginOptions::default()).unwrap();

        let result = client.complete_login("code", "forged-state").await;
        assert!(matches!(result, Err(AppError::Authentication(_))));

        let state = client.snapshot();
        assert!(!state.is_authenticated);
        assert!(!state.is_loading);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn logout_url_and_state() {
        let client = client();
        let url = client
            .logout(&LogoutOptions {
                return_to: Some("http://127.0.0.1:3000/login".parse().unwrap()),
            })
            .unwrap();

        assert_eq!(url.path(), "/v2/logout");
        assert_eq!(query(&url, "client_id").as_deref(), Some("client-123"));
        assert_eq!(query(&url, "returnTo").as_deref(), Some("http://127.0.0.1:3000/login"));
        assert_eq!(client.snapshot(), ProviderState::unauthenticated(None));
        assert!(client.authorization_header().is_none());
    }

    #[tokio::test]
    async fn restore_resolves_loading() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = serde_json::json!({
            "access_token": "at-1",
            "expires_at": null,
            "claims": {"sub": "auth0|1"}
        });
        storage.set(PROVIDER_CACHE_KEY, &cache.to_string()).unwrap();

        let client = ProviderClient::new(config(), storage.clone()).unwrap();
        assert!(client.snapshot().is_loading);
        client.restore();

        let state = client.snapshot();
        assert!(state.is_authenticated);
        assert_eq!(state.user.unwrap().get_str("sub"), Some("auth0|1"));
        assert_eq!(
            client.authorization_header().unwrap().to_str().unwrap(),
            "Bearer at-1"
        );

        let empty = ProviderClient::new(config(), Arc::new(MemoryStorage::new())).unwrap();
        empty.restore();
        assert_eq!(empty.snapshot(), ProviderState::unauthenticated(None));
    }

    #[tokio::test]
    async fn expired_cache_is_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = serde_json::json!({
            "access_token": "at-1",
            "expires_at": "2001-01-01T00:00:00Z",
            "claims": {"sub": "auth0|1"}
        });
        storage.set(PROVIDER_CACHE_KEY, &cache.to_string()).unwrap();

        let client = ProviderClient::new(config(), storage.clone()).unwrap();
        client.restore();
        assert!(!client.snapshot().is_authenticated);
        assert!(storage.get(PROVIDER_CACHE_KEY).unwrap().is_none());
    }
}
