//! The authoritative session store.
//!
//! All state lives in one `watch` channel; subscribers (the route guard, the
//! session lifecycle, the UI) observe every change. Mutations triggered by
//! asynchronous completions are tagged with a generation and dropped when a
//! newer operation has started since, so a logout is never undone by a
//! stale `check_auth` or `login` result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::auth::token_store::{self, TokenStore};
use crate::config::AuthFlow;
use crate::error::{AppError, Result};
use crate::models::session::{PersistedSession, Session};
use crate::models::user::{ProfileUpdate, User};
use crate::services::api::AuthBackend;
use crate::storage::Storage;
use crate::validation::auth::{
    Credentials, PasswordReset, PasswordResetRequest, validate_credentials, validate_password_reset,
    validate_profile_update, validate_reset_request,
};

pub struct AuthStore<B> {
    state: watch::Sender<Session>,
    backend: B,
    tokens: TokenStore,
    storage: Arc<dyn Storage>,
    flow: AuthFlow,
    generation: AtomicU64,
    // Bumped whenever a user is signed in, or replaced by another user.
    sign_ins: AtomicU64,
}

impl<B: AuthBackend> AuthStore<B> {
    /// Creates a signed-out store. Call [`rehydrate`](Self::rehydrate) to
    /// restore the previous run's session.
    pub fn new(backend: B, tokens: TokenStore, storage: Arc<dyn Storage>, flow: AuthFlow) -> Self {
        let (state, _) = watch::channel(Session::signed_out());
        Self {
            state,
            backend,
            tokens,
            storage,
            flow,
            generation: AtomicU64::new(0),
            sign_ins: AtomicU64::new(0),
        }
    }

    pub fn flow(&self) -> AuthFlow {
        self.flow
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// A receiver notified on every session change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// A copy of the current session.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// How many times a user has been signed in since startup.
    ///
    /// Changes even when a sign-out and a sign-in land between two reads
    /// of the session channel.
    pub fn sign_ins(&self) -> u64 {
        self.sign_ins.load(Ordering::SeqCst)
    }

    /// Restores the persisted subset written by a previous run.
    ///
    /// Reads this flow's record only. A record that cannot be decoded is
    /// removed and the session starts signed out.
    pub fn rehydrate(&self) -> Result<()> {
        let key = self.flow.storage_key();
        let Some(raw) = self.storage.get(key)? else {
            tracing::debug!("💾 No persisted session under {}", key);
            return Ok(());
        };

        let persisted = match sonic_rs::from_str::<PersistedSession>(&raw) {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!("❌ Discarding unreadable persisted session: {}", e);
                self.storage.remove(key)?;
                return Ok(());
            }
        };

        let mut session = Session::from_persisted(persisted);
        match self.flow {
            AuthFlow::Credentials => {
                if let Some(token) = session.token() {
                    self.tokens.set(Some(token))?;
                }
            }
            // Provider tokens never live in the session.
            AuthFlow::Provider => session.set_token(None),
        }

        let authenticated = session.is_authenticated();
        if authenticated {
            self.sign_ins.fetch_add(1, Ordering::SeqCst);
        }
        self.state.send_replace(session);
        tracing::info!("✅ Session rehydrated (authenticated: {})", authenticated);
        Ok(())
    }

    /// Signs in with email and password.
    ///
    /// On success the session holds the user and token and the token store
    /// mirrors the token. On failure only `is_loading` changes.
    ///
    /// # Errors
    ///
    /// [`AppError::Validation`] for malformed credentials,
    /// [`AppError::Authentication`] for everything the backend or the
    /// network rejects.
    pub async fn login(&self, credentials: &Credentials) -> Result<User> {
        if self.flow == AuthFlow::Provider {
            return Err(AppError::Authentication(
                "Password sign-in is disabled; continue with the identity provider".to_string(),
            ));
        }
        validate_credentials(credentials)?;

        let generation = self.next_generation();
        self.apply(None, |session, _| session.set_loading(true));
        tracing::info!("🔐 Login attempt for {}", credentials.email);

        let payload = match self.backend.login(credentials).await {
            Ok(payload) => payload,
            Err(e) => {
                self.apply(Some(generation), |session, _| session.set_loading(false));
                tracing::warn!("❌ Login failed for {}: {}", credentials.email, e);
                return Err(AppError::Authentication(e.user_message()));
            }
        };

        if let Err(e) = token_store::validate_token(&payload.token) {
            self.apply(Some(generation), |session, _| session.set_loading(false));
            return Err(AppError::Authentication(format!("Server issued an unusable token: {}", e)));
        }

        let user = payload.user.clone();
        let applied = self.apply(Some(generation), |session, tokens| {
            *session = Session::signed_in(payload.user, Some(payload.token.clone()));
            if let Err(e) = tokens.set(Some(&payload.token)) {
                tracing::error!("❌ Failed to store bearer token: {}", e);
            }
        });

        if !applied {
            tracing::debug!("Login result for {} superseded", credentials.email);
            return Err(AppError::Authentication(
                "Sign-in was superseded by a newer session change".to_string(),
            ));
        }

        tracing::info!("✅ User logged in: {}", user.id);
        Ok(user)
    }

    /// Ends the session.
    ///
    /// The backend is told first when a bearer token exists; its failure is
    /// logged and never blocks the local cleanup. Safe to call repeatedly.
    pub async fn logout(&self) {
        let generation = self.next_generation();
        let was_authenticated = self.is_authenticated();

        if self.flow == AuthFlow::Credentials && self.tokens.get().is_some() {
            if let Err(e) = self.backend.logout().await {
                tracing::warn!("Logout error: {}", e);
            }
        }

        self.apply(None, |session, tokens| {
            session.clear();
            if let Err(e) = tokens.set(None) {
                tracing::error!("❌ Failed to clear bearer token: {}", e);
            }
        });

        if was_authenticated {
            tracing::info!("👋 User logged out (generation {})", generation);
        } else {
            tracing::debug!("Logout on a signed-out session");
        }
    }

    /// Replaces the user directly; authentication follows `user.is_some()`.
    pub fn set_user(&self, user: Option<User>) {
        self.next_generation();
        self.apply(None, |session, _| {
            session.set_user(user);
            session.set_loading(false);
        });
    }

    /// Verifies the stored token against the backend.
    ///
    /// Any failure signs the session out: a session that cannot be verified
    /// is not kept. Returns whether the session is authenticated afterwards.
    /// Under the provider flow the provider is the source of truth and the
    /// session is left as is.
    pub async fn check_auth(&self) -> bool {
        if self.flow == AuthFlow::Provider {
            return self.is_authenticated();
        }

        let generation = self.next_generation();
        if self.tokens.get().is_none() {
            self.apply(Some(generation), |session, _| session.clear());
            return false;
        }

        self.apply(Some(generation), |session, _| session.set_loading(true));

        match self.backend.current_user().await {
            Ok(user) => {
                let applied = self.apply(Some(generation), |session, tokens| {
                    let token = tokens.get();
                    *session = Session::signed_in(user, token);
                });
                if applied {
                    tracing::info!("✅ Session verified");
                } else {
                    tracing::debug!("Session verification result superseded");
                }
                applied
            }
            Err(e) => {
                let error = AppError::SessionVerification(e.user_message());
                tracing::warn!("❌ {}", error);
                self.apply(Some(generation), |session, tokens| {
                    session.clear();
                    if let Err(e) = tokens.set(None) {
                        tracing::error!("❌ Failed to clear bearer token: {}", e);
                    }
                });
                false
            }
        }
    }

    /// Exchanges the current token for a fresh one.
    ///
    /// Failure resolves to signed out, like [`check_auth`](Self::check_auth).
    pub async fn refresh_token(&self) -> bool {
        if self.flow == AuthFlow::Provider || self.tokens.get().is_none() {
            return false;
        }

        let generation = self.next_generation();
        let refreshed = self
            .backend
            .refresh_token()
            .await
            .and_then(|token| token_store::validate_token(&token).map(|_| token));

        match refreshed {
            Ok(token) => self.apply(Some(generation), |session, tokens| {
                if let Err(e) = tokens.set(Some(&token)) {
                    tracing::error!("❌ Failed to store bearer token: {}", e);
                }
                session.set_token(Some(token));
                session.set_loading(false);
            }),
            Err(e) => {
                tracing::warn!("❌ Token refresh failed: {}", e);
                self.apply(Some(generation), |session, tokens| {
                    session.clear();
                    if let Err(e) = tokens.set(None) {
                        tracing::error!("❌ Failed to clear bearer token: {}", e);
                    }
                });
                false
            }
        }
    }

    /// Updates the profile; local state changes only after the backend
    /// confirms.
    ///
    /// # Errors
    ///
    /// [`AppError::Unauthorized`] without a signed-in user,
    /// [`AppError::Validation`] for a malformed update,
    /// [`AppError::ProfileUpdate`] when the backend refuses.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User> {
        let current_id = match self.state.borrow().user() {
            Some(user) => user.id.clone(),
            None => return Err(AppError::Unauthorized),
        };
        validate_profile_update(update)?;

        let user = self
            .backend
            .update_profile(update)
            .await
            .map_err(|e| AppError::ProfileUpdate(e.user_message()))?;

        let confirmed = user.clone();
        self.state.send_if_modified(|session| {
            // The user may have signed out or changed while the request ran.
            if session.user().map(|u| u.id.as_str()) != Some(current_id.as_str()) {
                return false;
            }
            session.set_user(Some(confirmed));
            self.persist(session);
            true
        });

        tracing::info!("✅ Profile updated for user: {}", user.id);
        Ok(user)
    }

    /// Asks the backend to mail a password reset link.
    ///
    /// The session is left untouched.
    ///
    /// # Errors
    ///
    /// [`AppError::Validation`] for a malformed email,
    /// [`AppError::Authentication`] under the provider flow or when the
    /// backend refuses.
    pub async fn request_password_reset(&self, request: &PasswordResetRequest) -> Result<()> {
        self.ensure_credentials_flow()?;
        validate_reset_request(request)?;

        self.backend.forgot_password(request).await.map_err(|e| {
            tracing::warn!("❌ Password reset request failed: {}", e);
            AppError::Authentication(e.user_message())
        })?;
        tracing::info!("📧 Password reset link requested for {}", request.email);
        Ok(())
    }

    /// Sets a new password with the token from a reset link.
    ///
    /// The user still signs in afterwards; no session is created here.
    pub async fn reset_password(&self, reset: &PasswordReset) -> Result<()> {
        self.ensure_credentials_flow()?;
        validate_password_reset(reset)?;

        self.backend.reset_password(reset).await.map_err(|e| {
            tracing::warn!("❌ Password reset failed: {}", e);
            AppError::Authentication(e.user_message())
        })?;
        tracing::info!("🔑 Password reset completed");
        Ok(())
    }

    fn ensure_credentials_flow(&self) -> Result<()> {
        match self.flow {
            AuthFlow::Credentials => Ok(()),
            AuthFlow::Provider => Err(AppError::Authentication(
                "Passwords are managed by the identity provider".to_string(),
            )),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Applies `mutate` under the state lock and persists the result.
    ///
    /// With `Some(generation)`, nothing happens unless that generation is
    /// still the latest. Returns whether the mutation ran.
    fn apply<F>(&self, generation: Option<u64>, mutate: F) -> bool
    where
        F: FnOnce(&mut Session, &TokenStore),
    {
        self.state.send_if_modified(|session| {
            if let Some(generation) = generation {
                if self.generation.load(Ordering::SeqCst) != generation {
                    return false;
                }
            }
            let before = session.persisted();
            let signed_in_as = session
                .user()
                .filter(|_| session.is_authenticated())
                .map(|u| u.id.clone());
            mutate(session, &self.tokens);
            if session.persisted() != before {
                self.persist(session);
            }
            self.count_sign_in(signed_in_as.as_deref(), session);
            true
        })
    }

    fn count_sign_in(&self, previous: Option<&str>, session: &Session) {
        if !session.is_authenticated() {
            return;
        }
        let current = session.user().map(|u| u.id.as_str());
        if current != previous {
            self.sign_ins.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn persist(&self, session: &Session) {
        let mut persisted = session.persisted();
        if self.flow == AuthFlow::Provider {
            persisted.token = None;
        }
        let key = self.flow.storage_key();
        let result = sonic_rs::to_string(&persisted)
            .map_err(AppError::from)
            .and_then(|json| self.storage.set(key, &json));
        if let Err(e) = result {
            tracing::error!("❌ Failed to persist session under {}: {}", key, e);
        }
    }
}
