//! Identity bridge: turns provider claims into [`User`]s and keeps the
//! session store in step with the identity provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, watch};

use crate::auth::store::AuthStore;
use crate::error::{AppError, Result};
use crate::models::claims::Claims;
use crate::models::user::{AvailabilityPattern, EmergencyContact, Role, User};
use crate::services::api::AuthBackend;

/// What the identity provider currently reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderState {
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub user: Option<Claims>,
    pub error: Option<String>,
}

impl ProviderState {
    pub fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::default()
        }
    }

    pub fn authenticated(claims: Claims) -> Self {
        Self {
            is_authenticated: true,
            user: Some(claims),
            ..Self::default()
        }
    }

    pub fn unauthenticated(error: Option<String>) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }
}

/// Derives the role from provider claims.
///
/// The namespaced role claim wins, then `app_metadata.role`. Absent or
/// unrecognised roles resolve to [`Role::Employee`]; a claim is never
/// interpreted as more privileged than it literally names.
pub fn derive_role(claims: &Claims, namespace: &str) -> Role {
    match claims.custom(namespace, "role").and_then(JsonValue::as_str) {
        Some(raw) => Role::parse(raw).unwrap_or_else(|| {
            tracing::warn!("Unrecognised role claim '{}', using employee", raw);
            Role::Employee
        }),
        None => Role::Employee,
    }
}

/// Maps provider claims to the application's user model.
///
/// # Errors
///
/// Returns [`AppError::Mapping`] when the subject identifier (`sub`) is
/// missing. Every other field falls back to a safe default.
pub fn map_external_user(claims: &Claims, namespace: &str) -> Result<User> {
    let id = claims
        .get_str("sub")
        .ok_or_else(|| AppError::Mapping("missing subject identifier (sub)".to_string()))?
        .to_string();

    let display_name = claims.get_str("name").unwrap_or_default();
    let (first_from_name, last_from_name) = split_display_name(display_name);
    let first_name = claims
        .get_str("given_name")
        .map(str::to_string)
        .unwrap_or(first_from_name);
    let last_name = claims
        .get_str("family_name")
        .map(str::to_string)
        .unwrap_or(last_from_name);

    let now = Utc::now();

    Ok(User {
        id,
        email: claims.get_str("email").unwrap_or_default().to_string(),
        first_name,
        last_name,
        role: derive_role(claims, namespace),
        department: custom_str(claims, namespace, "department"),
        skills: skills(claims, namespace),
        phone_number: custom_str(claims, namespace, "phone"),
        emergency_contact: claims
            .custom(namespace, "emergency_contact")
            .and_then(|v| serde_json::from_value::<EmergencyContact>(v.clone()).ok()),
        is_active: true,
        created_at: timestamp(claims, "created_at").unwrap_or(now),
        updated_at: timestamp(claims, "updated_at").unwrap_or(now),
        last_login: timestamp(claims, "last_login"),
        availability: availability(claims, namespace),
    })
}

fn split_display_name(name: &str) -> (String, String) {
    let mut parts = name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let rest = parts.collect::<Vec<_>>().join(" ");
    (first, rest)
}

fn custom_str(claims: &Claims, namespace: &str, field: &str) -> Option<String> {
    claims
        .custom(namespace, field)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn skills(claims: &Claims, namespace: &str) -> Vec<String> {
    claims
        .custom(namespace, "skills")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn availability(claims: &Claims, namespace: &str) -> Vec<AvailabilityPattern> {
    let Some(items) = claims
        .custom(namespace, "availability")
        .and_then(JsonValue::as_array)
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let pattern = serde_json::from_value::<AvailabilityPattern>(item.clone()).ok()?;
            match pattern.validate() {
                Ok(()) => Some(pattern),
                Err(e) => {
                    tracing::warn!("Dropping invalid availability claim: {}", e);
                    None
                }
            }
        })
        .collect()
}

fn timestamp(claims: &Claims, key: &str) -> Option<DateTime<Utc>> {
    claims
        .get_str(key)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Outcome of one [`IdentityBridge::sync`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to reconcile.
    Unchanged,
    /// A newly mapped user was pushed into the store.
    SignedIn(String),
    /// The provider no longer vouches for the session; it was ended.
    SignedOut,
}

/// Keeps the session store aligned with the identity provider.
pub struct IdentityBridge<B> {
    store: Arc<AuthStore<B>>,
    namespace: String,
    // Serializes sync passes so a transition is applied once.
    gate: Mutex<()>,
}

impl<B: AuthBackend> IdentityBridge<B> {
    pub fn new(store: Arc<AuthStore<B>>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            gate: Mutex::new(()),
        }
    }

    /// Reconciles the store with one provider state.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Mapping`] when the provider's claims cannot be
    /// mapped; the store is left signed out in that case.
    pub async fn sync(&self, provider: &ProviderState) -> Result<SyncOutcome> {
        let _gate = self.gate.lock().await;

        if provider.is_loading {
            return Ok(SyncOutcome::Unchanged);
        }

        let session = self.store.snapshot();

        match (&provider.user, provider.is_authenticated) {
            (Some(claims), true) => {
                let same_subject = session
                    .user()
                    .is_some_and(|u| claims.get_str("sub") == Some(u.id.as_str()));
                if session.is_authenticated() && same_subject {
                    return Ok(SyncOutcome::Unchanged);
                }

                let user = match map_external_user(claims, &self.namespace) {
                    Ok(user) => user,
                    Err(e) => {
                        tracing::warn!("❌ Provider sign-in rejected: {}", e);
                        if session.is_authenticated() {
                            self.store.logout().await;
                        }
                        return Err(e);
                    }
                };
                let id = user.id.clone();
                tracing::info!("✅ Provider user {} signed in as {}", id, user.role);
                self.store.set_user(Some(user));
                Ok(SyncOutcome::SignedIn(id))
            }
            _ if session.is_authenticated() => {
                tracing::info!("👋 Provider session ended, signing out");
                self.store.logout().await;
                Ok(SyncOutcome::SignedOut)
            }
            _ => Ok(SyncOutcome::Unchanged),
        }
    }

    /// Applies every provider state change until the provider goes away.
    pub async fn run(self: Arc<Self>, mut provider: watch::Receiver<ProviderState>) {
        loop {
            let state = provider.borrow_and_update().clone();
            if let Err(e) = self.sync(&state).await {
                tracing::warn!("Identity sync failed: {}", e);
            }
            if provider.changed().await.is_err() {
                tracing::debug!("Identity provider channel closed");
                break;
            }
        }
    }
}
