use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::models::user::User;

/// The process-wide authentication state.
///
/// `is_authenticated` is always derived from `user`, so an authenticated
/// session without a user cannot be built through this type's API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    user: Option<User>,
    token: Option<Zeroizing<String>>,
    is_authenticated: bool,
    is_loading: bool,
}

impl Session {
    /// A signed-out, idle session.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// A signed-in session for `user`, optionally carrying a bearer token.
    pub fn signed_in(user: User, token: Option<String>) -> Self {
        Self {
            user: Some(user),
            token: token.map(Zeroizing::new),
            is_authenticated: true,
            is_loading: false,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub(crate) fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    /// Replaces the user; authentication follows the presence of a user.
    pub(crate) fn set_user(&mut self, user: Option<User>) {
        self.is_authenticated = user.is_some();
        self.user = user;
    }

    pub(crate) fn set_token(&mut self, token: Option<String>) {
        self.token = token.map(Zeroizing::new);
    }

    /// Clears user, token and authentication. `is_loading` drops too so no
    /// caller is left waiting on a spinner.
    pub(crate) fn clear(&mut self) {
        *self = Self::signed_out();
    }

    /// The restricted projection written to durable storage.
    pub fn persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            token: self.token.as_ref().map(|t| t.to_string()),
            is_authenticated: self.is_authenticated,
        }
    }

    /// Rebuilds a session from its persisted projection.
    ///
    /// The stored flag is not trusted: a record claiming authentication
    /// without a user comes back signed out.
    pub fn from_persisted(persisted: PersistedSession) -> Self {
        match persisted.user {
            Some(user) if persisted.is_authenticated => Self::signed_in(user, persisted.token),
            _ => Self::signed_out(),
        }
    }
}

/// The persisted subset of [`Session`]. Transient fields are excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub is_authenticated: bool,
}

/// Public snapshot of a session, as served to the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            user: session.user.clone(),
            is_authenticated: session.is_authenticated,
            is_loading: session.is_loading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        serde_json::from_str(r#"{"id":"u1","email":"ana@nextera.com"}"#).unwrap()
    }

    #[test]
    fn set_user_derives_authentication() {
        let mut session = Session::signed_out();
        session.set_user(Some(user()));
        assert!(session.is_authenticated());
        session.set_user(None);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn persisted_subset_excludes_loading() {
        let mut session = Session::signed_in(user(), Some("tok".into()));
        session.set_loading(true);
        let json = sonic_rs::to_string(&session.persisted()).unwrap();
        assert!(!json.contains("isLoading"));
        assert!(json.contains("\"token\":\"tok\""));
    }

    #[test]
    fn persisted_flag_without_user_is_not_trusted() {
        let forged = PersistedSession {
            user: None,
            token: Some("tok".into()),
            is_authenticated: true,
        };
        let session = Session::from_persisted(forged);
        assert!(!session.is_authenticated());
        assert!(session.token().is_none());
    }
}
