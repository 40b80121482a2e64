//! Client for the backend REST API.
//!
//! Every call returns the backend's `{success, data, message?, errors?}`
//! envelope. Transport failures, non-2xx statuses and `success:false` all
//! come back as errors; callers never see a half-successful response.

use std::future::Future;
use std::sync::Arc;

use http::{HeaderValue, Method, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::token_store::TokenStore;
use crate::error::{AppError, Result};
use crate::models::user::{ProfileUpdate, User};
use crate::validation::auth::{Credentials, PasswordReset, PasswordResetRequest};

/// Supplies the `Authorization` header of outbound requests.
pub trait BearerSource: Send + Sync + 'static {
    fn authorization_header(&self) -> Option<HeaderValue>;
}

impl BearerSource for TokenStore {
    fn authorization_header(&self) -> Option<HeaderValue> {
        TokenStore::authorization_header(self)
    }
}

/// Response envelope of every backend endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<sonic_rs::Value>,
}

/// `data` of a successful `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginPayload {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct RefreshPayload {
    token: String,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// The authentication operations the session store relies on.
pub trait AuthBackend: Send + Sync + 'static {
    /// `POST /auth/login`
    fn login(&self, credentials: &Credentials) -> impl Future<Output = Result<LoginPayload>> + Send;

    /// `POST /auth/logout`
    fn logout(&self) -> impl Future<Output = Result<()>> + Send;

    /// `POST /auth/refresh`, returning the new bearer token.
    fn refresh_token(&self) -> impl Future<Output = Result<String>> + Send;

    /// `POST /auth/forgot-password`
    fn forgot_password(&self, request: &PasswordResetRequest) -> impl Future<Output = Result<()>> + Send;

    /// `POST /auth/reset-password`
    fn reset_password(&self, reset: &PasswordReset) -> impl Future<Output = Result<()>> + Send;

    /// `GET /users/me`
    fn current_user(&self) -> impl Future<Output = Result<User>> + Send;

    /// `PUT /users/me`, returning the user as stored by the backend.
    fn update_profile(&self, update: &ProfileUpdate) -> impl Future<Output = Result<User>> + Send;
}

/// HTTP client of the backend REST API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    bearer: Arc<dyn BearerSource>,
}

impl ApiClient {
    /// Creates a client rooted at `base_url` (e.g. `http://localhost:8000/api`).
    pub fn new(base_url: &Url, bearer: Arc<dyn BearerSource>) -> Self {
        Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            bearer,
        }
    }

    /// Use a custom HTTP client (connection pool reuse or testing).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Sends a request and unwraps the envelope's `data`.
    pub async fn request<T, B>(&self, method: Method, endpoint: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send::<T, B>(method, endpoint, body)
            .await?
            .ok_or_else(|| AppError::Backend {
                status: None,
                message: format!("Response from {} carried no data", endpoint),
            })
    }

    /// Sends a request whose envelope carries no `data`.
    pub async fn request_empty<B>(&self, method: Method, endpoint: &str, body: Option<&B>) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        self.send::<sonic_rs::Value, B>(method, endpoint, body)
            .await
            .map(|_| ())
    }

    async fn send<T, B>(&self, method: Method, endpoint: &str, body: Option<&B>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!("🌐 {} {}", method, url);

        let mut request = self
            .http
            .request(method, &url)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(authorization) = self.bearer.authorization_header() {
            request = request.header(header::AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!("❌ API request failed: {}", e);
            AppError::Http(e)
        })?;

        let status = response.status();
        let text = response.text().await?;
        let envelope = sonic_rs::from_str::<ApiResponse<T>>(&text);

        if !status.is_success() {
            let message = sonic_rs::from_str::<ApiResponse<sonic_rs::Value>>(&text)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
            tracing::warn!("❌ {} answered {}: {}", url, status, message);
            return Err(AppError::Backend {
                status: Some(status.as_u16()),
                message,
            });
        }

        let envelope = envelope.map_err(|e| {
            tracing::warn!("❌ Malformed response from {}: {}", url, e);
            AppError::Backend {
                status: Some(status.as_u16()),
                message: "Malformed response from server".to_string(),
            }
        })?;

        if !envelope.success {
            return Err(AppError::Backend {
                status: Some(status.as_u16()),
                message: envelope
                    .message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            });
        }

        Ok(envelope.data)
    }
}

impl AuthBackend for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginPayload> {
        let body = LoginBody {
            email: &credentials.email,
            password: &credentials.password,
        };
        self.request(Method::POST, "/auth/login", Some(&body)).await
    }

    async fn logout(&self) -> Result<()> {
        self.request_empty::<()>(Method::POST, "/auth/logout", None).await
    }

    async fn forgot_password(&self, request: &PasswordResetRequest) -> Result<()> {
        self.request_empty(Method::POST, "/auth/forgot-password", Some(request))
            .await
    }

    async fn reset_password(&self, reset: &PasswordReset) -> Result<()> {
        self.request_empty(Method::POST, "/auth/reset-password", Some(reset))
            .await
    }

    async fn refresh_token(&self) -> Result<String> {
        let payload: RefreshPayload = self
            .request::<_, ()>(Method::POST, "/auth/refresh", None)
            .await?;
        Ok(payload.token)
    }

    async fn current_user(&self) -> Result<User> {
        self.request::<_, ()>(Method::GET, "/users/me", None).await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<User> {
        self.request(Method::PUT, "/users/me", Some(update)).await
    }
}
