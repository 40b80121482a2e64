use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{
        guard::UNAUTHORIZED_PATH,
        identity::SyncOutcome,
        supervisor::{ActivitySignal, SupervisorState},
    },
    config::AuthFlow,
    error::{AppError, Result},
    models::{
        session::SessionView,
        user::{ProfileUpdate, User},
    },
    services::provider::{Connection, LoginOptions},
    state::AppState,
    validation::auth::{Credentials, PasswordReset, PasswordResetRequest},
};

/// The request payload for email/password login.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The response envelope of the JSON API.
#[derive(Serialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: None,
        })
    }
}

impl ApiEnvelope<()> {
    fn message(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            message: Some(message.to_string()),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutData {
    /// Where the browser finishes the provider logout, under the provider flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(flatten)]
    pub session: SessionView,
    pub auth_flow: &'static str,
    pub idle_timeout_seconds: u64,
    pub supervised: bool,
}

#[derive(Deserialize)]
pub struct ActivityRequest {
    pub signal: ActivitySignal,
}

#[derive(Deserialize, Default)]
pub struct LoginPageQuery {
    pub connection: Option<Connection>,
    pub login_hint: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where a failed provider login lands.
const LOGIN_FAILED_PATH: &str = "/login?error=auth_failed";

/// Handles email/password login.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiEnvelope<User>>> {
    let credentials = Credentials::new(payload.email, payload.password);
    let user = state.store.login(&credentials).await?;
    Ok(ApiEnvelope::ok(user))
}

/// Handles user logout. Safe to call when already signed out.
pub async fn logout(State(state): State<AppState>) -> Result<Json<ApiEnvelope<LogoutData>>> {
    let logout_url = state.end_session().await?;
    Ok(ApiEnvelope::ok(LogoutData {
        logout_url: logout_url.map(String::from),
    }))
}

/// Sends a password reset link (credentials flow).
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<ApiEnvelope<()>>> {
    state.store.request_password_reset(&request).await?;
    Ok(ApiEnvelope::message(
        "Check your email for password reset instructions.",
    ))
}

/// Sets a new password from a reset link (credentials flow).
pub async fn reset_password(
    State(state): State<AppState>,
    Json(reset): Json<PasswordReset>,
) -> Result<Json<ApiEnvelope<()>>> {
    state.store.reset_password(&reset).await?;
    Ok(ApiEnvelope::message("Password updated. Sign in with your new password."))
}

/// Returns the current session.
pub async fn session(State(state): State<AppState>) -> Json<ApiEnvelope<SessionData>> {
    let session = state.store.snapshot();
    ApiEnvelope::ok(SessionData {
        session: SessionView::from(&session),
        auth_flow: match state.config.auth_flow {
            AuthFlow::Provider => "provider",
            AuthFlow::Credentials => "credentials",
        },
        idle_timeout_seconds: state.supervisor.idle_timeout().as_secs(),
        supervised: matches!(state.supervisor.state(), SupervisorState::Active { .. }),
    })
}

/// Updates the signed-in user's profile.
pub async fn update_profile(
    State(state): State<AppState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ApiEnvelope<User>>> {
    let user = state.store.update_profile(&update).await?;
    Ok(ApiEnvelope::ok(user))
}

/// Records one user-interaction signal from the host.
pub async fn activity(
    State(state): State<AppState>,
    Json(request): Json<ActivityRequest>,
) -> StatusCode {
    state.activity().notify(request.signal);
    StatusCode::NO_CONTENT
}

/// The login page, or the redirect into the provider when a connection is
/// picked.
pub async fn login_page(
    State(state): State<AppState>,
    Query(query): Query<LoginPageQuery>,
) -> Result<Response> {
    if state.store.is_authenticated() {
        return Ok(Redirect::to("/dashboard").into_response());
    }

    if state.config.auth_flow == AuthFlow::Provider && query.connection.is_some() {
        let target = state.provider.login_with_redirect(&LoginOptions {
            connection: query.connection,
            login_hint: query.login_hint,
        })?;
        return Ok(Redirect::to(target.as_str()).into_response());
    }

    let error = query
        .error
        .map(|_| "Authentication failed. Please try again.".to_string())
        .or_else(|| state.provider.snapshot().error);

    let body = match state.config.auth_flow {
        AuthFlow::Provider => serde_json::json!({
            "view": "login",
            "flow": "provider",
            "connections": [
                Connection::Google,
                Connection::Microsoft,
                Connection::UsernamePassword,
            ],
            "error": error,
        }),
        AuthFlow::Credentials => serde_json::json!({
            "view": "login",
            "flow": "credentials",
            "action": "/api/auth/login",
            "forgotPassword": "/api/auth/forgot-password",
            "error": error,
        }),
    };
    Ok(Json(body).into_response())
}

/// Completes a provider login and lands on the dashboard.
pub async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Redirect {
    if state.config.auth_flow != AuthFlow::Provider {
        return Redirect::to("/login");
    }

    if let Some(error) = query.error {
        let message = query.error_description.unwrap_or(error);
        tracing::warn!("❌ Provider refused login: {}", message);
        state.provider.fail(&message);
        return Redirect::to(LOGIN_FAILED_PATH);
    }

    let (Some(code), Some(login_state)) = (query.code, query.state) else {
        tracing::warn!("❌ Callback without code or state");
        return Redirect::to(LOGIN_FAILED_PATH);
    };

    if let Err(e) = state.provider.complete_login(&code, &login_state).await {
        tracing::warn!("❌ {}", e);
        return Redirect::to(LOGIN_FAILED_PATH);
    }

    match state.bridge.sync(&state.provider.snapshot()).await {
        Ok(SyncOutcome::SignedIn(_)) | Ok(SyncOutcome::Unchanged) if state.store.is_authenticated() => {
            Redirect::to("/dashboard")
        }
        Ok(_) => Redirect::to(LOGIN_FAILED_PATH),
        Err(e) => {
            let message = match e {
                AppError::Mapping(_) => "Your account is missing required identity details".to_string(),
                other => other.user_message(),
            };
            state.provider.fail(&message);
            Redirect::to(LOGIN_FAILED_PATH)
        }
    }
}

/// The access-denied view.
pub async fn unauthorized(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let session = state.store.snapshot();
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({
            "view": "unauthorized",
            "path": UNAUTHORIZED_PATH,
            "role": session.user().map(|u| u.role),
            "back": "/dashboard",
        })),
    )
}
