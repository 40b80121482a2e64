use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;

use crate::{
    auth::guard::{GuardDecision, RouteAccess, evaluate},
    state::AppState,
};

/// State of one guarded route group.
#[derive(Clone)]
pub struct GuardState {
    pub app: AppState,
    pub access: RouteAccess,
}

impl GuardState {
    pub fn new(app: &AppState, access: RouteAccess) -> Self {
        Self {
            app: app.clone(),
            access,
        }
    }
}

/// A middleware that applies the route guard to every request.
///
/// # Arguments
///
/// * `guard` - The application state and the route's access rule.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The loading placeholder, a redirect, or the guarded handler's response.
/// On render the signed-in [`User`](crate::models::user::User) is available
/// to the handler as an extension.
pub async fn guard_route(
    State(guard): State<GuardState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let session = guard.app.store.snapshot();

    match evaluate(&session, &guard.access) {
        GuardDecision::Loading => {
            tracing::debug!("⏳ Session loading, holding {}", request.uri().path());
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, "1")],
                Json(json!({ "view": "loading" })),
            )
                .into_response()
        }
        GuardDecision::LoginRedirect => {
            tracing::debug!("🔐 Not signed in, redirecting from {}", request.uri().path());
            match guard.app.login_redirect() {
                Ok(target) => Redirect::to(&target).into_response(),
                Err(e) => e.into_response(),
            }
        }
        GuardDecision::Redirect(target) => {
            tracing::warn!("❌ Access to {} denied", request.uri().path());
            Redirect::to(target).into_response()
        }
        GuardDecision::Render => {
            if let Some(user) = session.user() {
                request.extensions_mut().insert(user.clone());
            }
            next.run(request).await
        }
    }
}
