use std::time::Duration;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use http::{HeaderValue, Method, header};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{
    auth::guard::{RouteAccess, UNAUTHORIZED_PATH},
    error::{AppError, Result},
    handlers,
    middleware_layer::guard::{GuardState, guard_route},
    models::user::Role,
    state::AppState,
};

/// Builds the app shell's router.
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// A `Result` containing the router, or a configuration error if the app
/// origin cannot be used as a CORS origin.
pub fn build_router(state: AppState) -> Result<Router> {
    let origin = HeaderValue::from_str(&state.config.app_origin.origin().ascii_serialization())
        .map_err(|e| AppError::Configuration(format!("APP_ORIGIN: {}", e)))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86400));

    let public_routes = Router::new()
        .route("/", get(handlers::views::home))
        .route("/login", get(handlers::auth::login_page))
        .route("/callback", get(handlers::auth::callback))
        .route(UNAUTHORIZED_PATH, get(handlers::auth::unauthorized));

    let api_routes = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/forgot-password", post(handlers::auth::forgot_password))
        .route("/api/auth/reset-password", post(handlers::auth::reset_password))
        .route("/api/auth/session", get(handlers::auth::session))
        .route("/api/profile", put(handlers::auth::update_profile))
        .route("/api/session/activity", post(handlers::auth::activity));

    let member_routes = Router::new()
        .route("/dashboard", get(handlers::views::dashboard))
        .route("/schedule", get(handlers::views::schedule))
        .route("/time-off", get(handlers::views::time_off))
        .route("/messages", get(handlers::views::messages))
        .route("/profile", get(handlers::views::profile))
        .route_layer(from_fn_with_state(
            GuardState::new(&state, RouteAccess::Authenticated),
            guard_route,
        ));

    let manager_routes = Router::new()
        .route("/team", get(handlers::views::team))
        .route("/admin/schedules", get(handlers::views::admin_schedules))
        .route("/analytics", get(handlers::views::analytics))
        .route("/reports", get(handlers::views::reports))
        .route_layer(from_fn_with_state(
            GuardState::new(
                &state,
                RouteAccess::AllowOnly(vec![Role::Manager, Role::Administrator]),
            ),
            guard_route,
        ));

    let admin_routes = Router::new()
        .route("/admin", get(handlers::views::admin))
        .route_layer(from_fn_with_state(
            GuardState::new(&state, RouteAccess::Require(Role::Administrator)),
            guard_route,
        ));

    let app = Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(member_routes)
        .merge(manager_routes)
        .merge(admin_routes)
        .fallback(handlers::views::home)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(cors)
        .with_state(state);

    Ok(app)
}
