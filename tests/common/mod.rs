#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Form, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use nextera::{
    AppState, Config,
    models::user::{Role, User},
    storage::MemoryStorage,
};

pub const VALID_TOKEN: &str = "token-abc";
pub const REFRESHED_TOKEN: &str = "token-refreshed";
pub const PASSWORD: &str = "correct-horse";
pub const RESET_TOKEN: &str = "reset-123";

/// How `GET /users/me` answers.
#[derive(Clone, Copy, PartialEq)]
pub enum MeMode {
    Ok,
    NotSuccessful,
    Unauthorized,
    Malformed,
}

pub struct BackendState {
    pub user: User,
    pub password: String,
    pub reset_requests: Vec<String>,
    pub me_mode: MeMode,
    pub me_delay: Duration,
    pub fail_logout: bool,
    pub fail_refresh: bool,
    pub fail_profile: bool,
    pub hits: HashMap<&'static str, usize>,
    pub last_authorization: Option<String>,
}

/// An in-process stand-in for the backend REST API.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub async fn start(user: User) -> Self {
        let state = Arc::new(Mutex::new(BackendState {
            user,
            password: PASSWORD.to_string(),
            reset_requests: Vec::new(),
            me_mode: MeMode::Ok,
            me_delay: Duration::ZERO,
            fail_logout: false,
            fail_refresh: false,
            fail_profile: false,
            hits: HashMap::new(),
            last_authorization: None,
        }));

        let app = Router::new()
            .route("/api/auth/login", post(backend_login))
            .route("/api/auth/logout", post(backend_logout))
            .route("/api/auth/refresh", post(backend_refresh))
            .route("/api/auth/forgot-password", post(backend_forgot_password))
            .route("/api/auth/reset-password", post(backend_reset_password))
            .route("/api/users/me", get(backend_me).put(backend_update))
            .with_state(state.clone());

        let addr = serve(app).await;
        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn hits(&self, endpoint: &str) -> usize {
        self.with(|s| s.hits.get(endpoint).copied().unwrap_or(0))
    }
}

fn record(state: &Arc<Mutex<BackendState>>, endpoint: &'static str, headers: &HeaderMap) {
    let mut state = state.lock().unwrap();
    *state.hits.entry(endpoint).or_default() += 1;
    state.last_authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", VALID_TOKEN) || v == format!("Bearer {}", REFRESHED_TOKEN))
}

async fn backend_login(
    State(state): State<Arc<Mutex<BackendState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "login", &headers);
    let (user, password) = {
        let s = state.lock().unwrap();
        (s.user.clone(), s.password.clone())
    };
    if body["email"] == user.email.as_str() && body["password"] == password.as_str() {
        Json(json!({"success": true, "data": {"user": user, "token": VALID_TOKEN}})).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "message": "Invalid email or password"})),
        )
            .into_response()
    }
}

async fn backend_logout(State(state): State<Arc<Mutex<BackendState>>>, headers: HeaderMap) -> Response {
    record(&state, "logout", &headers);
    if state.lock().unwrap().fail_logout {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({"success": true})).into_response()
}

async fn backend_refresh(State(state): State<Arc<Mutex<BackendState>>>, headers: HeaderMap) -> Response {
    record(&state, "refresh", &headers);
    if state.lock().unwrap().fail_refresh || !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "message": "Token expired"})),
        )
            .into_response();
    }
    Json(json!({"success": true, "data": {"token": REFRESHED_TOKEN}})).into_response()
}

async fn backend_forgot_password(
    State(state): State<Arc<Mutex<BackendState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "forgot", &headers);
    let email = body["email"].as_str().unwrap_or_default().to_string();
    state.lock().unwrap().reset_requests.push(email);
    Json(json!({"success": true})).into_response()
}

async fn backend_reset_password(
    State(state): State<Arc<Mutex<BackendState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "reset", &headers);
    if body["token"] != RESET_TOKEN {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "Reset link is invalid or has expired"})),
        )
            .into_response();
    }
    let password = body["password"].as_str().unwrap_or_default().to_string();
    state.lock().unwrap().password = password;
    Json(json!({"success": true})).into_response()
}

async fn backend_me(State(state): State<Arc<Mutex<BackendState>>>, headers: HeaderMap) -> Response {
    record(&state, "me", &headers);
    let (mode, delay, user) = {
        let s = state.lock().unwrap();
        (s.me_mode, s.me_delay, s.user.clone())
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match mode {
        MeMode::Ok => Json(json!({"success": true, "data": user})).into_response(),
        MeMode::NotSuccessful => {
            Json(json!({"success": false, "message": "Session revoked"})).into_response()
        }
        MeMode::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        MeMode::Malformed => (StatusCode::OK, "<html>oops</html>").into_response(),
    }
}

async fn backend_update(
    State(state): State<Arc<Mutex<BackendState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "update", &headers);
    let mut s = state.lock().unwrap();
    if s.fail_profile {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"success": false, "message": "Department is locked"})),
        )
            .into_response();
    }
    if let Some(first) = body["firstName"].as_str() {
        s.user.first_name = first.to_string();
    }
    if let Some(department) = body["department"].as_str() {
        s.user.department = Some(department.to_string());
    }
    Json(json!({"success": true, "data": s.user})).into_response()
}

pub struct ProviderMockState {
    pub claims: Value,
    pub expires_in: Option<u64>,
    pub refuse_code: bool,
    pub token_requests: Vec<HashMap<String, String>>,
}

/// An in-process stand-in for the identity provider tenant.
#[derive(Clone)]
pub struct MockProvider {
    pub addr: SocketAddr,
    state: Arc<Mutex<ProviderMockState>>,
}

impl MockProvider {
    pub async fn start(claims: Value) -> Self {
        let state = Arc::new(Mutex::new(ProviderMockState {
            claims,
            expires_in: Some(86400),
            refuse_code: false,
            token_requests: Vec::new(),
        }));
        let app = Router::new()
            .route("/oauth/token", post(provider_token))
            .route("/userinfo", get(provider_userinfo))
            .with_state(state.clone());
        let addr = serve(app).await;
        Self { addr, state }
    }

    pub fn domain(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ProviderMockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

async fn provider_token(
    State(state): State<Arc<Mutex<ProviderMockState>>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut s = state.lock().unwrap();
    s.token_requests.push(form.clone());
    if s.refuse_code || form.get("code").map(String::as_str) != Some("good-code") {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "invalid_grant", "error_description": "Invalid authorization code"})),
        )
            .into_response();
    }
    Json(json!({
        "access_token": "provider-at",
        "token_type": "Bearer",
        "expires_in": s.expires_in,
    }))
    .into_response()
}

async fn provider_userinfo(
    State(state): State<Arc<Mutex<ProviderMockState>>>,
    headers: HeaderMap,
) -> Response {
    let bearer = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if bearer != Some("Bearer provider-at") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.lock().unwrap().claims.clone()).into_response()
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn user_with_role(role: Role) -> User {
    User {
        role,
        department: Some("Operations".to_string()),
        ..User::new("u-42", "ana@nextera.com", "Ana", "Silva")
    }
}

pub fn config(flow: &str, api_base_url: &str, provider_domain: &str) -> Config {
    let vars: HashMap<&str, String> = HashMap::from([
        ("AUTH0_DOMAIN", provider_domain.to_string()),
        ("AUTH0_CLIENT_ID", "test-client".to_string()),
        ("AUTH_FLOW", flow.to_string()),
        ("API_BASE_URL", api_base_url.to_string()),
        ("APP_ORIGIN", "http://127.0.0.1:3000".to_string()),
        ("SESSION_TIMEOUT", "30".to_string()),
    ]);
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Shared test context: an app state over in-memory storage and its router.
pub struct TestContext {
    pub state: AppState,
    pub storage: Arc<MemoryStorage>,
    pub app: Router,
}

impl TestContext {
    pub fn new(config: Config) -> Self {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(config: Config, storage: Arc<MemoryStorage>) -> Self {
        let state = AppState::new(config, storage.clone()).unwrap();
        let app = nextera::router::build_router(state.clone()).unwrap();
        Self { state, storage, app }
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn send_json(&self, method: &str, uri: &str, body: Value) -> Response {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
