//! Placeholder views of the app shell. Each one names the screen the UI
//! renders and who it is rendered for; page content comes from the backend.

use axum::{Extension, Json, response::Redirect};
use serde::Serialize;

use crate::models::user::{Role, User};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub view: &'static str,
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
}

fn view(name: &'static str, user: &User) -> Json<View> {
    Json(View {
        view: name,
        user_id: user.id.clone(),
        display_name: user.display_name(),
        role: user.role,
    })
}

pub async fn dashboard(Extension(user): Extension<User>) -> Json<View> {
    view("dashboard", &user)
}

pub async fn schedule(Extension(user): Extension<User>) -> Json<View> {
    view("schedule", &user)
}

pub async fn time_off(Extension(user): Extension<User>) -> Json<View> {
    view("time-off", &user)
}

pub async fn messages(Extension(user): Extension<User>) -> Json<View> {
    view("messages", &user)
}

pub async fn profile(Extension(user): Extension<User>) -> Json<View> {
    view("profile", &user)
}

pub async fn team(Extension(user): Extension<User>) -> Json<View> {
    view("team", &user)
}

pub async fn admin_schedules(Extension(user): Extension<User>) -> Json<View> {
    view("admin-schedules", &user)
}

pub async fn analytics(Extension(user): Extension<User>) -> Json<View> {
    view("analytics", &user)
}

pub async fn reports(Extension(user): Extension<User>) -> Json<View> {
    view("reports", &user)
}

pub async fn admin(Extension(user): Extension<User>) -> Json<View> {
    view("admin", &user)
}

pub async fn home() -> Redirect {
    Redirect::to("/dashboard")
}
