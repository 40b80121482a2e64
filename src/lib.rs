//! Session core of the Nextera workforce app shell: identity provider
//! integration, role-based route guarding and idle-session supervision.

pub mod config;
pub mod error;
pub mod router;
pub mod state;
pub mod storage;

pub mod auth {
    pub mod guard;
    pub mod identity;
    pub mod store;
    pub mod supervisor;
    pub mod token_store;
}

pub mod models {
    pub mod claims;
    pub mod session;
    pub mod user;
}

pub mod services {
    pub mod api;
    pub mod pkce;
    pub mod provider;
}

pub mod handlers {
    pub mod auth;
    pub mod views;
}

pub mod middleware_layer {
    pub mod guard;
}

pub mod validation {
    pub mod auth;
}

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
