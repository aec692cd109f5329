use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod error;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod service;
mod token;

pub use error::AuthError;
pub use repo::RequestMeta;
pub use service::{AuthService, EmailVerification, GoogleClaims};

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
