use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod services;

pub use extractors::AuthUser;
pub use middleware::{require_auth, role_gate, AuthContext, RoleGate};

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
