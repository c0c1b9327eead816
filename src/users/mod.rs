use axum::Router;

use crate::{auth::jwt::TokenService, state::AppState};

pub mod dto;
pub mod handlers;
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router(tokens: TokenService) -> Router<AppState> {
    Router::new()
        .merge(handlers::me_routes(tokens.clone()))
        .merge(handlers::admin_routes(tokens))
}
