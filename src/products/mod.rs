pub mod dto;
pub mod handlers;
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::{auth::jwt::TokenService, state::AppState};
use axum::Router;

pub fn router(tokens: TokenService) -> Router<AppState> {
    Router::new().merge(handlers::product_routes(tokens))
}
