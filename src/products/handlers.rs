use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{dto::ProductRequest, repo_types::Product};
use crate::{
    auth::{jwt::TokenService, require_auth},
    error::{ApiError, JsonBody},
    state::AppState,
    users::dto::{ListQuery, Page},
};

pub fn product_routes(tokens: TokenService) -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route_layer(from_fn_with_state(tokens, require_auth))
}

#[instrument(skip(state))]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Product>>, ApiError> {
    Ok(Json(state.products.list(&query).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_product(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = state.products.create(payload).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

#[instrument(skip(state))]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.products.get(id).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(payload): JsonBody<ProductRequest>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.products.update(id, payload).await?))
}

#[instrument(skip(state))]
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.products.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
