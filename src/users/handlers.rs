use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{
    AdminCreateUserRequest, AdminUpdateUserRequest, ListQuery, Page, UpdateProfileRequest,
    UserProfile,
};
use crate::{
    auth::{jwt::TokenService, require_auth, role_gate, AuthUser, RoleGate},
    error::{ApiError, JsonBody},
    state::AppState,
};

/// Self-service routes for the authenticated caller.
pub fn me_routes(tokens: TokenService) -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me).put(update_me).delete(delete_me))
        .route_layer(from_fn_with_state(tokens, require_auth))
}

/// User management; admins only.
pub fn admin_routes(tokens: TokenService) -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users).post(create_user))
        .route(
            "/admin/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route_layer(from_fn_with_state(RoleGate::admin_only(), role_gate))
        .route_layer(from_fn_with_state(tokens, require_auth))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.users.get_profile(ctx.user_id).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.users.update_profile(ctx.user_id, payload).await?))
}

#[instrument(skip(state))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> Result<StatusCode, ApiError> {
    state.users.delete_account(ctx.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<UserProfile>>, ApiError> {
    Ok(Json(state.users.list_users(&query).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<AdminCreateUserRequest>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let profile = state.users.admin_create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.users.admin_get_user(id).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(payload): JsonBody<AdminUpdateUserRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.users.admin_update_user(id, payload).await?))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.users.admin_delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
