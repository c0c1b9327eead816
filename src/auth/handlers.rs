use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::instrument;

use crate::{
    auth::dto::{
        ActivationRequest, ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse,
        RegisterRequest, RegisterResponse, ResetPasswordRequest,
    },
    error::{ApiError, JsonBody},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/activate", post(activate))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let user = state
        .accounts
        .register(&payload.email, &payload.password, payload.name.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "registration successful, check your email to activate the account".into(),
            user_id: user.id,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn activate(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ActivationRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.accounts.activate(&payload.token).await?;
    Ok(Json(MessageResponse::new("account activated")))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session = state
        .accounts
        .login(&payload.email, &payload.password)
        .await?;
    Ok(Json(LoginResponse {
        token: session.token,
        user_id: session.user.id,
        name: session.user.name,
        role: session.user.role,
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.accounts.forgot_password(&payload.email).await?;
    Ok(Json(MessageResponse::new(
        "if the email is registered, a reset link has been sent",
    )))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .accounts
        .reset_password(&payload.token, &payload.password)
        .await?;
    Ok(Json(MessageResponse::new("password has been reset")))
}
