use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::error;

/// Errors as seen by HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Authentication {
        message: String,
        details: Option<String>,
    },

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("server misconfigured: {0}")]
    Configuration(String),

    #[error("{0}")]
    Internal(String),

    #[error("internal server error")]
    Store(#[source] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Configuration(_) | ApiError::Internal(_) | ApiError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Authentication { message, details } => ErrorBody {
                error: message,
                details,
            },
            ApiError::Store(e) => {
                error!(error = ?e, "store failure");
                ErrorBody {
                    error: "internal server error".into(),
                    details: None,
                }
            }
            ApiError::Configuration(reason) => {
                error!(%reason, "configuration error surfaced on request path");
                ErrorBody {
                    error: "internal server error".into(),
                    details: None,
                }
            }
            other => ErrorBody {
                error: other.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// `Json<T>` whose rejections render as 400 validation errors.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::from(rejection)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("invalid request: {}", rejection.body_text()))
    }
}
