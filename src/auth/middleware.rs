//! Request gates for protected routes.
//!
//! [`require_auth`] validates the bearer token and attaches an [`AuthContext`]
//! to the request; [`role_gate`] must run after it and checks the attached role.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::{TokenError, TokenService};
use crate::{error::ApiError, users::repo_types::UserRole};

/// Identity attached to a request once its bearer token has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: UserRole,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MissingHeader,
    InvalidFormat,
    InvalidToken(TokenError),
    /// The role gate ran without an [`AuthContext`] on the request.
    ContextUnavailable,
    Forbidden,
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingHeader => ApiError::unauthorized("authorization header required"),
            AuthError::InvalidFormat => ApiError::unauthorized("invalid token format"),
            AuthError::InvalidToken(TokenError::Configuration) => {
                ApiError::Configuration(TokenError::Configuration.to_string())
            }
            AuthError::InvalidToken(reason) => ApiError::Authentication {
                message: "token invalid or expired".into(),
                details: Some(reason.to_string()),
            },
            AuthError::ContextUnavailable => ApiError::Internal("role info unavailable".into()),
            AuthError::Forbidden => ApiError::Authorization("access denied".into()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;
    if value.is_empty() {
        return Err(AuthError::MissingHeader);
    }

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::InvalidFormat),
    }
}

/// Resolves the request's identity from its headers.
pub fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
    let token = bearer_token(headers)?;
    let claims = tokens.validate(token).map_err(|e| {
        warn!(reason = %e, "rejected bearer token");
        AuthError::InvalidToken(e)
    })?;
    Ok(AuthContext {
        user_id: claims.sub,
        role: claims.role,
    })
}

pub async fn require_auth(
    State(tokens): State<TokenService>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let ctx = authenticate(&tokens, req.headers())?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Set of roles allowed through a route group.
#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Arc<[UserRole]>,
}

impl RoleGate {
    pub fn new(allowed: impl IntoIterator<Item = UserRole>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn admin_only() -> Self {
        Self::new([UserRole::Admin])
    }

    pub fn check(&self, ctx: Option<&AuthContext>) -> Result<(), AuthError> {
        let ctx = ctx.ok_or(AuthError::ContextUnavailable)?;
        if self.allowed.contains(&ctx.role) {
            Ok(())
        } else {
            warn!(user_id = %ctx.user_id, role = %ctx.role, "role not permitted");
            Err(AuthError::Forbidden)
        }
    }
}

pub async fn role_gate(
    State(gate): State<RoleGate>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    gate.check(req.extensions().get::<AuthContext>())?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::test_tokens;
    use axum::http::HeaderValue;
    use time::{Duration, OffsetDateTime};

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn missing_header_is_rejected() {
        let tokens = test_tokens("s");
        assert_eq!(
            authenticate(&tokens, &HeaderMap::new()),
            Err(AuthError::MissingHeader)
        );
    }

    #[test]
    fn scheme_must_be_exactly_bearer_and_token() {
        let tokens = test_tokens("s");
        for bad in ["Token abc", "bearer abc", "Bearer", "Bearer ", "Bearer a b", "abc"] {
            assert_eq!(
                authenticate(&tokens, &headers(bad)),
                Err(AuthError::InvalidFormat),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn valid_token_yields_context() {
        let tokens = test_tokens("s");
        let id = Uuid::new_v4();
        let token = tokens.issue(id, "a@x.com", UserRole::Admin).unwrap();
        let ctx = authenticate(&tokens, &headers(&format!("Bearer {token}"))).unwrap();
        assert_eq!(
            ctx,
            AuthContext {
                user_id: id,
                role: UserRole::Admin
            }
        );
    }

    #[test]
    fn expired_token_reports_reason() {
        let tokens = test_tokens("s");
        let token = tokens
            .issue_at(
                Uuid::new_v4(),
                "a@x.com",
                UserRole::User,
                OffsetDateTime::now_utc() - Duration::hours(3),
            )
            .unwrap();
        let err = authenticate(&tokens, &headers(&format!("Bearer {token}"))).unwrap_err();
        assert_eq!(err, AuthError::InvalidToken(TokenError::Expired));
        match ApiError::from(err) {
            ApiError::Authentication { message, details } => {
                assert_eq!(message, "token invalid or expired");
                assert_eq!(details.as_deref(), Some("token expired"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn role_gate_checks_membership() {
        let gate = RoleGate::new(["ADMIN".parse::<UserRole>().unwrap()]);
        let admin = AuthContext {
            user_id: Uuid::new_v4(),
            role: UserRole::Admin,
        };
        let user = AuthContext {
            user_id: Uuid::new_v4(),
            role: UserRole::User,
        };
        assert_eq!(gate.check(Some(&admin)), Ok(()));
        assert_eq!(gate.check(Some(&user)), Err(AuthError::Forbidden));
        assert_eq!(gate.check(None), Err(AuthError::ContextUnavailable));
    }
}
