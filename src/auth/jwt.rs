use std::sync::Arc;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::Claims;
use crate::{config::JwtConfig, users::repo_types::UserRole};

/// Lifetime of a session token.
pub const SESSION_TTL: Duration = Duration::hours(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("no signing secret configured")]
    Configuration,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token expired")]
    Expired,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Issues and validates HMAC-signed session tokens.
#[derive(Clone)]
pub struct TokenService {
    keys: Option<Arc<SigningKeys>>,
    issuer: String,
    audience: String,
}

impl TokenService {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        let keys = cfg.secret.as_deref().map(|secret| {
            Arc::new(SigningKeys {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
            })
        });
        Self {
            keys,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.keys.is_some()
    }

    fn keys(&self) -> Result<&SigningKeys, TokenError> {
        self.keys.as_deref().ok_or(TokenError::Configuration)
    }

    pub fn issue(&self, user_id: Uuid, email: &str, role: UserRole) -> Result<String, TokenError> {
        self.issue_at(user_id, email, role, OffsetDateTime::now_utc())
    }

    /// Issues a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        user_id: Uuid,
        email: &str,
        role: UserRole,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let keys = self.keys()?;
        let exp = now + SESSION_TTL;
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        debug!(user_id = %user_id, role = %role, "jwt signed");
        Ok(token)
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let keys = self.keys()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss", "aud"]);

        let data = decode::<Claims>(token, &keys.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            }
        })?;
        debug!(user_id = %data.claims.sub, role = %data.claims.role, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
pub(crate) fn test_tokens(secret: &str) -> TokenService {
    TokenService::from_config(&JwtConfig {
        secret: Some(secret.into()),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64url of {"alg":"none","typ":"JWT"}
    const NONE_HEADER: &str = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0";

    #[test]
    fn issue_and_validate_roundtrip() {
        let tokens = test_tokens("dev-secret");
        let user_id = Uuid::new_v4();
        let token = tokens.issue(user_id, "a@x.com", UserRole::Admin).expect("issue");
        let claims = tokens.validate(&token).expect("validate");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.role, UserRole::Admin);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = test_tokens("dev-secret");
        let issued = OffsetDateTime::now_utc() - Duration::hours(2);
        let token = tokens
            .issue_at(Uuid::new_v4(), "a@x.com", UserRole::User, issued)
            .unwrap();
        assert_eq!(tokens.validate(&token), Err(TokenError::Expired));
    }

    #[test]
    fn token_just_inside_ttl_is_accepted() {
        let tokens = test_tokens("dev-secret");
        let issued = OffsetDateTime::now_utc() - Duration::minutes(59);
        let token = tokens
            .issue_at(Uuid::new_v4(), "a@x.com", UserRole::User, issued)
            .unwrap();
        assert!(tokens.validate(&token).is_ok());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let tokens = test_tokens("dev-secret");
        let token = tokens.issue(Uuid::new_v4(), "a@x.com", UserRole::User).unwrap();
        let sig_start = token.rfind('.').unwrap() + 1;
        let idx = sig_start + 5;
        let original = token.as_bytes()[idx];
        let replacement = if original == b'A' { "B" } else { "A" };
        let mut tampered = token.clone();
        tampered.replace_range(idx..idx + 1, replacement);
        assert!(matches!(tokens.validate(&tampered), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let ours = test_tokens("secret-one");
        let theirs = test_tokens("secret-two");
        let token = theirs.issue(Uuid::new_v4(), "a@x.com", UserRole::Admin).unwrap();
        assert!(matches!(ours.validate(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn wrong_issuer_or_audience_is_rejected() {
        let ours = test_tokens("same-secret");
        let theirs = TokenService::from_config(&JwtConfig {
            secret: Some("same-secret".into()),
            issuer: "someone-else".into(),
            audience: "other-aud".into(),
        });
        let token = theirs.issue(Uuid::new_v4(), "a@x.com", UserRole::User).unwrap();
        assert!(matches!(ours.validate(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn unsigned_algorithm_is_rejected() {
        let tokens = test_tokens("dev-secret");
        let token = tokens.issue(Uuid::new_v4(), "a@x.com", UserRole::User).unwrap();
        let mut parts = token.splitn(3, '.');
        let _header = parts.next().unwrap();
        let payload = parts.next().unwrap();
        let forged = format!("{NONE_HEADER}.{payload}.");
        assert!(matches!(tokens.validate(&forged), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let tokens = test_tokens("dev-secret");
        assert!(matches!(tokens.validate("not-a-token"), Err(TokenError::Invalid(_))));
        assert!(matches!(tokens.validate(""), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn missing_secret_is_a_configuration_error() {
        let tokens = TokenService::from_config(&JwtConfig {
            secret: None,
            issuer: "iss".into(),
            audience: "aud".into(),
        });
        assert!(!tokens.is_configured());
        assert_eq!(
            tokens.issue(Uuid::new_v4(), "a@x.com", UserRole::User),
            Err(TokenError::Configuration)
        );
        assert_eq!(tokens.validate("a.b.c"), Err(TokenError::Configuration));
    }
}
