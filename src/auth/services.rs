use std::sync::Arc;

use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use regex::Regex;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    jwt::{TokenError, TokenService},
    password::{Hasher, HashingError},
};
use crate::{
    error::ApiError,
    users::{
        repo::{StoreError, UserStore},
        repo_types::{NewUser, User, UserRole},
    },
};

/// Lifetime of a password-reset token.
pub const RESET_TOKEN_TTL: Duration = Duration::minutes(15);
pub const MIN_PASSWORD_LEN: usize = 8;
const ONE_TIME_TOKEN_LEN: usize = 48;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trims a display name; blank names become `None`.
pub(crate) fn normalize_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string)
}

pub(crate) fn check_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    Ok(())
}

/// Unguessable single-use token for activation and password-reset links.
pub(crate) fn generate_one_time_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(ONE_TIME_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),

    #[error("email already registered")]
    EmailConflict,

    #[error("invalid activation token")]
    InvalidToken,

    /// Unknown email and wrong password both land here.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account not activated")]
    AccountNotActive,

    #[error("token invalid or expired")]
    InvalidOrExpiredToken,

    #[error(transparent)]
    Hashing(#[from] HashingError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("store failure")]
    Store(#[source] anyhow::Error),
}

impl From<StoreError> for AccountError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EmailTaken => AccountError::EmailConflict,
            StoreError::Other(e) => AccountError::Store(e),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Validation(msg) => ApiError::Validation(msg),
            AccountError::EmailConflict => ApiError::Conflict(e.to_string()),
            AccountError::InvalidToken | AccountError::InvalidOrExpiredToken => {
                ApiError::Validation(e.to_string())
            }
            AccountError::InvalidCredentials => ApiError::unauthorized(e.to_string()),
            AccountError::AccountNotActive => ApiError::Authorization(e.to_string()),
            AccountError::Token(TokenError::Configuration) => {
                ApiError::Configuration(TokenError::Configuration.to_string())
            }
            AccountError::Hashing(_) | AccountError::Token(_) => {
                error!(error = %e, "credential processing failed");
                ApiError::Internal("internal server error".into())
            }
            AccountError::Store(e) => ApiError::Store(e),
        }
    }
}

/// A freshly issued session.
#[derive(Debug)]
pub struct Session {
    pub token: String,
    pub user: User,
}

/// Registration, activation, login and password reset.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn UserStore>,
    hasher: Hasher,
    tokens: TokenService,
}

impl AccountService {
    pub fn new(store: Arc<dyn UserStore>, hasher: Hasher, tokens: TokenService) -> Self {
        Self {
            store,
            hasher,
            tokens,
        }
    }

    /// Creates an inactive user holding a fresh activation token.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, AccountError> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AccountError::Validation("invalid email".into()));
        }
        check_password_strength(password).map_err(AccountError::Validation)?;

        // Fast path only; the store's unique constraint decides.
        if self.store.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AccountError::EmailConflict);
        }

        let password_hash = self.hasher.hash(password).await?;
        let activation_token = generate_one_time_token();

        let user = self
            .store
            .create(NewUser {
                email,
                password_hash,
                name: normalize_name(name),
                role: UserRole::User,
                is_active: false,
                activation_token: Some(activation_token.clone()),
            })
            .await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        debug!(user_id = %user.id, token = %activation_token, "activation link issued");
        Ok(user)
    }

    pub async fn activate(&self, token: &str) -> Result<User, AccountError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AccountError::InvalidToken);
        }
        match self.store.consume_activation_token(token).await? {
            Some(user) => {
                info!(user_id = %user.id, "user activated");
                Ok(user)
            }
            None => {
                warn!("unknown activation token");
                Err(AccountError::InvalidToken)
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AccountError> {
        let email = normalize_email(email);
        let user = self.store.find_by_email(&email).await?;

        let matched = self
            .hasher
            .verify(password, user.as_ref().map(|u| u.password_hash.as_str()))
            .await;
        let user = match user {
            Some(u) if matched => u,
            Some(u) => {
                warn!(user_id = %u.id, "login invalid password");
                return Err(AccountError::InvalidCredentials);
            }
            None => {
                warn!(email = %email, "login unknown email");
                return Err(AccountError::InvalidCredentials);
            }
        };

        if !user.is_active {
            warn!(user_id = %user.id, "login before activation");
            return Err(AccountError::AccountNotActive);
        }

        let token = self.tokens.issue(user.id, &user.email, user.role)?;
        info!(user_id = %user.id, "user logged in");
        Ok(Session { token, user })
    }

    /// Succeeds whether or not `email` belongs to anyone.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AccountError> {
        self.forgot_password_at(email, OffsetDateTime::now_utc()).await
    }

    pub async fn forgot_password_at(
        &self,
        email: &str,
        now: OffsetDateTime,
    ) -> Result<(), AccountError> {
        let email = normalize_email(email);
        let Some(user) = self.store.find_by_email(&email).await? else {
            debug!(email = %email, "password reset requested for unknown email");
            return Ok(());
        };

        let reset_token = generate_one_time_token();
        let stored = self
            .store
            .set_reset_token(user.id, &reset_token, now + RESET_TOKEN_TTL)
            .await?;
        if stored.is_none() {
            debug!(user_id = %user.id, "user vanished during password reset request");
            return Ok(());
        }

        info!(user_id = %user.id, "password reset requested");
        debug!(user_id = %user.id, token = %reset_token, "reset link issued");
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<User, AccountError> {
        self.reset_password_at(token, new_password, OffsetDateTime::now_utc())
            .await
    }

    pub async fn reset_password_at(
        &self,
        token: &str,
        new_password: &str,
        now: OffsetDateTime,
    ) -> Result<User, AccountError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AccountError::InvalidOrExpiredToken);
        }

        let Some(user) = self.store.find_by_reset_token(token).await? else {
            warn!("unknown reset token");
            return Err(AccountError::InvalidOrExpiredToken);
        };
        if !user.reset_token_expiry.is_some_and(|exp| exp > now) {
            warn!(user_id = %user.id, "expired reset token");
            // Expired: the store clears the token and leaves the hash alone.
            self.store
                .consume_reset_token(token, &user.password_hash, now)
                .await?;
            return Err(AccountError::InvalidOrExpiredToken);
        }

        check_password_strength(new_password).map_err(AccountError::Validation)?;
        let password_hash = self.hasher.hash(new_password).await?;

        match self
            .store
            .consume_reset_token(token, &password_hash, now)
            .await?
        {
            Some(user) => {
                info!(user_id = %user.id, "password reset completed");
                Ok(user)
            }
            None => Err(AccountError::InvalidOrExpiredToken),
        }
    }
}
