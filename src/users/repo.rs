use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::{NewUser, User, UserRow, UserUpdate};

/// Name of the unique constraint guarding `users.email`.
const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_key";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store's unique constraint on email rejected the write.
    #[error("email already registered")]
    EmailTaken,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence contract for user records.
///
/// Emails passed in are expected to be normalized already (trimmed, lowercase).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_activation_token(&self, token: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError>;
    /// Writes only the columns named by `changes`, returning the stored record
    /// or `None` when the id no longer exists.
    async fn update(&self, id: Uuid, changes: &UserUpdate) -> Result<Option<User>, StoreError>;
    /// Replaces the pending reset token and its expiry, leaving every other
    /// column untouched.
    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;
    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
    /// Page of users matching `search` (case-insensitive substring of name or
    /// email) plus the total number of matches.
    async fn find_all(
        &self,
        offset: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<User>, i64), StoreError>;

    /// Atomically activates the account holding `token` and clears the token.
    async fn consume_activation_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    /// Atomically swaps in `password_hash` and clears the reset token, only if
    /// the token matches and has not expired at `now`. A matching expired
    /// token is cleared without changing the password.
    async fn consume_reset_token(
        &self,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;
}

const USER_COLUMNS: &str = "id, email, password_hash, name, role, is_active, activation_token, \
     reset_token, reset_token_expiry, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("select user by {clause}"))?;
        row.map(User::try_from).transpose().map_err(StoreError::from)
    }
}

fn map_write_error(e: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() && db.constraint() == Some(EMAIL_UNIQUE_CONSTRAINT) {
            return StoreError::EmailTaken;
        }
    }
    StoreError::Other(anyhow::Error::new(e).context(what))
}

/// Escapes LIKE metacharacters and wraps the term for substring matching.
pub(crate) fn like_pattern(search: &str) -> String {
    let escaped = search
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, role, is_active, activation_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(user.role.as_str())
            .bind(user.is_active)
            .bind(&user.activation_token)
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_write_error(e, "insert user"))?;
        Ok(User::try_from(row)?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_one_where("email", email).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("select user by id")?;
        row.map(User::try_from).transpose().map_err(StoreError::from)
    }

    async fn find_by_activation_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        self.fetch_one_where("activation_token", token).await
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        self.fetch_one_where("reset_token", token).await
    }

    async fn update(&self, id: Uuid, changes: &UserUpdate) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET name = $2,
                   email = $3,
                   role = COALESCE($4::text, role),
                   is_active = COALESCE($5::boolean, is_active),
                   activation_token = CASE WHEN $5::boolean IS TRUE THEN NULL
                                           ELSE activation_token END,
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(&changes.name)
            .bind(&changes.email)
            .bind(changes.role.map(|r| r.as_str()))
            .bind(changes.is_active)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_write_error(e, "update user"))?;
        row.map(User::try_from).transpose().map_err(StoreError::from)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET reset_token = $2,
                   reset_token_expiry = $3,
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(token)
            .bind(expiry)
            .fetch_optional(&self.db)
            .await
            .context("set reset token")?;
        row.map(User::try_from).transpose().map_err(StoreError::from)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_all(
        &self,
        offset: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<User>, i64), StoreError> {
        let pattern = search.map(like_pattern);
        let filter = r#"($1::text IS NULL
                 OR LOWER(COALESCE(name, '')) LIKE $1 ESCAPE '\'
                 OR LOWER(email) LIKE $1 ESCAPE '\')"#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {filter}"))
            .bind(&pattern)
            .fetch_one(&self.db)
            .await
            .context("count users")?;

        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
              FROM users
             WHERE {filter}
             ORDER BY created_at DESC, id
             LIMIT $2 OFFSET $3
            "#
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await
            .context("list users")?;

        let users = rows
            .into_iter()
            .map(User::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((users, total))
    }

    async fn consume_activation_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET is_active = TRUE,
                   activation_token = NULL,
                   updated_at = now()
             WHERE activation_token = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(token)
            .fetch_optional(&self.db)
            .await
            .context("consume activation token")?;
        row.map(User::try_from).transpose().map_err(StoreError::from)
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET password_hash = $2,
                   reset_token = NULL,
                   reset_token_expiry = NULL,
                   updated_at = now()
             WHERE reset_token = $1
               AND reset_token_expiry > $3
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(token)
            .bind(password_hash)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .context("consume reset token")?;

        if row.is_none() {
            sqlx::query(
                r#"
                UPDATE users
                   SET reset_token = NULL,
                       reset_token_expiry = NULL,
                       updated_at = now()
                 WHERE reset_token = $1
                "#,
            )
            .bind(token)
            .execute(&self.db)
            .await
            .context("clear expired reset token")?;
        }

        row.map(User::try_from).transpose().map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Ann"), "%ann%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
