use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    dto::{AdminCreateUserRequest, AdminUpdateUserRequest, ListQuery, Page, UpdateProfileRequest, UserProfile},
    repo::{StoreError, UserStore},
    repo_types::{NewUser, User, UserRole, UserUpdate},
};
use crate::{
    auth::{
        password::{Hasher, HashingError},
        services::{check_password_strength, is_valid_email, normalize_email},
    },
    error::ApiError,
};

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user name cannot be empty")]
    EmptyName,

    #[error("email cannot be empty")]
    EmptyEmail,

    #[error("invalid email")]
    InvalidEmail,

    #[error("invalid role specified")]
    InvalidRole,

    #[error("{0}")]
    Validation(String),

    #[error("email already in use")]
    EmailConflict,

    #[error("user not found")]
    UserNotFound,

    #[error("failed to delete user")]
    Deletion(#[source] anyhow::Error),

    #[error(transparent)]
    Hashing(#[from] HashingError),

    #[error("store failure")]
    Store(#[source] anyhow::Error),
}

impl From<StoreError> for UserError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EmailTaken => UserError::EmailConflict,
            StoreError::Other(e) => UserError::Store(e),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::EmptyName
            | UserError::EmptyEmail
            | UserError::InvalidEmail
            | UserError::InvalidRole => ApiError::Validation(e.to_string()),
            UserError::Validation(msg) => ApiError::Validation(msg),
            UserError::EmailConflict => ApiError::Conflict(e.to_string()),
            UserError::UserNotFound => ApiError::NotFound(e.to_string()),
            UserError::Hashing(_) => {
                error!(error = %e, "password hashing failed");
                ApiError::Internal("internal server error".into())
            }
            UserError::Deletion(e) | UserError::Store(e) => ApiError::Store(e),
        }
    }
}

/// Checked name and email for a profile write.
struct Identity {
    name: String,
    email: String,
}

fn validate_identity(name: &str, email: &str) -> Result<Identity, UserError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(UserError::EmptyName);
    }
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(UserError::EmptyEmail);
    }
    if !is_valid_email(&email) {
        return Err(UserError::InvalidEmail);
    }
    Ok(Identity {
        name: name.to_string(),
        email,
    })
}

fn parse_role(role: &str) -> Result<UserRole, UserError> {
    role.parse().map_err(|_| UserError::InvalidRole)
}

/// Profile self-service and admin user management.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    hasher: Hasher,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, hasher: Hasher) -> Self {
        Self { store, hasher }
    }

    async fn load(&self, id: Uuid) -> Result<User, UserError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(UserError::UserNotFound)
    }

    /// Email must not belong to anybody but `owner`.
    async fn ensure_email_free(&self, email: &str, owner: Uuid) -> Result<(), UserError> {
        match self.store.find_by_email(email).await? {
            Some(other) if other.id != owner => {
                warn!(user_id = %owner, email = %email, "email owned by another user");
                Err(UserError::EmailConflict)
            }
            _ => Ok(()),
        }
    }

    async fn save(&self, id: Uuid, changes: &UserUpdate) -> Result<User, UserError> {
        self.store
            .update(id, changes)
            .await?
            .ok_or(UserError::UserNotFound)
    }

    pub async fn get_profile(&self, id: Uuid) -> Result<UserProfile, UserError> {
        self.load(id).await.map(UserProfile::from)
    }

    /// Changes name and email only; credentials and role stay as they are.
    pub async fn update_profile(
        &self,
        id: Uuid,
        req: UpdateProfileRequest,
    ) -> Result<UserProfile, UserError> {
        let identity = validate_identity(&req.name, &req.email)?;
        self.ensure_email_free(&identity.email, id).await?;

        let changes = UserUpdate {
            name: identity.name,
            email: identity.email,
            role: None,
            is_active: None,
        };
        let user = self.save(id, &changes).await?;
        info!(user_id = %user.id, "profile updated");
        Ok(user.into())
    }

    /// Deleting an absent account is not an error.
    pub async fn delete_account(&self, id: Uuid) -> Result<(), UserError> {
        let removed = self
            .store
            .delete(id)
            .await
            .map_err(|e| UserError::Deletion(e.into()))?;
        if removed {
            info!(user_id = %id, "user deleted");
        }
        Ok(())
    }

    pub async fn admin_create_user(
        &self,
        req: AdminCreateUserRequest,
    ) -> Result<UserProfile, UserError> {
        let identity = validate_identity(&req.name, &req.email)?;
        let role = match req.role.as_deref() {
            Some(r) => parse_role(r)?,
            None => UserRole::default(),
        };
        check_password_strength(&req.password).map_err(UserError::Validation)?;
        if self.store.find_by_email(&identity.email).await?.is_some() {
            return Err(UserError::EmailConflict);
        }

        let password_hash = self.hasher.hash(&req.password).await?;
        let user = self
            .store
            .create(NewUser {
                email: identity.email,
                password_hash,
                name: Some(identity.name),
                role,
                is_active: true,
                activation_token: None,
            })
            .await?;
        info!(user_id = %user.id, role = %user.role, "user created by admin");
        Ok(user.into())
    }

    pub async fn admin_get_user(&self, id: Uuid) -> Result<UserProfile, UserError> {
        self.get_profile(id).await
    }

    pub async fn admin_update_user(
        &self,
        id: Uuid,
        req: AdminUpdateUserRequest,
    ) -> Result<UserProfile, UserError> {
        let identity = validate_identity(&req.name, &req.email)?;
        let role = parse_role(&req.role)?;
        self.ensure_email_free(&identity.email, id).await?;

        let changes = UserUpdate {
            name: identity.name,
            email: identity.email,
            role: Some(role),
            is_active: req.is_active,
        };
        let user = self.save(id, &changes).await?;
        info!(user_id = %user.id, role = %user.role, "user updated by admin");
        Ok(user.into())
    }

    pub async fn admin_delete_user(&self, id: Uuid) -> Result<(), UserError> {
        self.delete_account(id).await
    }

    pub async fn list_users(&self, query: &ListQuery) -> Result<Page<UserProfile>, UserError> {
        let (offset, limit) = query.window();
        let (users, total) = self
            .store
            .find_all(offset, limit, query.search_term())
            .await?;
        Ok(Page {
            data: users.into_iter().map(UserProfile::from).collect(),
            total,
            offset,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::password::test_hasher, users::memory::MemoryUserStore};

    fn service() -> (UserService, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        (UserService::new(store.clone(), test_hasher()), store)
    }

    fn create_req(email: &str, name: &str, role: Option<&str>) -> AdminCreateUserRequest {
        AdminCreateUserRequest {
            email: email.into(),
            password: "password123".into(),
            name: name.into(),
            role: role.map(Into::into),
        }
    }

    #[tokio::test]
    async fn admin_created_users_are_active() {
        let (svc, store) = service();
        let p = svc
            .admin_create_user(create_req("Boss@X.com", "Boss", Some("ADMIN")))
            .await
            .unwrap();
        assert!(p.is_active);
        assert_eq!(p.role, UserRole::Admin);
        assert_eq!(p.email, "boss@x.com");
        let stored = store.find_by_id(p.id).await.unwrap().unwrap();
        assert!(stored.activation_token.is_none());
    }

    #[tokio::test]
    async fn admin_create_validates() {
        let (svc, _) = service();
        assert!(matches!(
            svc.admin_create_user(create_req("a@x.com", "A", Some("root"))).await,
            Err(UserError::InvalidRole)
        ));
        assert!(matches!(
            svc.admin_create_user(create_req("a@x.com", " ", None)).await,
            Err(UserError::EmptyName)
        ));
        let mut short = create_req("a@x.com", "A", None);
        short.password = "short".into();
        assert!(matches!(
            svc.admin_create_user(short).await,
            Err(UserError::Validation(_))
        ));
        svc.admin_create_user(create_req("a@x.com", "A", None)).await.unwrap();
        assert!(matches!(
            svc.admin_create_user(create_req("a@x.com", "B", None)).await,
            Err(UserError::EmailConflict)
        ));
    }

    #[tokio::test]
    async fn update_profile_keeps_password_hash() {
        let (svc, store) = service();
        let p = svc.admin_create_user(create_req("a@x.com", "A", None)).await.unwrap();
        let before = store.find_by_id(p.id).await.unwrap().unwrap().password_hash;

        let updated = svc
            .update_profile(
                p.id,
                UpdateProfileRequest {
                    name: "  New Name ".into(),
                    email: "NEW@x.com".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("New Name"));
        assert_eq!(updated.email, "new@x.com");
        assert_eq!(updated.role, UserRole::User);

        let after = store.find_by_id(p.id).await.unwrap().unwrap().password_hash;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn update_profile_rules() {
        let (svc, _) = service();
        let a = svc.admin_create_user(create_req("a@x.com", "A", None)).await.unwrap();
        svc.admin_create_user(create_req("b@x.com", "B", None)).await.unwrap();

        let req = |name: &str, email: &str| UpdateProfileRequest {
            name: name.into(),
            email: email.into(),
        };
        assert!(matches!(
            svc.update_profile(a.id, req("", "a@x.com")).await,
            Err(UserError::EmptyName)
        ));
        assert!(matches!(
            svc.update_profile(a.id, req("A", "  ")).await,
            Err(UserError::EmptyEmail)
        ));
        assert!(matches!(
            svc.update_profile(a.id, req("A", "b@x.com")).await,
            Err(UserError::EmailConflict)
        ));
        // Keeping one's own email is fine.
        assert!(svc.update_profile(a.id, req("A2", "a@x.com")).await.is_ok());
        assert!(matches!(
            svc.update_profile(Uuid::new_v4(), req("A", "c@x.com")).await,
            Err(UserError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn admin_update_changes_role_and_activity() {
        let (svc, _) = service();
        let a = svc.admin_create_user(create_req("a@x.com", "A", None)).await.unwrap();
        let updated = svc
            .admin_update_user(
                a.id,
                AdminUpdateUserRequest {
                    name: "A".into(),
                    email: "a@x.com".into(),
                    role: "Admin".into(),
                    is_active: Some(false),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.role, UserRole::Admin);
        assert!(!updated.is_active);

        let bad = svc
            .admin_update_user(
                a.id,
                AdminUpdateUserRequest {
                    name: "A".into(),
                    email: "a@x.com".into(),
                    role: "owner".into(),
                    is_active: None,
                },
            )
            .await;
        assert!(matches!(bad, Err(UserError::InvalidRole)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (svc, store) = service();
        let a = svc.admin_create_user(create_req("a@x.com", "A", None)).await.unwrap();
        svc.delete_account(a.id).await.unwrap();
        svc.admin_delete_user(a.id).await.unwrap();
        assert_eq!(store.len().await, 0);
        assert!(matches!(svc.get_profile(a.id).await, Err(UserError::UserNotFound)));
    }

    #[tokio::test]
    async fn list_users_pages_and_searches() {
        let (svc, _) = service();
        for i in 0..12 {
            svc.admin_create_user(create_req(&format!("u{i}@x.com"), &format!("User {i}"), None))
                .await
                .unwrap();
        }
        svc.admin_create_user(create_req("carol@shop.com", "Carol", None))
            .await
            .unwrap();

        let page = svc.list_users(&ListQuery::default()).await.unwrap();
        assert_eq!(page.total, 13);
        assert_eq!(page.data.len(), 10);
        assert_eq!((page.offset, page.limit), (0, 10));

        let page = svc
            .list_users(&ListQuery {
                offset: Some(10),
                limit: None,
                search: None,
            })
            .await
            .unwrap();
        assert_eq!(page.data.len(), 3);

        let page = svc
            .list_users(&ListQuery {
                offset: None,
                limit: None,
                search: Some("CAROL".into()),
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].email, "carol@shop.com");
    }
}
