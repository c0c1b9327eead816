use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{StoreError, UserStore};
use super::repo_types::{NewUser, User, UserUpdate};

/// Process-local user store. Every write holds the lock for its whole
/// check-and-modify so uniqueness and single-use tokens hold under concurrency.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    fn find<'a>(users: &'a HashMap<Uuid, User>, pred: impl Fn(&User) -> bool) -> Option<&'a User> {
        users.values().find(|u| pred(u))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::EmailTaken);
        }
        let now = OffsetDateTime::now_utc();
        let record = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            role: user.role,
            is_active: user.is_active,
            activation_token: user.activation_token,
            reset_token: None,
            reset_token_expiry: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(Self::find(&users, |u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_activation_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(Self::find(&users, |u| u.activation_token.as_deref() == Some(token)).cloned())
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(Self::find(&users, |u| u.reset_token.as_deref() == Some(token)).cloned())
    }

    async fn update(&self, id: Uuid, changes: &UserUpdate) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&id) {
            return Ok(None);
        }
        if users.values().any(|u| u.id != id && u.email == changes.email) {
            return Err(StoreError::EmailTaken);
        }
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        user.name = Some(changes.name.clone());
        user.email = changes.email.clone();
        if let Some(role) = changes.role {
            user.role = role;
        }
        if let Some(active) = changes.is_active {
            user.is_active = active;
            if active {
                user.activation_token = None;
            }
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        user.reset_token = Some(token.to_string());
        user.reset_token_expiry = Some(expiry);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.users.write().await.remove(&id).is_some())
    }

    async fn find_all(
        &self,
        offset: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<User>, i64), StoreError> {
        let users = self.users.read().await;
        let needle = search.map(str::to_lowercase);
        let mut matches: Vec<&User> = users
            .values()
            .filter(|u| match &needle {
                None => true,
                Some(n) => {
                    u.email.to_lowercase().contains(n.as_str())
                        || u
                            .name
                            .as_deref()
                            .is_some_and(|name| name.to_lowercase().contains(n.as_str()))
                }
            })
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matches.len() as i64;
        let page = matches
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn consume_activation_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .values_mut()
            .find(|u| u.activation_token.as_deref() == Some(token))
        else {
            return Ok(None);
        };
        user.is_active = true;
        user.activation_token = None;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .values_mut()
            .find(|u| u.reset_token.as_deref() == Some(token))
        else {
            return Ok(None);
        };
        let live = user.reset_token_expiry.is_some_and(|exp| exp > now);
        if live {
            user.password_hash = password_hash.to_string();
        }
        user.reset_token = None;
        user.reset_token_expiry = None;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(live.then(|| user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::UserRole;
    use time::Duration;

    fn new_user(email: &str, name: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            name: Some(name.into()),
            role: UserRole::User,
            is_active: false,
            activation_token: Some(format!("act-{email}")),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let store = MemoryUserStore::new();
        store.create(new_user("a@x.com", "A")).await.unwrap();
        let err = store.create(new_user("a@x.com", "B")).await.unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_rejects_email_owned_by_someone_else() {
        let store = MemoryUserStore::new();
        store.create(new_user("a@x.com", "A")).await.unwrap();
        let b = store.create(new_user("b@x.com", "B")).await.unwrap();
        let changes = UserUpdate {
            name: "B".into(),
            email: "a@x.com".into(),
            role: None,
            is_active: None,
        };
        assert!(matches!(
            store.update(b.id, &changes).await,
            Err(StoreError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn update_leaves_credentials_and_tokens_alone() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("a@x.com", "A")).await.unwrap();
        let expiry = OffsetDateTime::now_utc() + Duration::minutes(15);
        store.set_reset_token(user.id, "rst", expiry).await.unwrap();

        let changes = UserUpdate {
            name: "Renamed".into(),
            email: "renamed@x.com".into(),
            role: Some(UserRole::Admin),
            is_active: None,
        };
        let updated = store.update(user.id, &changes).await.unwrap().unwrap();
        assert_eq!(updated.name.as_deref(), Some("Renamed"));
        assert_eq!(updated.role, UserRole::Admin);
        assert_eq!(updated.password_hash, "hash");
        assert!(!updated.is_active);
        assert_eq!(updated.activation_token.as_deref(), Some("act-a@x.com"));
        assert_eq!(updated.reset_token.as_deref(), Some("rst"));
        assert_eq!(updated.reset_token_expiry, Some(expiry));
        assert!(store.update(Uuid::new_v4(), &changes).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activating_through_update_drops_activation_token() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("a@x.com", "A")).await.unwrap();
        let changes = UserUpdate {
            name: "A".into(),
            email: "a@x.com".into(),
            role: None,
            is_active: Some(true),
        };
        let updated = store.update(user.id, &changes).await.unwrap().unwrap();
        assert!(updated.is_active);
        assert!(updated.activation_token.is_none());
        assert!(store.consume_activation_token("act-a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookups_by_one_time_tokens() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("a@x.com", "A")).await.unwrap();
        let found = store.find_by_activation_token("act-a@x.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.find_by_activation_token("act-nobody").await.unwrap().is_none());

        assert!(store.find_by_reset_token("rst").await.unwrap().is_none());
        store
            .set_reset_token(user.id, "rst", OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(store.find_by_reset_token("rst").await.unwrap().unwrap().id, user.id);

        store.consume_activation_token("act-a@x.com").await.unwrap();
        assert!(store.find_by_activation_token("act-a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activation_token_is_single_use() {
        let store = MemoryUserStore::new();
        store.create(new_user("a@x.com", "A")).await.unwrap();
        let user = store.consume_activation_token("act-a@x.com").await.unwrap().unwrap();
        assert!(user.is_active);
        assert!(user.activation_token.is_none());
        assert!(store.consume_activation_token("act-a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_reset_token_is_cleared_without_password_change() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("a@x.com", "A")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .set_reset_token(user.id, "rst", now - Duration::minutes(1))
            .await
            .unwrap();

        assert!(store.consume_reset_token("rst", "new", now).await.unwrap().is_none());
        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash");
        assert!(stored.reset_token.is_none());
        assert!(stored.reset_token_expiry.is_none());
    }

    #[tokio::test]
    async fn find_all_searches_name_and_email_case_insensitively() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice@x.com", "Alice")).await.unwrap();
        store.create(new_user("bob@x.com", "Bobby")).await.unwrap();
        store.create(new_user("carol@example.org", "Carol")).await.unwrap();

        let (page, total) = store.find_all(0, 10, Some("BOB")).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].email, "bob@x.com");

        let (page, total) = store.find_all(0, 10, Some("X.COM")).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);

        let (page, total) = store.find_all(1, 1, None).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
    }
}
