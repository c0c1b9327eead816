use std::sync::Arc;

use anyhow::{ensure, Context};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::{
    auth::{jwt::TokenService, password::Hasher, services::AccountService},
    config::AppConfig,
    products::{
        memory::MemoryProductStore,
        repo::{PgProductStore, ProductStore},
        services::ProductService,
    },
    users::{
        memory::MemoryUserStore,
        repo::{PgUserStore, UserStore},
        services::UserService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenService,
    pub accounts: AccountService,
    pub users: UserService,
    pub products: ProductService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let tokens = TokenService::from_config(&config.jwt);
        ensure!(
            tokens.is_configured(),
            "JWT_SECRET must be set to a non-empty value"
        );

        let (users, products): (Arc<dyn UserStore>, Arc<dyn ProductStore>) =
            match config.database_url.as_deref() {
                Some(url) => {
                    let db = PgPoolOptions::new()
                        .max_connections(10)
                        .connect(url)
                        .await
                        .context("connect to database")?;
                    sqlx::migrate!("./migrations")
                        .run(&db)
                        .await
                        .context("run migrations")?;
                    info!("using postgres stores");
                    (
                        Arc::new(PgUserStore::new(db.clone())),
                        Arc::new(PgProductStore::new(db)),
                    )
                }
                None => {
                    warn!("DATABASE_URL not set; data lives in memory and is lost on exit");
                    (
                        Arc::new(MemoryUserStore::new()),
                        Arc::new(MemoryProductStore::new()),
                    )
                }
            };

        let hasher = Hasher::new(config.hashing).context("argon2 parameters")?;
        Ok(Self::from_parts(tokens, hasher, users, products))
    }

    pub fn from_parts(
        tokens: TokenService,
        hasher: Hasher,
        users: Arc<dyn UserStore>,
        products: Arc<dyn ProductStore>,
    ) -> Self {
        Self {
            accounts: AccountService::new(users.clone(), hasher.clone(), tokens.clone()),
            users: UserService::new(users, hasher),
            products: ProductService::new(products),
            tokens,
        }
    }

    /// In-memory state with a cheap hasher, for tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with_store(Arc::new(MemoryUserStore::new()))
    }

    #[cfg(test)]
    pub fn fake_with_store(users: Arc<MemoryUserStore>) -> Self {
        let tokens = TokenService::from_config(&crate::config::JwtConfig {
            secret: Some("test-secret".into()),
            issuer: "test".into(),
            audience: "test".into(),
        });
        Self::from_parts(
            tokens,
            crate::auth::password::test_hasher(),
            users,
            Arc::new(MemoryProductStore::new()),
        )
    }
}
