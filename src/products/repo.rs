use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{NewProduct, Product};
use crate::users::repo::like_pattern;

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn create(&self, product: NewProduct) -> Result<Product>;
    /// Page of products newest first, plus the total match count.
    async fn find_all(
        &self,
        offset: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<Product>, i64)>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>>;
    async fn update(&self, product: &Product) -> Result<Option<Product>>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

const PRODUCT_COLUMNS: &str = "id, name, description, price, created_at, updated_at";

pub struct PgProductStore {
    db: PgPool,
}

impl PgProductStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn create(&self, product: NewProduct) -> Result<Product> {
        let sql = format!(
            r#"
            INSERT INTO products (id, name, description, price)
            VALUES ($1, $2, $3, $4)
            RETURNING {PRODUCT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Product>(&sql)
            .bind(Uuid::new_v4())
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price)
            .fetch_one(&self.db)
            .await
            .context("insert product")
    }

    async fn find_all(
        &self,
        offset: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<Product>, i64)> {
        let pattern = search.map(like_pattern);
        let filter = r#"($1::text IS NULL OR LOWER(name) LIKE $1 ESCAPE '\')"#;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM products WHERE {filter}"))
                .bind(&pattern)
                .fetch_one(&self.db)
                .await
                .context("count products")?;

        let sql = format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
              FROM products
             WHERE {filter}
             ORDER BY created_at DESC, id
             LIMIT $2 OFFSET $3
            "#
        );
        let rows = sqlx::query_as::<_, Product>(&sql)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await
            .context("list products")?;
        Ok((rows, total))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find product")
    }

    async fn update(&self, product: &Product) -> Result<Option<Product>> {
        let sql = format!(
            r#"
            UPDATE products
               SET name = $2, description = $3, price = $4, updated_at = now()
             WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Product>(&sql)
            .bind(product.id)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price)
            .fetch_optional(&self.db)
            .await
            .context("update product")
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete product")?;
        Ok(result.rows_affected() > 0)
    }
}
