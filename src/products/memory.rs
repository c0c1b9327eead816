use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::ProductStore;
use super::repo_types::{NewProduct, Product};

#[derive(Default)]
pub struct MemoryProductStore {
    products: RwLock<HashMap<Uuid, Product>>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn create(&self, product: NewProduct) -> Result<Product> {
        let now = OffsetDateTime::now_utc();
        let record = Product {
            id: Uuid::new_v4(),
            name: product.name,
            description: product.description,
            price: product.price,
            created_at: now,
            updated_at: now,
        };
        self.products
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_all(
        &self,
        offset: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<Product>, i64)> {
        let needle = search.map(str::to_lowercase);
        let products = self.products.read().await;
        let mut matches: Vec<&Product> = products
            .values()
            .filter(|p| {
                needle
                    .as_deref()
                    .map_or(true, |n| p.name.to_lowercase().contains(n))
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

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn update(&self, product: &Product) -> Result<Option<Product>> {
        let mut products = self.products.write().await;
        let Some(existing) = products.get_mut(&product.id) else {
            return Ok(None);
        };
        existing.name = product.name.clone();
        existing.description = product.description.clone();
        existing.price = product.price;
        existing.updated_at = OffsetDateTime::now_utc();
        Ok(Some(existing.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.products.write().await.remove(&id).is_some())
    }
}
