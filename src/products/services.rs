use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::{
    dto::ProductRequest,
    repo::ProductStore,
    repo_types::{NewProduct, Product},
};
use crate::{
    error::ApiError,
    users::dto::{ListQuery, Page},
};

#[derive(Debug, Error)]
pub enum ProductError {
    #[error("product name is required")]
    EmptyName,

    #[error("price cannot be negative")]
    NegativePrice,

    #[error("product not found")]
    NotFound,

    #[error("store failure")]
    Store(#[from] anyhow::Error),
}

impl From<ProductError> for ApiError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::EmptyName | ProductError::NegativePrice => {
                ApiError::Validation(e.to_string())
            }
            ProductError::NotFound => ApiError::NotFound(e.to_string()),
            ProductError::Store(e) => ApiError::Store(e),
        }
    }
}

fn validate(req: ProductRequest) -> Result<NewProduct, ProductError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ProductError::EmptyName);
    }
    if req.price < 0 {
        return Err(ProductError::NegativePrice);
    }
    Ok(NewProduct {
        name: name.to_string(),
        description: req
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        price: req.price,
    })
}

#[derive(Clone)]
pub struct ProductService {
    store: Arc<dyn ProductStore>,
}

impl ProductService {
    pub fn new(store: Arc<dyn ProductStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, req: ProductRequest) -> Result<Product, ProductError> {
        let product = self.store.create(validate(req)?).await?;
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Page<Product>, ProductError> {
        let (offset, limit) = query.window();
        let (data, total) = self
            .store
            .find_all(offset, limit, query.search_term())
            .await?;
        Ok(Page {
            data,
            total,
            offset,
            limit,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Product, ProductError> {
        self.store.find_by_id(id).await?.ok_or(ProductError::NotFound)
    }

    pub async fn update(&self, id: Uuid, req: ProductRequest) -> Result<Product, ProductError> {
        let fields = validate(req)?;
        let mut product = self.get(id).await?;
        product.name = fields.name;
        product.description = fields.description;
        product.price = fields.price;
        let product = self
            .store
            .update(&product)
            .await?
            .ok_or(ProductError::NotFound)?;
        info!(product_id = %product.id, "product updated");
        Ok(product)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ProductError> {
        if !self.store.delete(id).await? {
            return Err(ProductError::NotFound);
        }
        info!(product_id = %id, "product deleted");
        Ok(())
    }
}
