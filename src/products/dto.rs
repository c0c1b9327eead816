use serde::Deserialize;

/// Body for both create and update.
#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: i64,
}
