//! Product catalog model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Unit used when a product is created without one ("unit" in Hebrew).
pub const DEFAULT_UNIT: &str = "יחידה";

/// A product or service the business sells.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "id")]
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub includes_vat: bool,
    pub unit: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a product.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub includes_vat: bool,
    pub unit: String,
}

/// Product changes; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub includes_vat: Option<bool>,
    pub unit: Option<String>,
}

/// Filter parameters for listing products.
#[derive(Debug, Clone)]
pub struct ListProductsFilter {
    pub search: Option<String>,
    pub page: i64,
    pub limit: i64,
}
