use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::Pagination;
use crate::models::Product;
use crate::utils::reject_blank;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    #[validate(custom(function = "reject_blank", message = "Product name is required"))]
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub includes_vat: Option<bool>,
    pub unit: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[validate(custom(function = "reject_blank", message = "Product name cannot be empty"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub includes_vat: Option<bool>,
    pub unit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub products: Vec<Product>,
    pub pagination: Pagination,
}
