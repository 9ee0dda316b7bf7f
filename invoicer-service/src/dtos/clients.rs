use serde::{Deserialize, Serialize};
use validator::Validate;

use super::Pagination;
use crate::models::{Client, Document};
use crate::utils::reject_blank;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    #[validate(custom(function = "reject_blank", message = "Client name is required"))]
    pub name: String,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClientRequest {
    #[validate(custom(function = "reject_blank", message = "Client name cannot be empty"))]
    pub name: Option<String>,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientListResponse {
    pub clients: Vec<Client>,
    pub pagination: Pagination,
}

/// Client with its latest documents.
#[derive(Debug, Serialize)]
pub struct ClientDetailResponse {
    #[serde(flatten)]
    pub client: Client,
    pub documents: Vec<Document>,
}
