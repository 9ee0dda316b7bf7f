//! Client model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A customer of the business.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    #[serde(rename = "id")]
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client fields embedded in document listings and reports.
///
/// Selected alongside document columns as `client_name`, `client_email`
/// and `client_business_id`.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    #[sqlx(rename = "client_name")]
    pub name: String,
    #[sqlx(rename = "client_email")]
    pub email: Option<String>,
    #[sqlx(rename = "client_business_id")]
    pub business_id: Option<String>,
}

/// Input for creating a client.
#[derive(Debug, Clone)]
pub struct CreateClient {
    pub user_id: Uuid,
    pub name: String,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

/// Client changes; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateClient {
    pub name: Option<String>,
    pub business_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

/// Filter parameters for listing clients.
#[derive(Debug, Clone)]
pub struct ListClientsFilter {
    pub search: Option<String>,
    pub page: i64,
    pub limit: i64,
}
