pub mod admin;
pub mod auth;
pub mod clients;
pub mod documents;
pub mod products;
pub mod reports;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(total: i64, page: i64, limit: i64) -> Self {
        let pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            total,
            page,
            limit,
            pages,
        }
    }
}

/// `?search&page&limit` shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn search(&self) -> Option<String> {
        crate::utils::non_blank(self.search.clone())
    }
}

/// Parse an optional `YYYY-MM-DD` query value; blank counts as absent.
pub fn parse_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::bad_request(format!("Invalid {}: {}", field, raw))),
    }
}
