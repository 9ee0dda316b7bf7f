//! HTTP handlers for invoicer-service.

pub mod admin;
pub mod auth;
pub mod clients;
pub mod documents;
pub mod health;
pub mod products;
pub mod reports;

use service_core::error::AppError;

use crate::services::metrics::ERRORS_TOTAL;

/// Count an error by kind on its way out.
pub(crate) fn record_error(err: AppError) -> AppError {
    ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
    err
}
