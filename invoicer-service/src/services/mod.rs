//! Services module for invoicer-service.

pub mod database;
pub mod jwt;
pub mod metrics;
pub mod pdf;
pub mod reports;

pub use database::Database;
pub use jwt::{AccessTokenClaims, JwtService};
pub use metrics::{get_metrics, init_metrics};
pub use pdf::render_document_pdf;
