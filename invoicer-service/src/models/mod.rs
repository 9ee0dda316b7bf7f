//! Domain models for invoicer-service.

mod client;
mod document;
mod product;
mod user;

pub use client::{Client, ClientSummary, CreateClient, ListClientsFilter, UpdateClient};
pub use document::{
    line_total, numbering_lock_key, resolve_vat_rate, round_money, round_quantity,
    CreateDocument, CreatedDocument, Document, DocumentDetail, DocumentItem, DocumentStatus,
    DocumentTotals, DocumentType, DocumentWithClient, DocumentWithItems, ItemWithProduct,
    ListDocumentsFilter, NewDocumentItem, UpdateDocument, MAX_AMOUNT, MAX_QUANTITY,
};
pub use product::{CreateProduct, ListProductsFilter, Product, UpdateProduct, DEFAULT_UNIT};
pub use user::{normalize_email, BusinessProfile, CreateUser, Role, UpdateProfile, User};

use thiserror::Error;

/// A stored or submitted string that names no known variant.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
