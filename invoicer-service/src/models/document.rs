//! Billing documents, their line items and totals.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use service_core::error::AppError;

use super::{BusinessProfile, Client, ClientSummary, Product, UnknownVariant};

/// Document type. Each type has its own number sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Invoice,
    InvoiceReceipt,
    Receipt,
    Quote,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Invoice,
        DocumentType::InvoiceReceipt,
        DocumentType::Receipt,
        DocumentType::Quote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "INVOICE",
            DocumentType::InvoiceReceipt => "INVOICE_RECEIPT",
            DocumentType::Receipt => "RECEIPT",
            DocumentType::Quote => "QUOTE",
        }
    }

    /// Heading printed on the rendered document.
    pub fn title(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "Tax Invoice",
            DocumentType::InvoiceReceipt => "Tax Invoice / Receipt",
            DocumentType::Receipt => "Receipt",
            DocumentType::Quote => "Price Quote",
        }
    }

    /// Quotes are offers, not taxable supplies.
    pub fn charges_vat(&self) -> bool {
        !matches!(self, DocumentType::Quote)
    }

    /// Types counted as revenue by the dashboard and income reports.
    pub fn is_revenue(&self) -> bool {
        matches!(self, DocumentType::Invoice | DocumentType::InvoiceReceipt)
    }
}

impl FromStr for DocumentType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVOICE" => Ok(DocumentType::Invoice),
            "INVOICE_RECEIPT" => Ok(DocumentType::InvoiceReceipt),
            "RECEIPT" => Ok(DocumentType::Receipt),
            "QUOTE" => Ok(DocumentType::Quote),
            other => Err(UnknownVariant::new("document type", other)),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Sent,
    Paid,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Sent => "SENT",
            DocumentStatus::Paid => "PAID",
            DocumentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(DocumentStatus::Draft),
            "SENT" => Ok(DocumentStatus::Sent),
            "PAID" => Ok(DocumentStatus::Paid),
            "CANCELLED" => Ok(DocumentStatus::Cancelled),
            other => Err(UnknownVariant::new("document status", other)),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document header row.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(rename = "id")]
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub document_number: i32,
    #[serde(rename = "type")]
    pub document_type: String,
    pub status: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Parsed type. The column is CHECK-constrained to the known values.
    pub fn kind(&self) -> DocumentType {
        self.document_type.parse().unwrap_or(DocumentType::Invoice)
    }

    pub fn status(&self) -> DocumentStatus {
        self.status.parse().unwrap_or(DocumentStatus::Draft)
    }
}

/// Stored line item.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentItem {
    #[serde(rename = "id")]
    pub item_id: Uuid,
    pub document_id: Uuid,
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    #[serde(skip_serializing)]
    pub sort_order: i32,
}

/// Line item as submitted by the caller; its total is derived.
#[derive(Debug, Clone)]
pub struct NewDocumentItem {
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl NewDocumentItem {
    /// Line total, or `None` when it does not fit a money column.
    pub fn total(&self) -> Option<Decimal> {
        line_total(self.quantity, self.unit_price)
    }
}

impl From<&DocumentItem> for NewDocumentItem {
    fn from(item: &DocumentItem) -> Self {
        Self {
            product_id: item.product_id,
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

/// Exclusive upper bound of `NUMERIC(12, 3)` quantity columns (10^9).
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Exclusive upper bound of `NUMERIC(14, 2)` money columns (10^12).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Round to agorot, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to the three places a stored quantity keeps.
pub fn round_quantity(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
}

fn storable(amount: Decimal) -> Option<Decimal> {
    (amount.abs() < MAX_AMOUNT).then_some(amount)
}

/// `quantity × unit price`, rounded to agorot. `None` when the product
/// overflows or does not fit a money column.
pub fn line_total(quantity: Decimal, unit_price: Decimal) -> Option<Decimal> {
    quantity
        .checked_mul(unit_price)
        .map(round_money)
        .and_then(storable)
}

fn amount_too_large() -> AppError {
    AppError::bad_request("Document amounts are too large")
}

/// Header amounts derived from the items and the VAT rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentTotals {
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
}

impl DocumentTotals {
    pub fn compute(
        kind: DocumentType,
        vat_rate: Decimal,
        items: &[NewDocumentItem],
    ) -> Result<Self, AppError> {
        let subtotal = items
            .iter()
            .try_fold(Decimal::ZERO, |sum, item| {
                item.total().and_then(|line| sum.checked_add(line))
            })
            .and_then(storable)
            .ok_or_else(amount_too_large)?;

        let vat_amount = if kind.charges_vat() {
            subtotal
                .checked_mul(vat_rate)
                .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
                .map(round_money)
                .ok_or_else(amount_too_large)?
        } else {
            Decimal::ZERO
        };

        let total = subtotal
            .checked_add(vat_amount)
            .and_then(storable)
            .ok_or_else(amount_too_large)?;

        Ok(Self {
            subtotal,
            vat_amount,
            total,
        })
    }
}

/// First set rate wins: the request, then the user's profile, then the default.
pub fn resolve_vat_rate(
    requested: Option<Decimal>,
    profile: Option<Decimal>,
    default: Decimal,
) -> Decimal {
    requested.or(profile).unwrap_or(default)
}

/// Advisory lock key that serializes numbering within one (user, type) sequence.
pub fn numbering_lock_key(user_id: Uuid, kind: DocumentType) -> String {
    format!("{}:{}", user_id, kind.as_str())
}

/// Input for creating a document.
#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub vat_rate: Decimal,
    pub items: Vec<NewDocumentItem>,
}

/// Document changes. Items are always replaced; `due_date` is written as given.
#[derive(Debug, Clone)]
pub struct UpdateDocument {
    pub client_id: Option<Uuid>,
    pub status: Option<DocumentStatus>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub items: Vec<NewDocumentItem>,
}

/// Filter parameters for listing documents.
#[derive(Debug, Clone, Default)]
pub struct ListDocumentsFilter {
    pub search: Option<String>,
    pub document_type: Option<DocumentType>,
    pub status: Option<DocumentStatus>,
    pub client_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: i64,
    pub limit: i64,
}

/// Document row joined with its client.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DocumentWithClient {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub document: Document,
    #[sqlx(flatten)]
    pub client: ClientSummary,
}

/// Listed document with its client block and items.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentWithItems {
    #[serde(flatten)]
    pub document: Document,
    pub client: ClientSummary,
    pub items: Vec<DocumentItem>,
}

/// Item together with the catalog product it was built from, if still present.
#[derive(Debug, Clone, Serialize)]
pub struct ItemWithProduct {
    #[serde(flatten)]
    pub item: DocumentItem,
    pub product: Option<Product>,
}

/// Everything needed to show or print one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub client: Client,
    pub items: Vec<ItemWithProduct>,
    pub user: BusinessProfile,
}

/// Document created with the client it was issued to.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedDocument {
    #[serde(flatten)]
    pub document: Document,
    pub client: Client,
    pub items: Vec<DocumentItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn item(quantity: &str, unit_price: &str) -> NewDocumentItem {
        NewDocumentItem {
            product_id: None,
            description: "Consulting".to_string(),
            quantity: dec(quantity),
            unit_price: dec(unit_price),
        }
    }

    #[test]
    fn invoice_totals_include_vat() {
        let totals = DocumentTotals::compute(
            DocumentType::Invoice,
            dec("17"),
            &[item("2", "100"), item("1", "50")],
        )
        .unwrap();

        assert_eq!(totals.subtotal, dec("250"));
        assert_eq!(totals.vat_amount, dec("42.50"));
        assert_eq!(totals.total, dec("292.50"));
    }

    #[test]
    fn quotes_carry_no_vat() {
        let totals = DocumentTotals::compute(DocumentType::Quote, dec("17"), &[item("3", "10")]).unwrap();

        assert_eq!(totals.subtotal, dec("30"));
        assert_eq!(totals.vat_amount, Decimal::ZERO);
        assert_eq!(totals.total, dec("30"));
    }

    #[test]
    fn vat_rounds_half_away_from_zero() {
        // 0.15 * 17% = 0.0255 -> 0.03
        let totals = DocumentTotals::compute(DocumentType::Receipt, dec("17"), &[item("1", "0.15")])
            .unwrap();
        assert_eq!(totals.vat_amount, dec("0.03"));

        // 2.5 * 1% = 0.025 -> 0.03
        let totals = DocumentTotals::compute(DocumentType::Invoice, dec("1"), &[item("1", "2.5")]).unwrap();
        assert_eq!(totals.vat_amount, dec("0.03"));
    }

    #[test]
    fn line_totals_round_to_two_places() {
        assert_eq!(line_total(dec("1.5"), dec("3.33")), Some(dec("5.00")));
        assert_eq!(line_total(dec("0.333"), dec("10")), Some(dec("3.33")));
        assert_eq!(line_total(dec("3"), dec("0.33")), Some(dec("0.99")));
    }

    #[test]
    fn oversized_amounts_are_rejected_instead_of_overflowing() {
        let huge = item("1000000000000000", "1000000000000000");
        assert_eq!(huge.total(), None);
        assert!(matches!(
            DocumentTotals::compute(DocumentType::Invoice, dec("17"), &[huge]),
            Err(AppError::BadRequest(_))
        ));

        // Each line fits, but the sum does not.
        let big = item("999999", "999999.99");
        assert!(big.total().is_some());
        assert!(DocumentTotals::compute(DocumentType::Quote, dec("0"), &[big.clone()]).is_ok());
        assert!(DocumentTotals::compute(DocumentType::Quote, dec("0"), &[big.clone(), big]).is_err());
    }

    #[test]
    fn column_bounds() {
        assert_eq!(MAX_QUANTITY, dec("1000000000"));
        assert_eq!(MAX_AMOUNT, dec("1000000000000"));
        assert_eq!(round_quantity(dec("1.0005")), dec("1.001"));
        assert_eq!(round_money(dec("-0.005")), dec("-0.01"));
    }

    #[test]
    fn zero_rate_and_empty_items() {
        let totals = DocumentTotals::compute(DocumentType::Invoice, Decimal::ZERO, &[]).unwrap();
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn vat_rate_precedence() {
        let default = dec("17");
        assert_eq!(resolve_vat_rate(Some(dec("0")), Some(dec("18")), default), dec("0"));
        assert_eq!(resolve_vat_rate(None, Some(dec("18")), default), dec("18"));
        assert_eq!(resolve_vat_rate(None, None, default), default);
    }

    #[test]
    fn lock_key_separates_types_and_users() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        let invoice = numbering_lock_key(user, DocumentType::Invoice);
        assert_eq!(invoice, format!("{}:INVOICE", user));
        assert_ne!(invoice, numbering_lock_key(user, DocumentType::Quote));
        assert_ne!(invoice, numbering_lock_key(other, DocumentType::Invoice));
    }

    #[test]
    fn type_and_status_round_trip_their_wire_names() {
        for kind in DocumentType::ALL {
            assert_eq!(kind.as_str().parse::<DocumentType>().unwrap(), kind);
        }
        assert_eq!(
            serde_json::from_str::<DocumentType>("\"INVOICE_RECEIPT\"").unwrap(),
            DocumentType::InvoiceReceipt
        );
        assert!("PENDING".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn only_invoices_count_as_revenue() {
        assert!(DocumentType::Invoice.is_revenue());
        assert!(DocumentType::InvoiceReceipt.is_revenue());
        assert!(!DocumentType::Receipt.is_revenue());
        assert!(!DocumentType::Quote.is_revenue());
    }
}
