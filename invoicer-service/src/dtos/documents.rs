use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use super::Pagination;
use crate::models::{
    round_money, round_quantity, DocumentStatus, DocumentType, DocumentWithItems,
    NewDocumentItem, MAX_AMOUNT, MAX_QUANTITY,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRequest {
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub client_id: Uuid,
    #[serde(rename = "type")]
    pub document_type: DocumentType,
    pub status: Option<DocumentStatus>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    pub client_id: Option<Uuid>,
    pub status: Option<DocumentStatus>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DocumentStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListQuery {
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub document_type: Option<String>,
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentWithItems>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextNumberResponse {
    pub next_number: i32,
}

/// Check submitted line items and convert them for storage.
///
/// Quantities are rounded to three places and prices to agorot before the
/// line total is taken, so totals match what the item columns keep.
pub fn into_items(items: Vec<ItemRequest>) -> Result<Vec<NewDocumentItem>, AppError> {
    if items.is_empty() {
        return Err(AppError::bad_request("At least one item is required"));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let position = index + 1;
            let description = item.description.trim().to_string();
            if description.is_empty() {
                return Err(AppError::bad_request(format!(
                    "Item {} needs a description",
                    position
                )));
            }

            let quantity = round_quantity(item.quantity);
            if quantity <= Decimal::ZERO {
                return Err(AppError::bad_request(format!(
                    "Item {} quantity must be greater than zero",
                    position
                )));
            }
            if quantity >= MAX_QUANTITY {
                return Err(AppError::bad_request(format!(
                    "Item {} quantity must be less than {}",
                    position, MAX_QUANTITY
                )));
            }

            let unit_price = round_money(item.unit_price);
            if unit_price < Decimal::ZERO {
                return Err(AppError::bad_request(format!(
                    "Item {} unit price cannot be negative",
                    position
                )));
            }
            if unit_price >= MAX_AMOUNT {
                return Err(AppError::bad_request(format!(
                    "Item {} unit price must be less than {}",
                    position, MAX_AMOUNT
                )));
            }

            let item = NewDocumentItem {
                product_id: item.product_id,
                description,
                quantity,
                unit_price,
            };
            if item.total().is_none() {
                return Err(AppError::bad_request(format!(
                    "Item {} total is too large",
                    position
                )));
            }
            Ok(item)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(description: &str, quantity: i64, unit_price: i64) -> ItemRequest {
        ItemRequest {
            product_id: None,
            description: description.to_string(),
            quantity: Decimal::from(quantity),
            unit_price: Decimal::from(unit_price),
        }
    }

    #[test]
    fn valid_items_are_trimmed() {
        let items = into_items(vec![item("  Consulting ", 2, 150), item("Free sample", 1, 0)]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description, "Consulting");
        assert_eq!(items[0].total(), Some(Decimal::from(300)));
    }

    #[test]
    fn empty_item_list_is_rejected() {
        assert!(matches!(into_items(vec![]), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn bad_lines_are_rejected() {
        assert!(into_items(vec![item("  ", 1, 10)]).is_err());
        assert!(into_items(vec![item("Hours", 0, 10)]).is_err());
        assert!(into_items(vec![item("Refund", 1, -10)]).is_err());
    }

    fn line(quantity: &str, unit_price: &str) -> ItemRequest {
        ItemRequest {
            product_id: None,
            description: "Hours".to_string(),
            quantity: quantity.parse().unwrap(),
            unit_price: unit_price.parse().unwrap(),
        }
    }

    #[test]
    fn huge_quantities_and_prices_are_rejected() {
        let err = into_items(vec![line("1000000000000000", "1000000000000000")]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        assert!(into_items(vec![line("1000000000", "1")]).is_err());
        assert!(into_items(vec![line("1", "1000000000000")]).is_err());
        // Both fit their columns, the product does not.
        assert!(into_items(vec![line("999999999", "999999999999")]).is_err());
        assert!(into_items(vec![line("999999999.999", "1")]).is_ok());
    }

    #[test]
    fn values_are_rounded_to_stored_precision() {
        let items = into_items(vec![line("3", "0.333"), line("1.23456", "10.005")]).unwrap();

        assert_eq!(items[0].unit_price, Decimal::new(33, 2));
        assert_eq!(items[1].quantity, Decimal::new(1235, 3));
        assert_eq!(items[1].unit_price, Decimal::new(1001, 2));

        // A stored row recomputes to the stored line total.
        for stored in &items {
            let reloaded = NewDocumentItem {
                product_id: None,
                description: stored.description.clone(),
                quantity: round_quantity(stored.quantity),
                unit_price: round_money(stored.unit_price),
            };
            assert_eq!(reloaded.total(), stored.total());
        }
        assert_eq!(items[0].total(), Some(Decimal::new(99, 2)));
    }

    #[test]
    fn quantity_rounding_to_zero_is_rejected() {
        assert!(into_items(vec![line("0.0004", "10")]).is_err());
    }

    #[test]
    fn create_request_uses_wire_names() {
        let request: CreateDocumentRequest = serde_json::from_value(serde_json::json!({
            "clientId": "6f1c2a9e-8d5b-4f4a-9e61-0c3b2d1a7e55",
            "type": "INVOICE_RECEIPT",
            "issueDate": "2026-10-01",
            "vatRate": 18,
            "items": [{"description": "Design", "quantity": 1.5, "unitPrice": 200}]
        }))
        .unwrap();

        assert_eq!(request.document_type, DocumentType::InvoiceReceipt);
        assert_eq!(request.status, None);
        assert_eq!(request.vat_rate, Some(Decimal::from(18)));
        assert_eq!(request.items[0].quantity, Decimal::new(15, 1));
    }
}
