use axum::{
    extract::{FromRequest, Request},
    Json,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use std::borrow::Cow;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::MAX_AMOUNT;

/// JSON body that must deserialize and pass its `validator` rules.
///
/// Malformed JSON is a 400; rule violations are a 422 with details.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::bad_request(format!("Invalid request body: {}", e.body_text())))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// Trim an optional text field; blank becomes `None`.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `validator` rule: text must contain something besides whitespace.
pub fn reject_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn rule_violation(field: &'static str, code: &'static str, message: &'static str) -> AppError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    AppError::ValidationError(errors)
}

/// Reject a VAT percentage outside 0..=100.
pub fn check_vat_rate(vat_rate: Option<Decimal>) -> Result<(), AppError> {
    match vat_rate {
        Some(rate) if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED => Err(rule_violation(
            "vat_rate",
            "range",
            "VAT rate must be between 0 and 100",
        )),
        _ => Ok(()),
    }
}

/// Reject a negative price or one too large for a money column.
pub fn check_price(price: Option<Decimal>) -> Result<(), AppError> {
    match price {
        Some(price) if price < Decimal::ZERO => Err(rule_violation(
            "price",
            "range",
            "Price cannot be negative",
        )),
        Some(price) if price >= MAX_AMOUNT => Err(rule_violation(
            "price",
            "range",
            "Price is too large",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, response::IntoResponse, routing::post, Router};
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Deserialize, Validate)]
    struct Payload {
        #[validate(custom(function = "reject_blank"))]
        name: String,
    }

    async fn handler(ValidatedJson(p): ValidatedJson<Payload>) -> impl IntoResponse {
        p.name
    }

    async fn status_for(body: &'static str) -> StatusCode {
        let app = Router::new().route("/", post(handler));
        app.oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn accepts_valid_body() {
        assert_eq!(status_for(r#"{"name":"Acme"}"#).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        assert_eq!(status_for("{not json").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rule_violation_is_unprocessable() {
        assert_eq!(
            status_for(r#"{"name":""}"#).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn whitespace_only_name_is_unprocessable() {
        assert_eq!(
            status_for(r#"{"name":"   "}"#).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn vat_rate_bounds_are_inclusive() {
        assert!(check_vat_rate(None).is_ok());
        assert!(check_vat_rate(Some(Decimal::ZERO)).is_ok());
        assert!(check_vat_rate(Some(Decimal::ONE_HUNDRED)).is_ok());
        assert!(matches!(
            check_vat_rate(Some(Decimal::new(1001, 1))),
            Err(AppError::ValidationError(_))
        ));
        assert!(check_vat_rate(Some(Decimal::NEGATIVE_ONE)).is_err());
    }

    #[test]
    fn negative_price_is_rejected() {
        assert!(check_price(Some(Decimal::ZERO)).is_ok());
        assert!(check_price(Some(Decimal::new(-1, 2))).is_err());
        assert!(check_price(Some(MAX_AMOUNT)).is_err());
        assert!(check_price(Some(Decimal::new(99_999_999_999_999, 2))).is_ok());
    }

    #[test]
    fn blank_text_is_dropped() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(Some(" Haifa ".to_string())), Some("Haifa".to_string()));
    }
}
