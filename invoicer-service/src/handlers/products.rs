use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::products::{CreateProductRequest, ProductListResponse, UpdateProductRequest};
use crate::dtos::{MessageResponse, PageQuery, Pagination};
use crate::middleware::{AuthUser, EditorUser};
use crate::models::{
    round_money, CreateProduct, ListProductsFilter, Product, UpdateProduct, DEFAULT_UNIT,
};
use crate::startup::AppState;
use crate::utils::{check_price, non_blank, ValidatedJson};

const DEFAULT_PAGE_SIZE: i64 = 50;

fn product_not_found() -> AppError {
    AppError::not_found("Product not found")
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn list_products(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ProductListResponse>, AppError> {
    let filter = ListProductsFilter {
        search: query.search(),
        page: query.page(),
        limit: query.limit(DEFAULT_PAGE_SIZE),
    };

    let (products, total) = state.db.list_products(auth.user_id, &filter).await?;

    Ok(Json(ProductListResponse {
        products,
        pagination: Pagination::new(total, filter.page, filter.limit),
    }))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn get_product(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Json<Product>, AppError> {
    let product = state
        .db
        .get_product(auth.user_id, product_id)
        .await?
        .ok_or_else(product_not_found)?;

    Ok(Json(product))
}

#[tracing::instrument(skip(state, req), fields(user_id = %editor.user_id))]
pub async fn create_product(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    ValidatedJson(req): ValidatedJson<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    check_price(Some(req.price))?;

    let product = state
        .db
        .create_product(&CreateProduct {
            user_id: editor.user_id,
            name: req.name.trim().to_string(),
            description: non_blank(req.description),
            price: round_money(req.price),
            includes_vat: req.includes_vat.unwrap_or(false),
            unit: non_blank(req.unit).unwrap_or_else(|| DEFAULT_UNIT.to_string()),
        })
        .await?;

    tracing::info!(product_id = %product.product_id, "Product created");

    Ok((StatusCode::CREATED, Json(product)))
}

#[tracing::instrument(skip(state, req), fields(user_id = %editor.user_id))]
pub async fn update_product(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Path(product_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateProductRequest>,
) -> Result<Json<Product>, AppError> {
    check_price(req.price)?;

    let changes = UpdateProduct {
        name: req.name.map(|name| name.trim().to_string()),
        description: req.description,
        price: req.price.map(round_money),
        includes_vat: req.includes_vat,
        unit: non_blank(req.unit),
    };

    let product = state
        .db
        .update_product(editor.user_id, product_id, &changes)
        .await?
        .ok_or_else(product_not_found)?;

    tracing::info!(product_id = %product_id, "Product updated");

    Ok(Json(product))
}

#[tracing::instrument(skip(state), fields(user_id = %editor.user_id))]
pub async fn delete_product(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Path(product_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    if !state.db.delete_product(editor.user_id, product_id).await? {
        return Err(product_not_found());
    }

    tracing::info!(product_id = %product_id, "Product deleted");

    Ok(Json(MessageResponse::new("Product deleted successfully")))
}
