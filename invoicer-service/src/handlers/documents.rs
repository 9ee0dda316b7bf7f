use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

use super::record_error;
use crate::dtos::documents::{
    into_items, CreateDocumentRequest, DocumentListQuery, DocumentListResponse,
    NextNumberResponse, UpdateDocumentRequest, UpdateStatusRequest,
};
use crate::dtos::{parse_date, MessageResponse, PageQuery, Pagination};
use crate::middleware::{AuthUser, EditorUser};
use crate::models::{
    resolve_vat_rate, round_money, CreateDocument, CreatedDocument, Document, DocumentDetail,
    DocumentStatus, DocumentType, ListDocumentsFilter, UpdateDocument,
};
use crate::services::render_document_pdf;
use crate::startup::AppState;
use crate::utils::{check_vat_rate, non_blank};

const DEFAULT_PAGE_SIZE: i64 = 20;

fn document_not_found() -> AppError {
    AppError::not_found("Document not found")
}

fn parse_kind(value: &str) -> Result<DocumentType, AppError> {
    value
        .parse::<DocumentType>()
        .map_err(|e| AppError::bad_request(e.to_string()))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn list_documents(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<DocumentListQuery>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let document_type = non_blank(query.document_type.clone())
        .map(|t| parse_kind(&t))
        .transpose()?;
    let status = non_blank(query.status.clone())
        .map(|s| {
            s.parse::<DocumentStatus>()
                .map_err(|e| AppError::bad_request(e.to_string()))
        })
        .transpose()?;

    let paging = PageQuery {
        search: query.search.clone(),
        page: query.page,
        limit: query.limit,
    };

    let filter = ListDocumentsFilter {
        search: paging.search(),
        document_type,
        status,
        client_id: query.client_id,
        start_date: parse_date("startDate", query.start_date.as_deref())?,
        end_date: parse_date("endDate", query.end_date.as_deref())?,
        page: paging.page(),
        limit: paging.limit(DEFAULT_PAGE_SIZE),
    };

    let (documents, total) = state.db.list_documents(auth.user_id, &filter).await?;

    Ok(Json(DocumentListResponse {
        documents,
        pagination: Pagination::new(total, filter.page, filter.limit),
    }))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn get_document(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<DocumentDetail>, AppError> {
    let detail = state
        .db
        .get_document_detail(auth.user_id, document_id)
        .await?
        .ok_or_else(document_not_found)?;

    Ok(Json(detail))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn next_number(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_type): Path<String>,
) -> Result<Json<NextNumberResponse>, AppError> {
    let kind = parse_kind(&document_type)?;
    let next_number = state.db.next_document_number(auth.user_id, kind).await?;

    Ok(Json(NextNumberResponse { next_number }))
}

#[tracing::instrument(skip(state, req), fields(user_id = %editor.user_id, document_type = %req.document_type))]
pub async fn create_document(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<CreatedDocument>), AppError> {
    check_vat_rate(req.vat_rate)?;
    let items = into_items(req.items)?;

    let profile_rate = match req.vat_rate {
        Some(_) => None,
        None => state
            .db
            .get_user(editor.user_id)
            .await?
            .map(|user| user.vat_rate),
    };
    // Rates are stored with two places; totals must use the stored value.
    let vat_rate = round_money(resolve_vat_rate(
        req.vat_rate,
        profile_rate,
        state.config.billing.default_vat_rate,
    ));

    let created = state
        .db
        .create_document(&CreateDocument {
            user_id: editor.user_id,
            client_id: req.client_id,
            document_type: req.document_type,
            status: req.status.unwrap_or(DocumentStatus::Draft),
            issue_date: req.issue_date.unwrap_or_else(|| Utc::now().date_naive()),
            due_date: req.due_date,
            notes: non_blank(req.notes),
            vat_rate,
            items,
        })
        .await
        .map_err(record_error)?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[tracing::instrument(skip(state, req), fields(user_id = %editor.user_id))]
pub async fn update_document(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Path(document_id): Path<Uuid>,
    Json(req): Json<UpdateDocumentRequest>,
) -> Result<Json<CreatedDocument>, AppError> {
    check_vat_rate(req.vat_rate)?;
    let items = into_items(req.items)?;

    let changes = UpdateDocument {
        client_id: req.client_id,
        status: req.status,
        issue_date: req.issue_date,
        due_date: req.due_date,
        notes: req.notes,
        vat_rate: req.vat_rate.map(round_money),
        items,
    };

    let updated = state
        .db
        .update_document(editor.user_id, document_id, &changes)
        .await
        .map_err(record_error)?
        .ok_or_else(document_not_found)?;

    tracing::info!(document_id = %document_id, "Document updated");

    Ok(Json(updated))
}

#[tracing::instrument(skip(state, req), fields(user_id = %editor.user_id, status = %req.status))]
pub async fn update_status(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Path(document_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Document>, AppError> {
    let document = state
        .db
        .update_document_status(editor.user_id, document_id, req.status)
        .await?
        .ok_or_else(document_not_found)?;

    tracing::info!(document_id = %document_id, "Document status changed");

    Ok(Json(document))
}

#[tracing::instrument(skip(state), fields(user_id = %editor.user_id))]
pub async fn delete_document(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    if !state.db.delete_document(editor.user_id, document_id).await? {
        return Err(document_not_found());
    }

    tracing::info!(document_id = %document_id, "Document deleted");

    Ok(Json(MessageResponse::new("Document deleted successfully")))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn download_pdf(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .db
        .get_document_detail(auth.user_id, document_id)
        .await?
        .ok_or_else(document_not_found)?;

    let disposition = format!(
        "attachment; filename=\"document-{}.pdf\"",
        detail.document.document_number
    );
    let bytes = render_document_pdf(detail).await.map_err(record_error)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

#[tracing::instrument(skip(state), fields(user_id = %editor.user_id))]
pub async fn convert_to_invoice(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Path(quote_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CreatedDocument>), AppError> {
    let invoice = state
        .db
        .convert_quote_to_invoice(editor.user_id, quote_id, Utc::now().date_naive())
        .await
        .map_err(record_error)?;

    Ok((StatusCode::CREATED, Json(invoice)))
}
