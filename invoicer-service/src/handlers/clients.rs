use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::clients::{
    ClientDetailResponse, ClientListResponse, CreateClientRequest, UpdateClientRequest,
};
use crate::dtos::{MessageResponse, PageQuery, Pagination};
use crate::middleware::{AuthUser, EditorUser};
use crate::models::{Client, CreateClient, ListClientsFilter, UpdateClient};
use crate::startup::AppState;
use crate::utils::{non_blank, ValidatedJson};

const DEFAULT_PAGE_SIZE: i64 = 20;
const RECENT_DOCUMENTS: i64 = 10;

fn client_not_found() -> AppError {
    AppError::not_found("Client not found")
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn list_clients(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ClientListResponse>, AppError> {
    let filter = ListClientsFilter {
        search: query.search(),
        page: query.page(),
        limit: query.limit(DEFAULT_PAGE_SIZE),
    };

    let (clients, total) = state.db.list_clients(auth.user_id, &filter).await?;

    Ok(Json(ClientListResponse {
        clients,
        pagination: Pagination::new(total, filter.page, filter.limit),
    }))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn get_client(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(client_id): Path<Uuid>,
) -> Result<Json<ClientDetailResponse>, AppError> {
    let client = state
        .db
        .get_client(auth.user_id, client_id)
        .await?
        .ok_or_else(client_not_found)?;

    let documents = state
        .db
        .recent_client_documents(auth.user_id, client_id, RECENT_DOCUMENTS)
        .await?;

    Ok(Json(ClientDetailResponse { client, documents }))
}

#[tracing::instrument(skip(state, req), fields(user_id = %editor.user_id))]
pub async fn create_client(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    ValidatedJson(req): ValidatedJson<CreateClientRequest>,
) -> Result<(StatusCode, Json<Client>), AppError> {
    let client = state
        .db
        .create_client(&CreateClient {
            user_id: editor.user_id,
            name: req.name.trim().to_string(),
            business_id: non_blank(req.business_id),
            address: non_blank(req.address),
            city: non_blank(req.city),
            phone: non_blank(req.phone),
            email: non_blank(req.email),
            notes: non_blank(req.notes),
        })
        .await?;

    tracing::info!(client_id = %client.client_id, "Client created");

    Ok((StatusCode::CREATED, Json(client)))
}

#[tracing::instrument(skip(state, req), fields(user_id = %editor.user_id))]
pub async fn update_client(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Path(client_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateClientRequest>,
) -> Result<Json<Client>, AppError> {
    let changes = UpdateClient {
        name: req.name.map(|name| name.trim().to_string()),
        business_id: req.business_id,
        address: req.address,
        city: req.city,
        phone: req.phone,
        email: req.email,
        notes: req.notes,
    };

    let client = state
        .db
        .update_client(editor.user_id, client_id, &changes)
        .await?
        .ok_or_else(client_not_found)?;

    tracing::info!(client_id = %client_id, "Client updated");

    Ok(Json(client))
}

#[tracing::instrument(skip(state), fields(user_id = %editor.user_id))]
pub async fn delete_client(
    State(state): State<AppState>,
    EditorUser(editor): EditorUser,
    Path(client_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    if !state.db.delete_client(editor.user_id, client_id).await? {
        return Err(client_not_found());
    }

    tracing::info!(client_id = %client_id, "Client deleted");

    Ok(Json(MessageResponse::new("Client deleted successfully")))
}
