use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::admin::UpdateRoleRequest;
use crate::middleware::AdminUser;
use crate::models::{Role, User};
use crate::startup::AppState;

#[tracing::instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<Vec<User>>, AppError> {
    let users = state.db.list_users().await?;
    Ok(Json(users))
}

#[tracing::instrument(skip(state, req), fields(admin_id = %admin.user_id, role = %req.role))]
pub async fn update_user_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<User>, AppError> {
    if user_id == admin.user_id && req.role != Role::Admin {
        return Err(AppError::bad_request("Admins cannot remove their own admin role"));
    }

    let user = state
        .db
        .update_user_role(user_id, req.role)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    tracing::info!(user_id = %user_id, "User role changed");

    Ok(Json(user))
}
