use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::Role;
use crate::services::AccessTokenClaims;
use crate::startup::AppState;

/// Middleware to require a valid session token
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Access token required")))?;

    let claims = state.jwt.validate_access_token(&token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected session token");
        AppError::InvalidToken(e)
    })?;

    // Store claims in request extensions so handlers can access them
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

fn claims_from_parts(parts: &Parts) -> Result<&AccessTokenClaims, AppError> {
    parts.extensions.get::<AccessTokenClaims>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Auth claims missing from request extensions"
        ))
    })
}

/// Authenticated caller of any role.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    fn from_claims(claims: &AccessTokenClaims) -> Result<Self, AppError> {
        let user_id = claims.user_id().map_err(|e| {
            tracing::warn!(error = %e, "Session token carries a malformed subject");
            AppError::forbidden("Invalid or expired token")
        })?;
        Ok(Self {
            user_id,
            role: claims.role,
        })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        AuthUser::from_claims(claims_from_parts(parts)?)
    }
}

/// Caller allowed to change data (ADMIN or USER).
#[derive(Debug, Clone, Copy)]
pub struct EditorUser(pub AuthUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for EditorUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.can_edit() {
            return Err(AppError::forbidden("Edit access required"));
        }
        Ok(EditorUser(user))
    }
}

/// Caller with the ADMIN role.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub AuthUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.is_admin() {
            return Err(AppError::forbidden("Admin access required"));
        }
        Ok(AdminUser(user))
    }
}
