use axum::{extract::State, http::StatusCode, Json};
use secrecy::Secret;
use service_core::error::AppError;

use crate::dtos::auth::{AuthResponse, LoginRequest, RegisterRequest, UpdateProfileRequest};
use crate::middleware::AuthUser;
use crate::models::{normalize_email, CreateUser, UpdateProfile, User};
use crate::services::metrics::ERRORS_TOTAL;
use crate::startup::AppState;
use crate::utils::{
    check_vat_rate, hash_password, non_blank, password::dummy_hash, verify_password, Password,
    ValidatedJson,
};

fn invalid_credentials() -> AppError {
    ERRORS_TOTAL
        .with_label_values(&["invalid_credentials"])
        .inc();
    AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
}

#[tracing::instrument(skip(state, req))]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let password: Password = Secret::new(req.password);
    let password_hash = hash_password(&password)?;

    let user = state
        .db
        .create_user(&CreateUser {
            email: normalize_email(&req.email),
            password_hash,
            business_name: req.business_name.trim().to_string(),
            business_id: non_blank(req.business_id),
            address: non_blank(req.address),
            phone: non_blank(req.phone),
            vat_rate: state.config.billing.default_vat_rate,
        })
        .await?;

    let token = state.jwt.generate_access_token(user.user_id, user.role())?;

    tracing::info!(user_id = %user.user_id, "User registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[tracing::instrument(skip(state, req))]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let password: Password = Secret::new(req.password);
    let email = normalize_email(&req.email);

    let Some(user) = state.db.find_user_by_email(&email).await? else {
        // Same work as a real check so response time does not reveal the email
        let _ = verify_password(&password, dummy_hash());
        tracing::info!("Login rejected: unknown email");
        return Err(invalid_credentials());
    };

    if verify_password(&password, &user.password_hash).is_err() {
        tracing::info!(user_id = %user.user_id, "Login rejected: wrong password");
        return Err(invalid_credentials());
    }

    let token = state.jwt.generate_access_token(user.user_id, user.role())?;

    tracing::info!(user_id = %user.user_id, "User logged in");

    Ok(Json(AuthResponse { token, user }))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<User>, AppError> {
    let user = state
        .db
        .get_user(auth.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(user))
}

#[tracing::instrument(skip(state, req), fields(user_id = %auth.user_id))]
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    check_vat_rate(req.vat_rate)?;

    let changes = UpdateProfile {
        business_name: req.business_name.map(|name| name.trim().to_string()),
        business_id: req.business_id,
        address: req.address,
        phone: req.phone,
        logo: req.logo,
        vat_rate: req.vat_rate,
    };

    let user = state
        .db
        .update_profile(auth.user_id, &changes)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    tracing::info!("Profile updated");

    Ok(Json(user))
}
