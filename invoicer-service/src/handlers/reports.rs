use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use service_core::error::AppError;

use crate::dtos::parse_date;
use crate::dtos::reports::{IncomeReportQuery, PeriodQuery, VatReportQuery};
use crate::middleware::AuthUser;
use crate::services::reports::{
    vat_period, year_to_date, ClientReport, Dashboard, GroupBy, IncomeReport, VatReport,
};
use crate::startup::AppState;

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn dashboard(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Dashboard>, AppError> {
    let today = Utc::now().date_naive();
    let dashboard = state.db.dashboard(auth.user_id, today).await?;
    Ok(Json(dashboard))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn vat_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<VatReportQuery>,
) -> Result<Json<VatReport>, AppError> {
    let period = vat_period(
        query.period.as_deref(),
        parse_date("startDate", query.start_date.as_deref())?,
        parse_date("endDate", query.end_date.as_deref())?,
        Utc::now().date_naive(),
    );

    let report = state.db.vat_report(auth.user_id, period).await?;
    Ok(Json(report))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn income_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<IncomeReportQuery>,
) -> Result<Json<IncomeReport>, AppError> {
    let period = year_to_date(
        parse_date("startDate", query.start_date.as_deref())?,
        parse_date("endDate", query.end_date.as_deref())?,
        Utc::now().date_naive(),
    );
    let group_by = GroupBy::parse(query.group_by.as_deref());

    let report = state
        .db
        .income_report(auth.user_id, period, group_by)
        .await?;
    Ok(Json(report))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn client_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<ClientReport>, AppError> {
    let period = year_to_date(
        parse_date("startDate", query.start_date.as_deref())?,
        parse_date("endDate", query.end_date.as_deref())?,
        Utc::now().date_naive(),
    );

    let report = state.db.client_report(auth.user_id, period).await?;
    Ok(Json(report))
}
