//! Dashboard and financial reports.

use chrono::{Datelike, Duration, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use sqlx::FromRow;
use std::collections::BTreeMap;
use tracing::instrument;
use uuid::Uuid;

use super::database::{Database, CLIENT_SUMMARY_COLUMNS, DOCUMENT_COLUMNS};
use crate::models::{DocumentStatus, DocumentType, DocumentWithClient};
use crate::services::metrics::DB_QUERY_DURATION;

/// Statuses at which a document counts toward revenue and VAT.
const BOOKED_STATUSES: [DocumentStatus; 2] = [DocumentStatus::Sent, DocumentStatus::Paid];
const REVENUE_TYPES: [DocumentType; 2] = [DocumentType::Invoice, DocumentType::InvoiceReceipt];
const VAT_TYPES: [DocumentType; 3] = [
    DocumentType::Invoice,
    DocumentType::InvoiceReceipt,
    DocumentType::Receipt,
];

const CHART_MONTHS: u32 = 6;
const RECENT_DOCUMENTS: i64 = 5;

fn names<T: Copy>(values: &[T], name: fn(&T) -> &'static str) -> Vec<String> {
    values.iter().map(|v| name(v).to_string()).collect()
}

// -----------------------------------------------------------------------------
// Periods
// -----------------------------------------------------------------------------

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn last_of_month(date: NaiveDate) -> NaiveDate {
    first_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

pub fn month_period(date: NaiveDate) -> Period {
    Period {
        start: first_of_month(date),
        end: last_of_month(date),
    }
}

/// Two-month VAT reporting period containing `date` (Jan-Feb, Mar-Apr, ...).
pub fn bimonthly_period(date: NaiveDate) -> Period {
    let start_month = date.month0() / 2 * 2 + 1;
    let start = NaiveDate::from_ymd_opt(date.year(), start_month, 1).unwrap_or(date);
    let end = start
        .checked_add_months(Months::new(1))
        .map(last_of_month)
        .unwrap_or(date);
    Period { start, end }
}

/// `monthly` and `bimonthly` win over explicit dates; a full explicit range
/// comes next; anything else is the current month.
pub fn vat_period(
    period: Option<&str>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Period {
    match (period, start, end) {
        (Some("monthly"), _, _) => month_period(today),
        (Some("bimonthly"), _, _) => bimonthly_period(today),
        (_, Some(start), Some(end)) => Period { start, end },
        _ => month_period(today),
    }
}

/// Start of the current year to today unless given.
pub fn year_to_date(start: Option<NaiveDate>, end: Option<NaiveDate>, today: NaiveDate) -> Period {
    Period {
        start: start
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today)),
        end: end.unwrap_or(today),
    }
}

/// Sunday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// First day of each of the last `count` months, oldest first, ending with `today`'s month.
pub fn trailing_months(today: NaiveDate, count: u32) -> Vec<NaiveDate> {
    let current = first_of_month(today);
    (0..count)
        .rev()
        .filter_map(|back| current.checked_sub_months(Months::new(back)))
        .collect()
}

/// Income bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Day,
    Week,
    Month,
}

impl GroupBy {
    /// Unknown values group by month.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("day") => GroupBy::Day,
            Some("week") => GroupBy::Week,
            _ => GroupBy::Month,
        }
    }

    pub fn key(&self, date: NaiveDate) -> String {
        match self {
            GroupBy::Day => date.format("%Y-%m-%d").to_string(),
            GroupBy::Week => week_start(date).format("%Y-%m-%d").to_string(),
            GroupBy::Month => date.format("%Y-%m").to_string(),
        }
    }
}

// -----------------------------------------------------------------------------
// Report shapes
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub month: String,
    pub revenue: Decimal,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub monthly_revenue: Decimal,
    pub monthly_vat: Decimal,
    pub yearly_revenue: Decimal,
    pub yearly_vat: Decimal,
    pub client_count: i64,
    pub product_count: i64,
    pub pending_invoices: i64,
    pub recent_documents: Vec<DocumentWithClient>,
    pub chart_data: Vec<ChartPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VatSummary {
    pub total_transactions: usize,
    pub total_subtotal: Decimal,
    pub total_vat: Decimal,
    pub total_amount: Decimal,
    pub period: Period,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VatByType {
    pub invoices: Vec<DocumentWithClient>,
    pub invoice_receipts: Vec<DocumentWithClient>,
    pub receipts: Vec<DocumentWithClient>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VatReport {
    pub summary: VatSummary,
    pub documents: Vec<DocumentWithClient>,
    pub by_type: VatByType,
}

impl VatReport {
    pub fn build(period: Period, documents: Vec<DocumentWithClient>) -> Self {
        let summary = VatSummary {
            total_transactions: documents.len(),
            total_subtotal: documents.iter().map(|d| d.document.subtotal).sum(),
            total_vat: documents.iter().map(|d| d.document.vat_amount).sum(),
            total_amount: documents.iter().map(|d| d.document.total).sum(),
            period,
        };

        let mut by_type = VatByType::default();
        for doc in &documents {
            match doc.document.kind() {
                DocumentType::Invoice => by_type.invoices.push(doc.clone()),
                DocumentType::InvoiceReceipt => by_type.invoice_receipts.push(doc.clone()),
                DocumentType::Receipt => by_type.receipts.push(doc.clone()),
                DocumentType::Quote => {}
            }
        }

        Self {
            summary,
            documents,
            by_type,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IncomeBucket {
    pub revenue: Decimal,
    pub count: usize,
    pub documents: Vec<DocumentWithClient>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomeReport {
    pub period: Period,
    pub total: Decimal,
    pub count: usize,
    pub grouped: BTreeMap<String, IncomeBucket>,
}

impl IncomeReport {
    pub fn build(period: Period, group_by: GroupBy, documents: Vec<DocumentWithClient>) -> Self {
        let total = documents.iter().map(|d| d.document.total).sum();
        let count = documents.len();

        let mut grouped: BTreeMap<String, IncomeBucket> = BTreeMap::new();
        for doc in documents {
            let bucket = grouped
                .entry(group_by.key(doc.document.issue_date))
                .or_default();
            bucket.revenue += doc.document.total;
            bucket.count += 1;
            bucket.documents.push(doc);
        }

        Self {
            period,
            total,
            count,
            grouped,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClientRevenue {
    #[serde(rename = "id")]
    pub client_id: Uuid,
    pub name: String,
    pub document_count: i64,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientReport {
    pub period: Period,
    pub clients: Vec<ClientRevenue>,
}

/// One chart entry per month, zero-filled, from `(month start, revenue, count)` rows.
pub fn build_chart(months: &[NaiveDate], rows: &[(NaiveDate, Decimal, i64)]) -> Vec<ChartPoint> {
    months
        .iter()
        .map(|month| {
            let (revenue, count) = rows
                .iter()
                .find(|(start, _, _)| start == month)
                .map(|(_, revenue, count)| (*revenue, *count))
                .unwrap_or((Decimal::ZERO, 0));
            ChartPoint {
                month: month.format("%Y-%m").to_string(),
                revenue,
                count,
            }
        })
        .collect()
}

// -----------------------------------------------------------------------------
// Report Queries
// -----------------------------------------------------------------------------

impl Database {
    /// Dashboard figures as of `today`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn dashboard(&self, user_id: Uuid, today: NaiveDate) -> Result<Dashboard, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["dashboard"])
            .start_timer();

        let revenue_types = names(&REVENUE_TYPES, DocumentType::as_str);
        let booked = names(&BOOKED_STATUSES, DocumentStatus::as_str);
        let month_start = first_of_month(today);
        let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(month_start);

        let (monthly_revenue, monthly_vat, yearly_revenue, yearly_vat): (
            Decimal,
            Decimal,
            Decimal,
            Decimal,
        ) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(total) FILTER (WHERE issue_date >= $4), 0),
                COALESCE(SUM(vat_amount) FILTER (WHERE issue_date >= $4), 0),
                COALESCE(SUM(total), 0),
                COALESCE(SUM(vat_amount), 0)
            FROM documents
            WHERE user_id = $1
              AND document_type = ANY($2)
              AND status = ANY($3)
              AND issue_date >= $5
            "#,
        )
        .bind(user_id)
        .bind(&revenue_types)
        .bind(&booked)
        .bind(month_start)
        .bind(year_start)
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum revenue: {}", e)))?;

        let (client_count, product_count, pending_invoices): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM clients WHERE user_id = $1),
                (SELECT COUNT(*) FROM products WHERE user_id = $1),
                (SELECT COUNT(*) FROM documents
                  WHERE user_id = $1 AND document_type = ANY($2) AND status = $3)
            "#,
        )
        .bind(user_id)
        .bind(&revenue_types)
        .bind(DocumentStatus::Sent.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count records: {}", e)))?;

        let recent_documents = sqlx::query_as::<_, DocumentWithClient>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}, {CLIENT_SUMMARY_COLUMNS}
            FROM documents d
            JOIN clients c ON c.client_id = d.client_id
            WHERE d.user_id = $1
            ORDER BY d.created_at DESC
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(RECENT_DOCUMENTS)
        .fetch_all(self.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list recent documents: {}", e))
        })?;

        let months = trailing_months(today, CHART_MONTHS);
        let chart_start = months.first().copied().unwrap_or(month_start);
        let chart_end = last_of_month(today);
        let rows: Vec<(NaiveDate, Decimal, i64)> = sqlx::query_as(
            r#"
            SELECT date_trunc('month', issue_date)::date AS month,
                   COALESCE(SUM(total), 0),
                   COUNT(*)
            FROM documents
            WHERE user_id = $1
              AND document_type = ANY($2)
              AND status = ANY($3)
              AND issue_date BETWEEN $4 AND $5
            GROUP BY month
            "#,
        )
        .bind(user_id)
        .bind(&revenue_types)
        .bind(&booked)
        .bind(chart_start)
        .bind(chart_end)
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to build chart: {}", e)))?;

        timer.observe_duration();

        Ok(Dashboard {
            monthly_revenue,
            monthly_vat,
            yearly_revenue,
            yearly_vat,
            client_count,
            product_count,
            pending_invoices,
            recent_documents,
            chart_data: build_chart(&months, &rows),
        })
    }

    /// Booked documents of the given types issued within `period`, oldest first.
    #[instrument(skip(self, types), fields(user_id = %user_id))]
    pub async fn booked_documents(
        &self,
        user_id: Uuid,
        types: &[DocumentType],
        period: Period,
    ) -> Result<Vec<DocumentWithClient>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["booked_documents"])
            .start_timer();

        let documents = sqlx::query_as::<_, DocumentWithClient>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}, {CLIENT_SUMMARY_COLUMNS}
            FROM documents d
            JOIN clients c ON c.client_id = d.client_id
            WHERE d.user_id = $1
              AND d.document_type = ANY($2)
              AND d.status = ANY($3)
              AND d.issue_date BETWEEN $4 AND $5
            ORDER BY d.issue_date ASC, d.document_number ASC
            "#
        ))
        .bind(user_id)
        .bind(names(types, DocumentType::as_str))
        .bind(names(&BOOKED_STATUSES, DocumentStatus::as_str))
        .bind(period.start)
        .bind(period.end)
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list documents: {}", e)))?;

        timer.observe_duration();

        Ok(documents)
    }

    /// VAT report over invoices, invoice/receipts and receipts.
    pub async fn vat_report(&self, user_id: Uuid, period: Period) -> Result<VatReport, AppError> {
        let documents = self.booked_documents(user_id, &VAT_TYPES, period).await?;
        Ok(VatReport::build(period, documents))
    }

    /// Revenue grouped by day, week or month.
    pub async fn income_report(
        &self,
        user_id: Uuid,
        period: Period,
        group_by: GroupBy,
    ) -> Result<IncomeReport, AppError> {
        let documents = self
            .booked_documents(user_id, &REVENUE_TYPES, period)
            .await?;
        Ok(IncomeReport::build(period, group_by, documents))
    }

    /// Revenue per client, highest first. Clients without revenue are listed with zero.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn client_report(
        &self,
        user_id: Uuid,
        period: Period,
    ) -> Result<ClientReport, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["client_report"])
            .start_timer();

        let clients = sqlx::query_as::<_, ClientRevenue>(
            r#"
            SELECT c.client_id,
                   c.name,
                   COUNT(d.document_id) AS document_count,
                   COALESCE(SUM(d.total), 0) AS total_revenue
            FROM clients c
            LEFT JOIN documents d
              ON d.client_id = c.client_id
             AND d.user_id = c.user_id
             AND d.document_type = ANY($2)
             AND d.status = ANY($3)
             AND d.issue_date BETWEEN $4 AND $5
            WHERE c.user_id = $1
            GROUP BY c.client_id, c.name
            ORDER BY total_revenue DESC, c.name ASC
            "#,
        )
        .bind(user_id)
        .bind(names(&REVENUE_TYPES, DocumentType::as_str))
        .bind(names(&BOOKED_STATUSES, DocumentStatus::as_str))
        .bind(period.start)
        .bind(period.end)
        .fetch_all(self.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to build client report: {}", e))
        })?;

        timer.observe_duration();

        Ok(ClientReport { period, clients })
    }
}
