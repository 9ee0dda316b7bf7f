//! Dashboard and report integration tests.

mod common;

use chrono::Utc;
use common::{money, TestApp};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

async fn issue(app: &TestApp, token: &str, client_id: &str, kind: &str, status: &str, price: u32) {
    let response = app
        .post(
            token,
            "/api/documents",
            json!({
                "clientId": client_id,
                "type": kind,
                "status": status,
                "items": [{ "description": "Work", "quantity": 1, "unitPrice": price }]
            }),
        )
        .await;
    assert_eq!(response.status(), 201);
}

/// One tenant with a sent invoice (117), a paid invoice/receipt (234),
/// a paid receipt (58.50) and a draft quote, all issued today.
async fn seeded() -> (TestApp, String) {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("reports@example.com").await;
    let acme = app.create_client(&token, "Acme").await;
    app.create_client(&token, "Idle Ltd").await;

    issue(&app, &token, &acme, "INVOICE", "SENT", 100).await;
    issue(&app, &token, &acme, "INVOICE_RECEIPT", "PAID", 200).await;
    issue(&app, &token, &acme, "RECEIPT", "PAID", 50).await;
    issue(&app, &token, &acme, "QUOTE", "DRAFT", 999).await;

    (app, token)
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn dashboard_sums_revenue_documents() {
    let (app, token) = seeded().await;

    let body: Value = app
        .get(&token, "/api/reports/dashboard")
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(money(&body["monthlyRevenue"]), dec("351"));
    assert_eq!(money(&body["monthlyVat"]), dec("51"));
    assert_eq!(money(&body["yearlyRevenue"]), dec("351"));
    assert_eq!(body["clientCount"], 2);
    assert_eq!(body["productCount"], 0);
    assert_eq!(body["pendingInvoices"], 1);
    assert_eq!(body["recentDocuments"].as_array().unwrap().len(), 4);
    assert!(body["recentDocuments"][0]["client"]["name"].is_string());

    let chart = body["chartData"].as_array().unwrap();
    assert_eq!(chart.len(), 6);
    let current = chart.last().unwrap();
    assert_eq!(current["month"], Utc::now().format("%Y-%m").to_string());
    assert_eq!(money(&current["revenue"]), dec("351"));
    assert_eq!(current["count"], 2);
    assert_eq!(money(&chart[0]["revenue"]), Decimal::ZERO);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn vat_report_covers_receipts_too() {
    let (app, token) = seeded().await;

    let body: Value = app
        .get(&token, "/api/reports/vat?period=monthly")
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["summary"]["totalTransactions"], 3);
    assert_eq!(money(&body["summary"]["totalSubtotal"]), dec("350"));
    assert_eq!(money(&body["summary"]["totalVat"]), dec("59.50"));
    assert_eq!(money(&body["summary"]["totalAmount"]), dec("409.50"));
    assert_eq!(body["byType"]["invoices"].as_array().unwrap().len(), 1);
    assert_eq!(body["byType"]["invoiceReceipts"].as_array().unwrap().len(), 1);
    assert_eq!(body["byType"]["receipts"].as_array().unwrap().len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn income_report_groups_by_day() {
    let (app, token) = seeded().await;

    let body: Value = app
        .get(&token, "/api/reports/income?groupBy=day")
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["count"], 2);
    assert_eq!(money(&body["total"]), dec("351"));
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let bucket = &body["grouped"][today.as_str()];
    assert_eq!(bucket["count"], 2);
    assert_eq!(money(&bucket["revenue"]), dec("351"));

    let response = app
        .get(&token, "/api/reports/income?startDate=yesterday")
        .await;
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn client_report_lists_idle_clients_last() {
    let (app, token) = seeded().await;

    let body: Value = app
        .get(&token, "/api/reports/clients")
        .await
        .json()
        .await
        .unwrap();

    let clients = body["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 2);
    assert_eq!(clients[0]["name"], "Acme");
    assert_eq!(clients[0]["documentCount"], 2);
    assert_eq!(money(&clients[0]["totalRevenue"]), dec("351"));
    assert_eq!(clients[1]["name"], "Idle Ltd");
    assert_eq!(money(&clients[1]["totalRevenue"]), Decimal::ZERO);

    app.cleanup().await;
}
