//! Document numbering, totals, updates, conversion and PDF export tests.

mod common;

use common::{money, TestApp};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn numbers_are_sequential_per_type() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("numbers@example.com").await;
    let client_id = app.create_client(&token, "Acme").await;

    let first = app.create_document(&token, &client_id, "INVOICE", 1.0, 10.0).await;
    let second = app.create_document(&token, &client_id, "INVOICE", 1.0, 10.0).await;
    let quote = app.create_document(&token, &client_id, "QUOTE", 1.0, 10.0).await;

    assert_eq!(first["documentNumber"], 1);
    assert_eq!(second["documentNumber"], 2);
    assert_eq!(quote["documentNumber"], 1);

    let next: Value = app
        .get(&token, "/api/documents/next-number/INVOICE")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(next["nextNumber"], 3);

    let response = app.get(&token, "/api/documents/next-number/BOGUS").await;
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn concurrent_creates_never_share_a_number() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("race@example.com").await;
    let client_id = app.create_client(&token, "Acme").await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let request = app
            .client
            .post(app.url("/api/documents"))
            .bearer_auth(&token)
            .json(&json!({
                "clientId": client_id,
                "type": "RECEIPT",
                "items": [{ "description": "Tip", "quantity": 1, "unitPrice": 1 }]
            }));
        tasks.spawn(async move {
            let response = request.send().await.unwrap();
            assert_eq!(response.status(), 201);
            response.json::<Value>().await.unwrap()
        });
    }

    let mut numbers = Vec::new();
    while let Some(created) = tasks.join_next().await {
        numbers.push(created.unwrap()["documentNumber"].as_i64().unwrap());
    }
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=8).collect::<Vec<i64>>());

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn totals_use_profile_rate_and_round() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("totals@example.com").await;
    app.put(&token, "/api/auth/profile", json!({ "vatRate": 18 }))
        .await;
    let client_id = app.create_client(&token, "Acme").await;

    let invoice = app
        .create_document(&token, &client_id, "INVOICE", 3.0, 33.33)
        .await;

    assert_eq!(money(&invoice["subtotal"]), dec("99.99"));
    assert_eq!(money(&invoice["vatRate"]), dec("18"));
    assert_eq!(money(&invoice["vatAmount"]), dec("18.00"));
    assert_eq!(money(&invoice["total"]), dec("117.99"));
    assert_eq!(invoice["status"], "DRAFT");
    assert_eq!(invoice["client"]["name"], "Acme");
    assert_eq!(invoice["items"].as_array().unwrap().len(), 1);

    let quote = app
        .create_document(&token, &client_id, "QUOTE", 2.0, 50.0)
        .await;
    assert_eq!(money(&quote["vatAmount"]), Decimal::ZERO);
    assert_eq!(money(&quote["total"]), dec("100"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn invalid_items_and_foreign_clients_are_rejected() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("invalid@example.com").await;
    let (other, _) = app.register("other@example.com").await;
    let client_id = app.create_client(&token, "Mine").await;
    let foreign_client = app.create_client(&other, "Theirs").await;

    let response = app
        .post(
            &token,
            "/api/documents",
            json!({ "clientId": client_id, "type": "INVOICE", "items": [] }),
        )
        .await;
    assert_eq!(response.status(), 400);

    let response = app
        .post(
            &token,
            "/api/documents",
            json!({
                "clientId": client_id,
                "type": "INVOICE",
                "items": [{ "description": "Hours", "quantity": 0, "unitPrice": 10 }]
            }),
        )
        .await;
    assert_eq!(response.status(), 400);

    let response = app
        .post(
            &token,
            "/api/documents",
            json!({
                "clientId": foreign_client,
                "type": "INVOICE",
                "items": [{ "description": "Hours", "quantity": 1, "unitPrice": 10 }]
            }),
        )
        .await;
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn oversized_items_are_rejected() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("oversized@example.com").await;
    let client_id = app.create_client(&token, "Acme").await;

    for (quantity, unit_price) in [
        (json!(1e15), json!(1e15)),
        (json!(1e9), json!(1)),
        (json!(1), json!(1e12)),
        (json!(999_999), json!(999_999_999)),
    ] {
        let response = app
            .post(
                &token,
                "/api/documents",
                json!({
                    "clientId": client_id,
                    "type": "INVOICE",
                    "items": [{ "description": "Bulk", "quantity": quantity, "unitPrice": unit_price }]
                }),
            )
            .await;
        assert_eq!(response.status(), 400, "{quantity} x {unit_price}");
    }

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn items_are_stored_at_column_precision() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("precision@example.com").await;
    let client_id = app.create_client(&token, "Acme").await;

    let created: Value = app
        .post(
            &token,
            "/api/documents",
            json!({
                "clientId": client_id,
                "type": "QUOTE",
                "vatRate": 18.004,
                "items": [{ "description": "Parts", "quantity": 3, "unitPrice": 0.333 }]
            }),
        )
        .await
        .json()
        .await
        .unwrap();

    let item = &created["items"][0];
    assert_eq!(money(&item["unitPrice"]), dec("0.33"));
    assert_eq!(money(&item["total"]), dec("0.99"));
    assert_eq!(money(&created["subtotal"]), dec("0.99"));
    assert_eq!(money(&created["vatRate"]), dec("18"));

    let fetched: Value = app
        .get(&token, &format!("/api/documents/{}", created["id"].as_str().unwrap()))
        .await
        .json()
        .await
        .unwrap();
    let stored = &fetched["items"][0];
    assert_eq!(
        money(&stored["quantity"]) * money(&stored["unitPrice"]),
        money(&stored["total"])
    );
    assert_eq!(money(&fetched["subtotal"]), dec("0.99"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn update_replaces_items_and_keeps_number() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("update@example.com").await;
    let client_id = app.create_client(&token, "Acme").await;
    let created = app
        .create_document(&token, &client_id, "INVOICE", 1.0, 100.0)
        .await;
    let path = format!("/api/documents/{}", created["id"].as_str().unwrap());

    let response = app
        .put(
            &token,
            &path,
            json!({
                "notes": "Revised",
                "items": [
                    { "description": "Design", "quantity": 2, "unitPrice": 50 },
                    { "description": "Hosting", "quantity": 1, "unitPrice": 20 }
                ]
            }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await.unwrap();

    assert_eq!(updated["documentNumber"], created["documentNumber"]);
    assert_eq!(updated["type"], "INVOICE");
    assert_eq!(updated["notes"], "Revised");
    assert_eq!(updated["items"].as_array().unwrap().len(), 2);
    assert_eq!(money(&updated["subtotal"]), dec("120"));
    assert_eq!(money(&updated["vatAmount"]), dec("20.40"));
    assert_eq!(money(&updated["total"]), dec("140.40"));

    let response = app
        .patch(&token, &format!("{}/status", path), json!({ "status": "PAID" }))
        .await;
    assert_eq!(response.status(), 200);
    let paid: Value = response.json().await.unwrap();
    assert_eq!(paid["status"], "PAID");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn list_filters_by_type_and_searches_numbers() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("list@example.com").await;
    let client_id = app.create_client(&token, "Searchable Client").await;
    app.create_document(&token, &client_id, "INVOICE", 1.0, 10.0).await;
    app.create_document(&token, &client_id, "INVOICE", 1.0, 10.0).await;
    app.create_document(&token, &client_id, "RECEIPT", 1.0, 10.0).await;

    let body: Value = app
        .get(&token, "/api/documents?type=INVOICE")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["documents"][0]["client"]["name"], "Searchable Client");
    assert_eq!(body["documents"][0]["items"].as_array().unwrap().len(), 1);

    let body: Value = app
        .get(&token, "/api/documents?search=2&type=INVOICE")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["documents"][0]["documentNumber"], 2);

    let body: Value = app
        .get(&token, "/api/documents?search=searchable")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["pagination"]["total"], 3);

    let response = app.get(&token, "/api/documents?status=LOST").await;
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn converting_a_quote_creates_a_draft_invoice() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("convert@example.com").await;
    let client_id = app.create_client(&token, "Acme").await;
    app.create_document(&token, &client_id, "INVOICE", 1.0, 10.0).await;
    let quote = app
        .create_document(&token, &client_id, "QUOTE", 2.0, 100.0)
        .await;
    let quote_path = format!("/api/documents/{}", quote["id"].as_str().unwrap());

    let response = app
        .post(&token, &format!("{}/convert", quote_path), json!({}))
        .await;
    assert_eq!(response.status(), 201);
    let invoice: Value = response.json().await.unwrap();

    assert_eq!(invoice["type"], "INVOICE");
    assert_eq!(invoice["status"], "DRAFT");
    assert_eq!(invoice["documentNumber"], 2);
    assert_eq!(money(&invoice["subtotal"]), dec("200"));
    assert_eq!(money(&invoice["vatAmount"]), dec("34"));
    assert_eq!(money(&invoice["total"]), dec("234"));

    let quote_after: Value = app.get(&token, &quote_path).await.json().await.unwrap();
    assert_eq!(quote_after["status"], "CANCELLED");

    let response = app
        .post(&token, &format!("{}/convert", quote_path), json!({}))
        .await;
    assert_eq!(response.status(), 400);

    let invoice_path = format!("/api/documents/{}/convert", invoice["id"].as_str().unwrap());
    let response = app.post(&token, &invoice_path, json!({})).await;
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn pdf_is_served_as_attachment() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("pdf@example.com").await;
    let client_id = app.create_client(&token, "Acme").await;
    let invoice = app
        .create_document(&token, &client_id, "INVOICE_RECEIPT", 1.0, 99.0)
        .await;

    let response = app
        .get(
            &token,
            &format!("/api/documents/{}/pdf", invoice["id"].as_str().unwrap()),
        )
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"document-1.pdf\""
    );
    let bytes = response.bytes().await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn deleting_a_document_removes_it() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("remove@example.com").await;
    let client_id = app.create_client(&token, "Acme").await;
    let doc = app
        .create_document(&token, &client_id, "RECEIPT", 1.0, 5.0)
        .await;
    let path = format!("/api/documents/{}", doc["id"].as_str().unwrap());

    assert_eq!(app.delete(&token, &path).await.status(), 200);
    assert_eq!(app.get(&token, &path).await.status(), 404);
    assert_eq!(app.delete(&token, &path).await.status(), 404);

    app.cleanup().await;
}
