//! Registration, login, profile and admin integration tests.

mod common;

use common::{money, TestApp, TEST_PASSWORD};
use invoicer_service::models::Role;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn register_returns_token_and_public_profile() {
    let app = TestApp::spawn().await;

    let (token, user) = app.register("Owner@Example.com ").await;

    assert!(!token.is_empty());
    assert_eq!(user["email"], "owner@example.com");
    assert_eq!(user["businessName"], "Test Studio");
    assert_eq!(user["role"], "USER");
    assert_eq!(money(&user["vatRate"]), Decimal::from(17));
    assert!(user.get("passwordHash").is_none());

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn duplicate_email_conflicts() {
    let app = TestApp::spawn().await;
    app.register("dup@example.com").await;

    let response = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "email": "DUP@example.com",
            "password": TEST_PASSWORD,
            "businessName": "Copycat"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Email already registered");

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn short_password_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "email": "short@example.com",
            "password": "1234567",
            "businessName": "Tiny"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn login_failures_share_one_message() {
    let app = TestApp::spawn().await;
    app.register("login@example.com").await;

    let ok = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "LOGIN@example.com", "password": TEST_PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    assert!(body["token"].is_string());

    for (email, password) in [
        ("login@example.com", "wrong-password"),
        ("nobody@example.com", TEST_PASSWORD),
    ] {
        let response = app
            .client
            .post(app.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Invalid credentials");
    }

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn profile_updates_keep_absent_fields() {
    let app = TestApp::spawn().await;
    let (token, _) = app.register("profile@example.com").await;

    let response = app
        .put(
            &token,
            "/api/auth/profile",
            json!({ "address": "1 Herzl St", "vatRate": 18 }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let profile: Value = response.json().await.unwrap();
    assert_eq!(profile["address"], "1 Herzl St");
    assert_eq!(profile["businessName"], "Test Studio");
    assert_eq!(money(&profile["vatRate"]), Decimal::from(18));

    let me: Value = app.get(&token, "/api/auth/me").await.json().await.unwrap();
    assert_eq!(me["phone"], "03-5555555");

    let response = app
        .put(&token, "/api/auth/profile", json!({ "vatRate": 150 }))
        .await;
    assert_eq!(response.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn admins_manage_roles_but_cannot_demote_themselves() {
    let app = TestApp::spawn().await;
    let (_, admin) = app.register("admin@example.com").await;
    let (_, member) = app.register("member@example.com").await;

    let admin_id = Uuid::parse_str(admin["id"].as_str().unwrap()).unwrap();
    app.db
        .update_user_role(admin_id, Role::Admin)
        .await
        .unwrap()
        .unwrap();

    // Roles travel in the token, so log in again after the change
    let login: Value = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "admin@example.com", "password": TEST_PASSWORD }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = login["token"].as_str().unwrap().to_string();

    let users: Value = app.get(&token, "/api/admin/users").await.json().await.unwrap();
    assert_eq!(users.as_array().unwrap().len(), 2);

    let member_path = format!("/api/admin/users/{}/role", member["id"].as_str().unwrap());
    let response = app.put(&token, &member_path, json!({ "role": "VIEWER" })).await;
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["role"], "VIEWER");

    let self_path = format!("/api/admin/users/{}/role", admin_id);
    let response = app.put(&token, &self_path, json!({ "role": "USER" })).await;
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}
