mod common;

use std::sync::Arc;

use common::{spawn_app, spawn_app_with_email, spawn_app_with_limit, FailingEmailSender};
use credkeeper::audit::AuditAction;
use credkeeper::store::CredentialStore;
use serde_json::{json, Value};

// --- Registration ---

#[tokio::test]
async fn register_returns_201_with_user_payload() {
    let app = spawn_app().await;

    let response = app
        .post(
            "/auth/register",
            &json!({
                "name": "John Doe",
                "email": "John@Example.com",
                "password": "SecurePass123"
            }),
        )
        .await;

    assert_eq!(201, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["email"], "john@example.com");
    assert_eq!(body["name"], "John Doe");
    assert!(body.get("password_hash").is_none());

    let user = app
        .store
        .find_user_by_email("john@example.com")
        .await
        .unwrap()
        .expect("User was not stored");
    assert_ne!(user.password_hash, "SecurePass123");
}

#[tokio::test]
async fn register_rejects_normalised_duplicates_with_409() {
    let app = spawn_app().await;
    assert_eq!(201, app.register("dup@example.com", "SecurePass123").await.status().as_u16());

    for variant in ["dup@example.com", "DUP@EXAMPLE.COM", "  Dup@Example.com  "] {
        let response = app.register(variant, "SecurePass123").await;
        assert_eq!(409, response.status().as_u16(), "variant {:?}", variant);
    }
}

#[tokio::test]
async fn register_returns_400_for_invalid_input() {
    let app = spawn_app().await;

    let cases = vec![
        (json!({"email": "not-an-email", "password": "SecurePass123"}), "invalid email"),
        (json!({"email": "weak@example.com", "password": "short"}), "short password"),
        (json!({"email": "weak@example.com", "password": "alllowercase123"}), "weak password"),
        (json!({"password": "SecurePass123"}), "missing email"),
    ];

    for (body, description) in cases {
        let response = app.post("/auth/register", &body).await;
        assert_eq!(400, response.status().as_u16(), "case: {}", description);
    }
}

// --- Login ---

#[tokio::test]
async fn login_returns_bearer_token_pair() {
    let app = spawn_app().await;

    let tokens = app.signed_in_user("login@example.com", "SecurePass123").await;

    assert!(tokens["access_token"].as_str().is_some());
    assert!(tokens["refresh_token"].as_str().is_some());
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 900);
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = spawn_app().await;
    app.register("known@example.com", "SecurePass123").await;

    let wrong_password = app.login("known@example.com", "WrongPass123").await;
    let unknown_user = app.login("unknown@example.com", "SecurePass123").await;

    assert_eq!(401, wrong_password.status().as_u16());
    assert_eq!(401, unknown_user.status().as_u16());

    let a: Value = wrong_password.json().await.unwrap();
    let b: Value = unknown_user.json().await.unwrap();
    assert_eq!(a["message"], b["message"]);
    assert_eq!(a["code"], b["code"]);

    let details: Vec<_> = app
        .audit
        .events()
        .into_iter()
        .filter(|e| e.action == AuditAction::Login)
        .map(|e| e.detail)
        .collect();
    assert_eq!(
        details,
        vec![Some("bad password".to_string()), Some("user not found".to_string())]
    );
}

#[tokio::test]
async fn login_returns_403_for_inactive_user() {
    let app = spawn_app().await;
    app.register("locked@example.com", "SecurePass123").await;
    let user = app
        .store
        .find_user_by_email("locked@example.com")
        .await
        .unwrap()
        .unwrap();
    app.store.set_user_active(user.id, false).await.unwrap();

    let response = app.login("locked@example.com", "SecurePass123").await;

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn login_locks_after_repeated_failures() {
    let app = spawn_app().await;
    app.register("guess@example.com", "SecurePass123").await;

    for _ in 0..5 {
        assert_eq!(401, app.login("guess@example.com", "WrongPass123").await.status().as_u16());
    }

    let response = app.login("guess@example.com", "SecurePass123").await;
    assert_eq!(403, response.status().as_u16());

    let user = app
        .store
        .find_user_by_email("guess@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.locked_until.is_some());
}

#[tokio::test]
async fn login_is_rate_limited_per_client() {
    let app = spawn_app_with_limit(2).await;

    for _ in 0..2 {
        assert_eq!(401, app.login("nobody@example.com", "SecurePass123").await.status().as_u16());
    }
    assert_eq!(429, app.login("nobody@example.com", "SecurePass123").await.status().as_u16());
}

// --- Refresh & logout ---

#[tokio::test]
async fn refresh_rotates_and_rejects_reuse() {
    let app = spawn_app().await;
    let tokens = app.signed_in_user("rotate@example.com", "SecurePass123").await;
    let original = tokens["refresh_token"].as_str().unwrap().to_string();

    let response = app.post("/auth/refresh", &json!({ "refresh_token": original })).await;
    assert_eq!(200, response.status().as_u16());
    let rotated: Value = response.json().await.unwrap();
    let rotated_token = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(rotated_token, original);

    let reuse = app.post("/auth/refresh", &json!({ "refresh_token": original })).await;
    assert_eq!(401, reuse.status().as_u16());
    let body: Value = reuse.json().await.unwrap();
    assert_eq!(body["message"], "Invalid or expired token");

    let last = app.audit.events().pop().unwrap();
    assert_eq!(last.action, AuditAction::Refresh);
    assert_eq!(last.detail.as_deref(), Some("refresh token reuse detected"));

    let next = app.post("/auth/refresh", &json!({ "refresh_token": rotated_token })).await;
    assert_eq!(200, next.status().as_u16());
}

#[tokio::test]
async fn refresh_uses_the_presented_users_token() {
    let app = spawn_app().await;
    let first = app.signed_in_user("first@example.com", "SecurePass123").await;
    // A newer token for another user must not shadow the first one
    let _second = app.signed_in_user("second@example.com", "SecurePass123").await;

    let response = app
        .post("/auth/refresh", &json!({ "refresh_token": first["refresh_token"] }))
        .await;
    assert_eq!(200, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    let me = app
        .client
        .get(&format!("{}/api/me", app.address))
        .bearer_auth(body["access_token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    let me: Value = me.json().await.unwrap();
    assert_eq!(me["email"], "first@example.com");
}

#[tokio::test]
async fn refresh_rejects_unknown_token() {
    let app = spawn_app().await;

    let response = app
        .post("/auth/refresh", &json!({ "refresh_token": "not-a-real-token" }))
        .await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn logout_revokes_refresh_token() {
    let app = spawn_app().await;
    let tokens = app.signed_in_user("logout@example.com", "SecurePass123").await;
    let refresh_token = tokens["refresh_token"].clone();

    let response = app.post("/auth/logout", &json!({ "refresh_token": refresh_token })).await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Logged out");

    let again = app.post("/auth/logout", &json!({ "refresh_token": refresh_token })).await;
    assert_eq!(400, again.status().as_u16());

    let refresh = app.post("/auth/refresh", &json!({ "refresh_token": refresh_token })).await;
    assert_eq!(401, refresh.status().as_u16());
}

// --- Password reset ---

#[tokio::test]
async fn forgot_password_responses_are_byte_identical() {
    let app = spawn_app().await;
    app.register("exists@example.com", "SecurePass123").await;

    let existing = app
        .post("/auth/forgot-password", &json!({ "email": "exists@example.com" }))
        .await;
    let missing = app
        .post("/auth/forgot-password", &json!({ "email": "missing@example.com" }))
        .await;

    assert_eq!(200, existing.status().as_u16());
    assert_eq!(existing.status(), missing.status());
    let existing_body = existing.bytes().await.unwrap();
    let missing_body = missing.bytes().await.unwrap();
    assert_eq!(existing_body, missing_body);

    let body: Value = serde_json::from_slice(&existing_body).unwrap();
    assert_eq!(body["detail"], "If the email exists, a reset link was sent.");

    let sent = app.wait_for_emails(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "exists@example.com");
    assert_eq!(sent[0].subject, "Reset your password");
}

#[tokio::test]
async fn forgot_password_hides_delivery_failures() {
    let app = spawn_app_with_email(Arc::new(FailingEmailSender)).await;
    app.register("bounce@example.com", "SecurePass123").await;

    let existing = app
        .post("/auth/forgot-password", &json!({ "email": "bounce@example.com" }))
        .await;
    let missing = app
        .post("/auth/forgot-password", &json!({ "email": "missing@example.com" }))
        .await;

    assert_eq!(200, existing.status().as_u16());
    assert_eq!(200, missing.status().as_u16());
    assert_eq!(existing.bytes().await.unwrap(), missing.bytes().await.unwrap());

    let event = app
        .wait_for_audit(|e| e.action == AuditAction::ForgotPassword && e.user_id.is_some())
        .await;
    assert!(!event.success);
    assert!(event.detail.is_some());
    assert_eq!(event.client_addr.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn reset_password_changes_login_password() {
    let app = spawn_app().await;
    app.signed_in_user("reset@example.com", "SecurePass123").await;

    app.post("/auth/forgot-password", &json!({ "email": "reset@example.com" }))
        .await;
    let token = app.last_reset_token().await;

    let response = app
        .post(
            "/auth/reset-password",
            &json!({ "token": token, "new_password": "NewPass123!" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Password updated");

    assert_eq!(200, app.login("reset@example.com", "NewPass123!").await.status().as_u16());
    assert_eq!(401, app.login("reset@example.com", "SecurePass123").await.status().as_u16());
}

#[tokio::test]
async fn reset_token_is_single_use_and_failures_look_alike() {
    let app = spawn_app().await;
    app.register("once@example.com", "SecurePass123").await;
    app.post("/auth/forgot-password", &json!({ "email": "once@example.com" }))
        .await;
    let token = app.last_reset_token().await;

    let first = app
        .post(
            "/auth/reset-password",
            &json!({ "token": token, "new_password": "NewPass123!" }),
        )
        .await;
    assert_eq!(200, first.status().as_u16());

    let reused = app
        .post(
            "/auth/reset-password",
            &json!({ "token": token, "new_password": "Another123!" }),
        )
        .await;
    let unknown = app
        .post(
            "/auth/reset-password",
            &json!({ "token": "bogus-token", "new_password": "Another123!" }),
        )
        .await;

    assert_eq!(400, reused.status().as_u16());
    assert_eq!(400, unknown.status().as_u16());
    let reused: Value = reused.json().await.unwrap();
    let unknown: Value = unknown.json().await.unwrap();
    assert_eq!(reused["message"], unknown["message"]);
    assert_eq!(reused["code"], unknown["code"]);

    assert_eq!(401, app.login("once@example.com", "Another123!").await.status().as_u16());
}

#[tokio::test]
async fn reset_password_revokes_existing_sessions() {
    let app = spawn_app().await;
    let tokens = app.signed_in_user("sessions@example.com", "SecurePass123").await;
    app.post("/auth/forgot-password", &json!({ "email": "sessions@example.com" }))
        .await;
    let token = app.last_reset_token().await;

    app.post(
        "/auth/reset-password",
        &json!({ "token": token, "new_password": "NewPass123!" }),
    )
    .await;

    let refresh = app
        .post("/auth/refresh", &json!({ "refresh_token": tokens["refresh_token"] }))
        .await;
    assert_eq!(401, refresh.status().as_u16());
}

// --- Protected routes ---

#[tokio::test]
async fn me_requires_valid_access_token() {
    let app = spawn_app().await;
    let tokens = app.signed_in_user("me@example.com", "SecurePass123").await;

    let missing = app
        .client
        .get(&format!("{}/api/me", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(401, missing.status().as_u16());

    let invalid = app
        .client
        .get(&format!("{}/api/me", app.address))
        .bearer_auth("invalid.token.here")
        .send()
        .await
        .unwrap();
    assert_eq!(401, invalid.status().as_u16());

    let valid = app
        .client
        .get(&format!("{}/api/me", app.address))
        .bearer_auth(tokens["access_token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(200, valid.status().as_u16());
    let body: Value = valid.json().await.unwrap();
    assert_eq!(body["email"], "me@example.com");
}

#[tokio::test]
async fn change_password_requires_current_password_and_revokes_sessions() {
    let app = spawn_app().await;
    let tokens = app.signed_in_user("change@example.com", "SecurePass123").await;
    let access_token = tokens["access_token"].as_str().unwrap();
    let url = format!("{}/api/change-password", app.address);

    let unauthenticated = app
        .client
        .post(&url)
        .json(&json!({ "current_password": "SecurePass123", "new_password": "NewPass123!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(401, unauthenticated.status().as_u16());

    let wrong_current = app
        .client
        .post(&url)
        .bearer_auth(access_token)
        .json(&json!({ "current_password": "WrongPass123", "new_password": "NewPass123!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(401, wrong_current.status().as_u16());

    let changed = app
        .client
        .post(&url)
        .bearer_auth(access_token)
        .json(&json!({ "current_password": "SecurePass123", "new_password": "NewPass123!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(200, changed.status().as_u16());
    let body: Value = changed.json().await.unwrap();
    assert_eq!(body["detail"], "Password updated");

    assert_eq!(401, app.login("change@example.com", "SecurePass123").await.status().as_u16());
    assert_eq!(200, app.login("change@example.com", "NewPass123!").await.status().as_u16());

    let refresh = app
        .post("/auth/refresh", &json!({ "refresh_token": tokens["refresh_token"] }))
        .await;
    assert_eq!(401, refresh.status().as_u16());
}

#[tokio::test]
async fn audit_events_carry_client_address() {
    let app = spawn_app().await;
    app.register("audit@example.com", "SecurePass123").await;

    let event = app.audit.events().pop().unwrap();
    assert_eq!(event.action, AuditAction::Register);
    assert!(event.success);
    assert_eq!(event.client_addr.as_deref(), Some("127.0.0.1"));
}
