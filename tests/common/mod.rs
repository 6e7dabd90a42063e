#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use credkeeper::audit::{AuditEvent, MemoryAuditSink};
use credkeeper::auth::{AccessTokenMinter, AuthDependencies, AuthService, BcryptHasher, TokenPolicy};
use credkeeper::configuration::JwtSettings;
use credkeeper::email_client::EmailSender;
use credkeeper::error::EmailError;
use credkeeper::security::RateLimitConfig;
use credkeeper::startup::run;
use credkeeper::store::{InMemoryCredentialStore, LockoutPolicy};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub html: String,
}

/// Keeps outgoing mail instead of sending it.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingEmailSender {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(SentEmail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            html: html_content.to_string(),
        });
        Ok(())
    }
}

/// Every delivery fails, like an unreachable mail relay.
pub struct FailingEmailSender;

#[async_trait]
impl EmailSender for FailingEmailSender {
    async fn send_email(&self, _: &str, _: &str, _: &str) -> Result<(), EmailError> {
        Err(EmailError::SendFailed("relay unavailable".to_string()))
    }
}

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryCredentialStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub emails: Arc<RecordingEmailSender>,
    pub client: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_limit(1000).await
}

pub async fn spawn_app_with_limit(requests_per_minute: u32) -> TestApp {
    let emails = Arc::new(RecordingEmailSender::default());
    build_app(requests_per_minute, emails.clone(), emails).await
}

/// Mail goes to `email`; `emails` on the returned app stays empty.
pub async fn spawn_app_with_email(email: Arc<dyn EmailSender>) -> TestApp {
    build_app(1000, email, Arc::new(RecordingEmailSender::default())).await
}

async fn build_app(
    requests_per_minute: u32,
    email: Arc<dyn EmailSender>,
    emails: Arc<RecordingEmailSender>,
) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let store = Arc::new(InMemoryCredentialStore::new());
    let audit = Arc::new(MemoryAuditSink::new());

    let minter = AccessTokenMinter::new(&JwtSettings {
        secret: "integration-test-secret-with-32-plus-bytes".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 604800,
        issuer: "credkeeper-test".to_string(),
    })
    .expect("Failed to build minter");

    let service = AuthService::new(
        AuthDependencies {
            store: store.clone(),
            hasher: Arc::new(BcryptHasher::new(4)),
            minter: Arc::new(minter),
            audit: audit.clone(),
            email,
        },
        TokenPolicy {
            refresh_ttl: Duration::days(7),
            reset_ttl: Duration::minutes(30),
            reset_link_base_url: "https://app.test/reset-password".to_string(),
            lockout: LockoutPolicy {
                max_failed_attempts: 5,
                lockout: Duration::minutes(15),
            },
        },
    )
    .expect("Failed to build auth service");

    let rate_limit = RateLimitConfig {
        requests_per_minute,
        ..RateLimitConfig::default()
    };
    let server = run(listener, Arc::new(service), rate_limit).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        store,
        audit,
        emails,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn register(&self, email: &str, password: &str) -> reqwest::Response {
        self.post(
            "/auth/register",
            &serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.post(
            "/auth/login",
            &serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Register and log in, returning the token response body.
    pub async fn signed_in_user(&self, email: &str, password: &str) -> Value {
        assert_eq!(201, self.register(email, password).await.status().as_u16());
        let response = self.login(email, password).await;
        assert_eq!(200, response.status().as_u16());
        response.json().await.expect("Failed to parse token response")
    }

    /// Reset emails are sent in the background; wait for `count` of them.
    pub async fn wait_for_emails(&self, count: usize) -> Vec<SentEmail> {
        for _ in 0..200 {
            let sent = self.emails.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("Expected {} emails, got {}", count, self.emails.sent().len());
    }

    /// Wait for an audit event matching `predicate`.
    pub async fn wait_for_audit<F>(&self, predicate: F) -> AuditEvent
    where
        F: Fn(&AuditEvent) -> bool,
    {
        for _ in 0..200 {
            if let Some(event) = self.audit.events().into_iter().find(|e| predicate(e)) {
                return event;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("Expected audit event was never recorded");
    }

    /// Token embedded in the most recent reset email, once it has been sent.
    pub async fn last_reset_token(&self) -> String {
        let email = self.wait_for_emails(1).await.pop().expect("No email was sent");
        let start = email.html.find("token=").expect("No token in email") + "token=".len();
        email.html[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect()
    }
}
