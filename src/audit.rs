/// Audit trail
///
/// Every credential operation reports its outcome here with the precise
/// reason, even when the caller only sees a generic failure. Recording is
/// fire-and-forget: it never blocks or fails the calling operation.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    Login,
    Logout,
    Refresh,
    ForgotPassword,
    ResetPassword,
    ChangePassword,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Register => "register",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Refresh => "refresh",
            AuditAction::ForgotPassword => "forgot_password",
            AuditAction::ResetPassword => "reset_password",
            AuditAction::ChangePassword => "change_password",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub user_id: Option<Uuid>,
    pub success: bool,
    pub detail: Option<String>,
    pub client_addr: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn success(action: AuditAction, user_id: Option<Uuid>) -> Self {
        Self {
            action,
            user_id,
            success: true,
            detail: None,
            client_addr: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn failure(action: AuditAction, user_id: Option<Uuid>, detail: impl Into<String>) -> Self {
        Self {
            action,
            user_id,
            success: false,
            detail: Some(detail.into()),
            client_addr: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_client_addr(mut self, client_addr: Option<String>) -> Self {
        self.client_addr = client_addr;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events as structured log lines on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let user_id = event.user_id.map(|id| id.to_string());
        tracing::info!(
            target: "audit",
            action = %event.action,
            user_id = ?user_id,
            success = event.success,
            detail = ?event.detail,
            client_addr = ?event.client_addr,
            "Audit event"
        );
    }
}

/// Appends audit events to the `audit_logs` table on a background task.
///
/// Events the database refuses go to the fallback sink (the `audit` log
/// target) so they are never dropped silently.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
    fallback: Arc<dyn AuditSink>,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            fallback: Arc::new(TracingAuditSink),
        }
    }
}

impl AuditSink for PgAuditSink {
    fn record(&self, event: AuditEvent) {
        let pool = self.pool.clone();
        let fallback = self.fallback.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_logs (id, user_id, action, success, details, ip_address, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(event.user_id)
            .bind(event.action.as_str())
            .bind(event.success)
            .bind(&event.detail)
            .bind(&event.client_addr)
            .bind(event.occurred_at)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::error!(
                    action = %event.action,
                    error = %e,
                    "Failed to write audit log"
                );
                fallback.record(event);
            }
        });
    }
}

/// Keeps audit events in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
