use async_trait::async_trait;
use serde::Serialize;

use crate::error::EmailError;
use crate::validators::is_valid_email;

pub const RESET_EMAIL_SUBJECT: &str = "Reset your password";

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<(), EmailError>;
}

/// A sender address that passed email validation.
#[derive(Clone, Debug)]
pub struct SenderEmail(String);

impl SenderEmail {
    pub fn parse(s: String) -> Result<Self, EmailError> {
        let email = is_valid_email(&s).map_err(|e| EmailError::InvalidRecipient(e.to_string()))?;
        Ok(Self(email))
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
pub struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(rename = "Html")]
    html: &'a str,
    #[serde(rename = "Subject")]
    subject: &'a str,
}

/// HTTP email API client
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: SenderEmail,
}

impl EmailClient {
    pub fn new(base_url: String, sender: SenderEmail, timeout: std::time::Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build email HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });

        Self {
            http_client,
            base_url,
            sender,
        }
    }
}

#[async_trait]
impl EmailSender for EmailClient {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<(), EmailError> {
        let url = format!("{}/email", self.base_url);
        let request = SendEmailRequest {
            from: self.sender.inner(),
            to: recipient,
            subject,
            html: html_content,
        };

        self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send email: {}", e);
                if e.is_timeout() || e.is_connect() {
                    EmailError::ServiceUnavailable(e.to_string())
                } else {
                    EmailError::SendFailed(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| {
                tracing::error!("Email service returned error: {}", e);
                EmailError::SendFailed(e.to_string())
            })?;

        Ok(())
    }
}

/// Writes outgoing mail metadata to the log instead of delivering it.
/// The body is never logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<(), EmailError> {
        tracing::info!(
            recipient = %recipient,
            subject = %subject,
            body_length = html_content.len(),
            "Email delivery disabled, message not sent"
        );
        Ok(())
    }
}

pub fn reset_link(link_base_url: &str, token: &str) -> String {
    format!("{}?token={}", link_base_url, token)
}

/// `ttl` is the reset token lifetime; the stated expiry follows it.
pub fn reset_email_body(link: &str, ttl: chrono::Duration) -> String {
    let minutes = ttl.num_minutes().max(1);
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    format!(
        "<p>We received a request to reset your password.</p>\
         <p><a href=\"{link}\">Reset your password</a></p>\
         <p>This link expires in {minutes} {unit}. If you did not ask for a reset, ignore this email.</p>",
        link = link,
        minutes = minutes,
        unit = unit
    )
}
