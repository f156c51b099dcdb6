//! Data model for outgoing messages and delivery results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Sender of a message: a bare address or an address with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sender {
    Address(String),
    Named { email: String, name: String },
}

impl Sender {
    pub fn named(email: impl Into<String>, name: impl Into<String>) -> Self {
        Sender::Named {
            email: email.into(),
            name: name.into(),
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Sender::Address(email) => email,
            Sender::Named { email, .. } => email,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Sender::Address(_) => None,
            Sender::Named { name, .. } if name.is_empty() => None,
            Sender::Named { name, .. } => Some(name),
        }
    }

    /// RFC 5322 mailbox form: `Name <email>` or the bare address.
    pub fn mailbox(&self) -> String {
        match self.name() {
            Some(name) => format!("{} <{}>", name, self.email()),
            None => self.email().to_string(),
        }
    }

    /// Same sender with a different address, keeping the display name.
    pub fn with_email(&self, email: impl Into<String>) -> Self {
        match self {
            Sender::Address(_) => Sender::Address(email.into()),
            Sender::Named { name, .. } => Sender::Named {
                email: email.into(),
                name: name.clone(),
            },
        }
    }
}

impl From<&str> for Sender {
    fn from(email: &str) -> Self {
        Sender::Address(email.to_string())
    }
}

impl From<String> for Sender {
    fn from(email: String) -> Self {
        Sender::Address(email)
    }
}

/// File attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    /// Raw (not yet encoded) file content.
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Declared content type, or `application/octet-stream`.
    pub fn mime_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

/// Provider-side tag used for analytics and delivery tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

/// A single outgoing message.
///
/// Values are never mutated in place by the service: branding produces a new
/// message and leaves the caller's copy alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    pub from: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub subject: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Overrides the tenant profile's sending domain when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_domain: Option<String>,
}

impl EmailMessage {
    pub fn new(
        from: impl Into<Sender>,
        to: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            to: vec![to.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
            from: from.into(),
            reply_to: None,
            subject: subject.into(),
            html: html.into(),
            text: None,
            attachments: Vec::new(),
            headers: BTreeMap::new(),
            tags: Vec::new(),
            tenant_id: None,
            custom_domain: None,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }

    pub fn with_bcc(mut self, bcc: impl Into<String>) -> Self {
        self.bcc.push(bcc.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_custom_domain(mut self, domain: impl Into<String>) -> Self {
        self.custom_domain = Some(domain.into());
        self
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Basic shape validation performed before any provider is involved.
    ///
    /// All problems are collected into one `INVALID_MESSAGE` error.
    pub fn validate(&self) -> Result<(), EmailError> {
        let mut problems = Vec::new();

        if self.to.is_empty() {
            problems.push("at least one recipient is required".to_string());
        }
        for address in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !looks_like_address(address) {
                problems.push(format!("'{}' is not an email address", address));
            }
        }
        if !looks_like_address(self.from.email()) {
            problems.push(format!(
                "sender '{}' is not an email address",
                self.from.email()
            ));
        }
        if self.subject.trim().is_empty() {
            problems.push("subject must not be empty".to_string());
        }
        if self.html.trim().is_empty() && self.text.as_deref().is_none_or(|t| t.trim().is_empty())
        {
            problems.push("either html or text body is required".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EmailError::new(ErrorCode::InvalidMessage, problems.join("; ")))
        }
    }
}

/// `local@host`; single-label hosts such as `localhost` are accepted.
fn looks_like_address(value: &str) -> bool {
    let value = value.trim();
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Machine-readable error classification carried in [`EmailError`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRecipient,
    InvalidSender,
    DomainNotVerified,
    Unauthorized,
    Forbidden,
    RateLimited,
    InvalidRequest,
    NetworkError,
    Timeout,
    ServiceUnavailable,
    ProviderError,
    ProviderUnavailable,
    ConfigurationError,
    InvalidMessage,
    TemplateRenderFailed,
    BulkSendFailed,
    AllProvidersFailed,
}

impl ErrorCode {
    /// Codes that will never succeed on a retry. They skip the backoff loop
    /// and the fallback chain entirely.
    pub const NON_RETRYABLE: [ErrorCode; 5] = [
        ErrorCode::InvalidRecipient,
        ErrorCode::InvalidSender,
        ErrorCode::DomainNotVerified,
        ErrorCode::Unauthorized,
        ErrorCode::Forbidden,
    ];

    pub fn is_retryable(&self) -> bool {
        !Self::NON_RETRYABLE.contains(self)
    }
}

/// Failure details attached to an unsuccessful [`SendResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct EmailError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EmailError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
            details: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Outcome of one delivery. Always produced; never an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub provider: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EmailError>,
}

impl SendResult {
    /// Provider name reported when every provider in the chain failed.
    pub const FAILED_PROVIDER: &'static str = "Failed";

    pub fn sent(provider: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            provider: provider.into(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(provider: impl Into<String>, error: EmailError) -> Self {
        Self {
            success: false,
            message_id: None,
            provider: provider.into(),
            timestamp: Utc::now(),
            error: Some(error),
        }
    }

    /// Terminal result once primary and fallback are both exhausted.
    pub fn all_providers_failed(last_error: Option<&EmailError>) -> Self {
        let message = match last_error {
            Some(err) => format!("All email providers failed; last error: {}", err),
            None => "All email providers failed".to_string(),
        };
        let mut error = EmailError::new(ErrorCode::AllProvidersFailed, message);
        if let Some(last) = last_error {
            error.details = serde_json::to_value(last).ok();
        }
        Self::failed(Self::FAILED_PROVIDER, error)
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Result of probing a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub provider: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(provider: impl Into<String>, latency: Duration) -> Self {
        Self {
            healthy: true,
            provider: provider.into(),
            timestamp: Utc::now(),
            latency_ms: Some(millis(latency)),
            error: None,
        }
    }

    pub fn unhealthy(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            provider: provider.into(),
            timestamp: Utc::now(),
            latency_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(millis(latency));
        self
    }
}

/// Aggregate health of the configured provider chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailHealthReport {
    /// True when either configured backend is healthy.
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<HealthCheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<HealthCheckResult>,
}

impl EmailHealthReport {
    pub fn new(primary: Option<HealthCheckResult>, fallback: Option<HealthCheckResult>) -> Self {
        let healthy = primary.iter().chain(fallback.iter()).any(|h| h.healthy);
        Self {
            healthy,
            primary,
            fallback,
        }
    }
}
