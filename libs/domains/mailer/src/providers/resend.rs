//! Resend email provider.
//!
//! Cloud transactional API: structured attachments and tags go straight into
//! the JSON payload, and bulk sends use the native batch endpoint.

use super::{BulkMode, EmailProvider, ProviderCapabilities, send_sequentially};
use crate::config::{ProviderConfig, ProviderKind, keys};
use crate::error::ConfigurationError;
use crate::models::{EmailError, EmailMessage, ErrorCode, HealthCheckResult, SendResult};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const NAME: &str = "Resend";

/// Resend API base URL.
pub const RESEND_API_URL: &str = "https://api.resend.com";

/// Largest batch the API accepts in one request.
const MAX_BATCH: usize = 100;

/// Resend email provider.
#[derive(Debug, Clone)]
pub struct ResendProvider {
    client: Option<Client>,
    api_url: String,
}

impl ResendProvider {
    /// Create an uninitialised provider; call `initialize` before sending.
    pub fn new() -> Self {
        Self {
            client: None,
            api_url: RESEND_API_URL.to_string(),
        }
    }

    fn client(&self) -> Result<&Client, EmailError> {
        self.client.as_ref().ok_or_else(|| {
            EmailError::new(ErrorCode::ConfigurationError, "Resend provider is not initialized")
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, EmailError> {
        let client = self.client()?;
        let response = client
            .post(format!("{}{}", self.api_url, path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

impl Default for ResendProvider {
    fn default() -> Self {
        Self::new()
    }
}

// Resend API request/response structures

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: String,
    to: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    cc: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bcc: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<ResendAttachment<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<ResendTag<'a>>,
}

impl<'a> From<&'a EmailMessage> for ResendEmail<'a> {
    fn from(message: &'a EmailMessage) -> Self {
        Self {
            from: message.from.mailbox(),
            to: &message.to,
            cc: non_empty(&message.cc),
            bcc: non_empty(&message.bcc),
            reply_to: message.reply_to.as_deref(),
            subject: &message.subject,
            html: &message.html,
            text: message.text.as_deref(),
            attachments: message
                .attachments
                .iter()
                .map(|a| ResendAttachment {
                    filename: &a.filename,
                    content: BASE64.encode(&a.content),
                    content_type: a.content_type.as_deref(),
                })
                .collect(),
            headers: (!message.headers.is_empty()).then_some(&message.headers),
            tags: message
                .tags
                .iter()
                .map(|t| ResendTag {
                    name: &t.name,
                    value: &t.value,
                })
                .collect(),
        }
    }
}

fn non_empty(addresses: &[String]) -> Option<&[String]> {
    (!addresses.is_empty()).then_some(addresses)
}

#[derive(Debug, Serialize)]
struct ResendAttachment<'a> {
    filename: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ResendTag<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct SentResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    data: Vec<SentResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResendErrorBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

/// Map a Resend error response onto the shared error codes.
fn classify(status: u16, name: &str, message: &str) -> ErrorCode {
    let message = message.to_ascii_lowercase();
    match (status, name) {
        (_, "invalid_from_address") => ErrorCode::InvalidSender,
        (_, "missing_api_key" | "invalid_api_key") => ErrorCode::Unauthorized,
        (_, "rate_limit_exceeded" | "daily_quota_exceeded") => ErrorCode::RateLimited,
        (401, _) => ErrorCode::Unauthorized,
        (403, _) if message.contains("not verified") => ErrorCode::DomainNotVerified,
        (403, _) => ErrorCode::Forbidden,
        (400 | 422, _) if message.contains("`to`") || message.contains("recipient") => {
            ErrorCode::InvalidRecipient
        }
        (400 | 404 | 405 | 409 | 422, _) => ErrorCode::InvalidRequest,
        (429, _) => ErrorCode::RateLimited,
        (500..=599, _) => ErrorCode::ServiceUnavailable,
        _ => ErrorCode::ProviderError,
    }
}

fn transport_error(err: reqwest::Error) -> EmailError {
    let code = if err.is_timeout() {
        ErrorCode::Timeout
    } else {
        ErrorCode::NetworkError
    };
    EmailError::new(code, format!("Resend request failed: {}", err))
}

async fn error_from_response(response: reqwest::Response) -> EmailError {
    let status = response.status().as_u16();
    let raw = response.text().await.unwrap_or_default();
    let body: ResendErrorBody = serde_json::from_str(&raw).unwrap_or_default();
    let message = if body.message.is_empty() {
        raw.clone()
    } else {
        body.message.clone()
    };

    error!(status = status, name = %body.name, error = %message, "Resend API error");

    let mut err = EmailError::new(classify(status, &body.name, &message), message)
        .with_status(status);
    if !body.name.is_empty() {
        err = err.with_details(serde_json::json!({ "name": body.name }));
    }
    err
}

#[async_trait]
impl EmailProvider for ResendProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            attachments: true,
            bulk: BulkMode::Native,
            delivery_tracking: true,
            templates: true,
        }
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigurationError> {
        if config.kind() != ProviderKind::Resend {
            return Err(ConfigurationError::InvalidProviderConfig {
                provider: ProviderKind::Resend,
                problems: vec![format!("received configuration for '{}'", config.kind())],
            });
        }
        config.validate()?;

        let client_error = |details: String| ConfigurationError::Client {
            provider: ProviderKind::Resend,
            details,
        };

        let api_key = config.credential(keys::API_KEY).unwrap_or_default();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| client_error(e.to_string()))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .map_err(|e| client_error(e.to_string()))?;

        self.api_url = config
            .setting(keys::API_URL)
            .unwrap_or(RESEND_API_URL)
            .trim_end_matches('/')
            .to_string();
        self.client = Some(client);
        Ok(())
    }

    async fn send_email(&self, message: &EmailMessage) -> SendResult {
        debug!(
            to = ?message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "Sending email via Resend"
        );

        let payload = ResendEmail::from(message);
        let response = match self.post("/emails", &payload).await {
            Ok(response) => response,
            Err(err) => return SendResult::failed(NAME, err),
        };

        match response.json::<SentResponse>().await {
            Ok(sent) => {
                info!(message_id = %sent.id, "Email sent successfully via Resend");
                SendResult::sent(NAME, Some(sent.id))
            }
            // Accepted by the API even though the body was unreadable.
            Err(e) => {
                debug!(error = %e, "Resend response had no message id");
                SendResult::sent(NAME, None)
            }
        }
    }

    async fn send_bulk_emails(&self, messages: &[EmailMessage]) -> Vec<SendResult> {
        // The batch endpoint rejects attachments.
        if messages.iter().any(EmailMessage::has_attachments) {
            return send_sequentially(self, messages).await;
        }

        let mut results = Vec::with_capacity(messages.len());
        for chunk in messages.chunks(MAX_BATCH) {
            let payload: Vec<ResendEmail<'_>> = chunk.iter().map(ResendEmail::from).collect();

            debug!(batch_size = chunk.len(), "Sending batch via Resend");

            let outcome = match self.post("/emails/batch", &payload).await {
                Ok(response) => response
                    .json::<BatchResponse>()
                    .await
                    .map(|batch| batch.data)
                    .unwrap_or_default(),
                Err(err) => {
                    results.extend(chunk.iter().map(|_| SendResult::failed(NAME, err.clone())));
                    continue;
                }
            };

            let mut ids = outcome.into_iter().map(|sent| sent.id);
            results.extend(chunk.iter().map(|_| SendResult::sent(NAME, ids.next())));
        }
        results
    }

    async fn health_check(&self) -> HealthCheckResult {
        let client = match self.client() {
            Ok(client) => client,
            Err(err) => return HealthCheckResult::unhealthy(NAME, err.message),
        };

        let started = Instant::now();
        let response = match client.get(format!("{}/domains", self.api_url)).send().await {
            Ok(response) => response,
            Err(err) => return HealthCheckResult::unhealthy(NAME, transport_error(err).message),
        };

        if response.status().is_success() {
            return HealthCheckResult::healthy(NAME, started.elapsed());
        }

        let err = error_from_response(response).await;
        let restricted = err
            .details
            .as_ref()
            .and_then(|d| d.get("name"))
            .and_then(|n| n.as_str())
            == Some("restricted_api_key");

        // Sending-only keys cannot list domains but are valid for delivery.
        if restricted {
            HealthCheckResult::healthy(NAME, started.elapsed())
        } else {
            HealthCheckResult::unhealthy(NAME, err.to_string()).with_latency(started.elapsed())
        }
    }
}
