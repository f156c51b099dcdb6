//! AWS SES (Simple Email Service) provider
//!
//! Used as a relay: plain messages go through the simple content API, but as
//! soon as a message carries attachments or custom headers the whole MIME
//! document is built by hand (see [`super::mime`]) and submitted as raw bytes.
//!
//! ## Configuration
//!
//! Credentials come from the resolved [`ProviderConfig`]:
//! - `access_key_id`, `secret_access_key`, `region`
//! - optional `configuration_set` setting for event publishing

use super::mime::{build_raw_message, encode_mailbox, new_boundary};
use super::{BulkMode, EmailProvider, ProviderCapabilities, send_sequentially};
use crate::config::{ProviderConfig, ProviderKind, keys};
use crate::error::ConfigurationError;
use crate::models::{EmailError, EmailMessage, ErrorCode, HealthCheckResult, SendResult};
use async_trait::async_trait;
use aws_sdk_sesv2::Client;
use aws_sdk_sesv2::config::http::HttpResponse;
use aws_sdk_sesv2::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_sesv2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sesv2::primitives::Blob;
use aws_sdk_sesv2::types::{
    Body, Content, Destination, EmailContent, Message, MessageTag, RawMessage,
};
use std::time::Instant;
use tracing::{debug, error, info};

const NAME: &str = "AmazonSES";

/// AWS SES email provider
#[derive(Debug, Clone, Default)]
pub struct SesProvider {
    client: Option<Client>,
    configuration_set: Option<String>,
}

impl SesProvider {
    /// Create an uninitialised provider; call `initialize` before sending.
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<&Client, EmailError> {
        self.client.as_ref().ok_or_else(|| {
            EmailError::new(ErrorCode::ConfigurationError, "SES provider is not initialized")
        })
    }

    /// Whether the message has to be sent as a hand-built MIME document.
    fn needs_raw(message: &EmailMessage) -> bool {
        message.has_attachments() || !message.headers.is_empty()
    }

    fn build_content(message: &EmailMessage) -> Result<EmailContent, EmailError> {
        let invalid = |e: aws_sdk_sesv2::error::BuildError| {
            EmailError::new(ErrorCode::InvalidRequest, format!("Invalid SES content: {}", e))
        };

        if Self::needs_raw(message) {
            let raw = build_raw_message(message, &new_boundary());
            let raw = RawMessage::builder()
                .data(Blob::new(raw.into_bytes()))
                .build()
                .map_err(invalid)?;
            return Ok(EmailContent::builder().raw(raw).build());
        }

        let mut body = Body::builder().html(
            Content::builder()
                .data(&message.html)
                .charset("UTF-8")
                .build()
                .map_err(invalid)?,
        );
        if let Some(text) = &message.text {
            body = body.text(
                Content::builder()
                    .data(text)
                    .charset("UTF-8")
                    .build()
                    .map_err(invalid)?,
            );
        }

        let simple = Message::builder()
            .subject(
                Content::builder()
                    .data(&message.subject)
                    .charset("UTF-8")
                    .build()
                    .map_err(invalid)?,
            )
            .body(body.build())
            .build();

        Ok(EmailContent::builder().simple(simple).build())
    }

    /// SES rejects raw UTF-8 in the sender, so the display name is encoded.
    fn from_address(message: &EmailMessage) -> String {
        encode_mailbox(message.from.email(), message.from.name())
    }

    async fn try_send(&self, message: &EmailMessage) -> Result<Option<String>, EmailError> {
        let client = self.client()?;
        let content = Self::build_content(message)?;

        let destination = Destination::builder()
            .set_to_addresses(Some(message.to.clone()))
            .set_cc_addresses((!message.cc.is_empty()).then(|| message.cc.clone()))
            .set_bcc_addresses((!message.bcc.is_empty()).then(|| message.bcc.clone()))
            .build();

        let mut request = client
            .send_email()
            .from_email_address(Self::from_address(message))
            .destination(destination)
            .content(content);

        if let Some(reply_to) = &message.reply_to {
            request = request.reply_to_addresses(reply_to);
        }
        if let Some(set) = &self.configuration_set {
            request = request.configuration_set_name(set);
        }
        for tag in &message.tags {
            let tag = MessageTag::builder()
                .name(&tag.name)
                .value(&tag.value)
                .build()
                .map_err(|e| {
                    EmailError::new(ErrorCode::InvalidRequest, format!("Invalid SES tag: {}", e))
                })?;
            request = request.email_tags(tag);
        }

        let output = request.send().await.map_err(sdk_error)?;
        Ok(output.message_id().map(str::to_string))
    }
}

/// Map an SES service error code onto the shared error codes.
pub(crate) fn classify(code: Option<&str>, message: &str) -> ErrorCode {
    let message = message.to_ascii_lowercase();
    match code {
        Some("MailFromDomainNotVerifiedException") => ErrorCode::DomainNotVerified,
        Some("MessageRejected") if message.contains("not verified") => {
            ErrorCode::DomainNotVerified
        }
        Some("MessageRejected") if message.contains("address") => ErrorCode::InvalidRecipient,
        Some("MessageRejected" | "BadRequestException" | "NotFoundException" | "ValidationException") => {
            ErrorCode::InvalidRequest
        }
        Some("AccountSuspendedException" | "SendingPausedException") => ErrorCode::Forbidden,
        Some(
            "AccessDeniedException"
            | "AccessDenied"
            | "UnrecognizedClientException"
            | "InvalidClientTokenId"
            | "SignatureDoesNotMatch"
            | "ExpiredTokenException",
        ) => ErrorCode::Unauthorized,
        Some(
            "TooManyRequestsException"
            | "LimitExceededException"
            | "Throttling"
            | "ThrottlingException",
        ) => ErrorCode::RateLimited,
        Some("InternalFailure" | "ServiceUnavailable") => ErrorCode::ServiceUnavailable,
        _ => ErrorCode::ProviderError,
    }
}

fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> EmailError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = match &err {
        SdkError::TimeoutError(_) => ErrorCode::Timeout,
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => ErrorCode::NetworkError,
        _ => classify(err.code(), err.message().unwrap_or_default()),
    };
    let service_code = err.code().map(str::to_string);
    let message = format!("SES error: {}", DisplayErrorContext(&err));

    error!(error = %message, code = ?service_code, "AWS SES request failed");

    let mut email_error = EmailError::new(code, message);
    if let Some(status) = status {
        email_error = email_error.with_status(status);
    }
    if let Some(service_code) = service_code {
        email_error = email_error.with_details(serde_json::json!({ "code": service_code }));
    }
    email_error
}

#[async_trait]
impl EmailProvider for SesProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            attachments: true,
            bulk: BulkMode::Sequential,
            // Needs a configuration set with event destinations.
            delivery_tracking: false,
            templates: true,
        }
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigurationError> {
        if config.kind() != ProviderKind::Ses {
            return Err(ConfigurationError::InvalidProviderConfig {
                provider: ProviderKind::Ses,
                problems: vec![format!("received configuration for '{}'", config.kind())],
            });
        }
        config.validate()?;

        let credentials = Credentials::new(
            config.credential(keys::ACCESS_KEY_ID).unwrap_or_default(),
            config.credential(keys::SECRET_ACCESS_KEY).unwrap_or_default(),
            None, // session token
            None, // expiry
            "mailer-config",
        );
        let region = config.credential(keys::REGION).unwrap_or_default().to_string();

        let sdk_config = aws_sdk_sesv2::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .build();

        self.client = Some(Client::from_conf(sdk_config));
        self.configuration_set = config.setting(keys::CONFIGURATION_SET).map(str::to_string);
        Ok(())
    }

    async fn send_email(&self, message: &EmailMessage) -> SendResult {
        debug!(
            to = ?message.to,
            subject = %message.subject,
            raw = Self::needs_raw(message),
            "Sending email via AWS SES"
        );

        match self.try_send(message).await {
            Ok(message_id) => {
                info!(message_id = ?message_id, "Email sent successfully via AWS SES");
                SendResult::sent(NAME, message_id)
            }
            Err(err) => SendResult::failed(NAME, err),
        }
    }

    async fn send_bulk_emails(&self, messages: &[EmailMessage]) -> Vec<SendResult> {
        send_sequentially(self, messages).await
    }

    async fn health_check(&self) -> HealthCheckResult {
        let client = match self.client() {
            Ok(client) => client,
            Err(err) => return HealthCheckResult::unhealthy(NAME, err.message),
        };

        // GetAccount is a lightweight call that confirms credentials and access
        let started = Instant::now();
        match client.get_account().send().await {
            Ok(account) if account.sending_enabled() => {
                HealthCheckResult::healthy(NAME, started.elapsed())
            }
            Ok(_) => HealthCheckResult::unhealthy(NAME, "Sending is disabled for this account")
                .with_latency(started.elapsed()),
            Err(err) => HealthCheckResult::unhealthy(NAME, sdk_error(err).message)
                .with_latency(started.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, Sender};
    use std::collections::BTreeMap;

    fn ses_config() -> ProviderConfig {
        let credentials = BTreeMap::from([
            (keys::ACCESS_KEY_ID.to_string(), "AKIAEXAMPLE".to_string()),
            (keys::SECRET_ACCESS_KEY.to_string(), "secret".to_string()),
            (keys::REGION.to_string(), "us-east-1".to_string()),
        ]);
        ProviderConfig::new(ProviderKind::Ses, credentials, BTreeMap::new(), false).unwrap()
    }

    #[test]
    fn test_classify_ses_errors() {
        assert_eq!(
            classify(Some("MailFromDomainNotVerifiedException"), ""),
            ErrorCode::DomainNotVerified
        );
        assert_eq!(
            classify(Some("MessageRejected"), "Email address is not verified."),
            ErrorCode::DomainNotVerified
        );
        assert_eq!(
            classify(Some("MessageRejected"), "Illegal address"),
            ErrorCode::InvalidRecipient
        );
        assert_eq!(classify(Some("AccountSuspendedException"), ""), ErrorCode::Forbidden);
        assert_eq!(classify(Some("TooManyRequestsException"), ""), ErrorCode::RateLimited);
        assert_eq!(classify(Some("InvalidClientTokenId"), ""), ErrorCode::Unauthorized);
        assert_eq!(classify(Some("BadRequestException"), ""), ErrorCode::InvalidRequest);
        assert_eq!(classify(None, "connection reset"), ErrorCode::ProviderError);
    }

    #[test]
    fn test_raw_path_only_for_attachments_or_headers() {
        let plain = EmailMessage::new("a@example.com", "b@example.com", "Hi", "<p>Hi</p>");
        assert!(!SesProvider::needs_raw(&plain));

        let with_attachment =
            plain.clone().with_attachment(Attachment::new("a.csv", b"x,y".to_vec()));
        assert!(SesProvider::needs_raw(&with_attachment));

        let with_header = plain.with_header("List-Unsubscribe", "<mailto:u@example.com>");
        assert!(SesProvider::needs_raw(&with_header));
    }

    #[test]
    fn test_non_ascii_display_name_is_encoded_for_simple_path() {
        let message = EmailMessage::new(
            Sender::named("hello@cafe.example", "Café Zürich"),
            "b@example.com",
            "Hi",
            "<p>Hi</p>",
        );

        let mailbox = SesProvider::from_address(&message);

        assert!(mailbox.is_ascii());
        assert!(mailbox.starts_with("=?UTF-8?B?"));
        assert!(mailbox.ends_with(" <hello@cafe.example>"));
    }

    #[test]
    fn test_raw_content_is_built_for_attachments() {
        let message = EmailMessage::new("a@example.com", "b@example.com", "Hi", "<p>Hi</p>")
            .with_attachment(Attachment::new("a.csv", b"x,y".to_vec()));

        let content = SesProvider::build_content(&message).unwrap();

        assert!(content.raw().is_some());
        assert!(content.simple().is_none());
    }

    #[tokio::test]
    async fn test_initialize_builds_client() {
        let mut provider = SesProvider::new();
        provider.initialize(&ses_config()).unwrap();
        assert!(provider.client.is_some());
    }

    #[test]
    fn test_initialize_rejects_other_variant() {
        let mut provider = SesProvider::new();
        let err = provider.initialize(&ProviderConfig::console()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidProviderConfig { .. }));
    }

    #[tokio::test]
    async fn test_uninitialized_health_check_is_unhealthy() {
        let health = SesProvider::new().health_check().await;
        assert!(!health.healthy);
        assert_eq!(health.provider, "AmazonSES");
    }
}
