//! Email provider implementations.
//!
//! This module contains the `EmailProvider` contract, the capability
//! declaration every backend publishes, and the factory that maps a
//! [`ProviderKind`] onto a concrete transport.

pub mod console;
pub mod mime;
pub mod mock;
pub mod resend;
pub mod ses;

pub use console::ConsoleProvider;
pub use mock::{MockProvider, MockProviderFactory};
pub use resend::ResendProvider;
pub use ses::SesProvider;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ConfigurationError;
use crate::models::{EmailMessage, HealthCheckResult, SendResult};
use async_trait::async_trait;
use serde::Serialize;

/// How a provider handles `send_bulk_emails`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkMode {
    /// One backend request for the whole batch.
    Native,
    /// One backend request per message.
    Sequential,
}

/// Feature set a provider declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderCapabilities {
    pub attachments: bool,
    pub bulk: BulkMode,
    pub delivery_tracking: bool,
    pub templates: bool,
}

/// Trait for email sending backends.
///
/// Only [`initialize`](EmailProvider::initialize) may fail with `Err`. Sends
/// and health checks report failures as data.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Provider name used in results and logs.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Validate credentials and build the backend client.
    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigurationError>;

    /// Send one message. Backend failures end up in `SendResult::error`.
    async fn send_email(&self, message: &EmailMessage) -> SendResult;

    /// Send several messages; the output has the same length and order as
    /// the input.
    async fn send_bulk_emails(&self, messages: &[EmailMessage]) -> Vec<SendResult>;

    /// Side-effect-free probe; safe to run concurrently with sends.
    async fn health_check(&self) -> HealthCheckResult;
}

/// Creates uninitialised provider instances for a configuration.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn EmailProvider>, ConfigurationError>;
}

/// Maps each implemented [`ProviderKind`] onto its transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProviderFactory;

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn EmailProvider>, ConfigurationError> {
        match config.kind() {
            ProviderKind::Resend => Ok(Box::new(ResendProvider::new())),
            ProviderKind::Ses => Ok(Box::new(SesProvider::new())),
            ProviderKind::Console => Ok(Box::new(ConsoleProvider::new())),
            kind @ (ProviderKind::Sendgrid
            | ProviderKind::Postmark
            | ProviderKind::Mailgun
            | ProviderKind::Smtp) => Err(ConfigurationError::NotImplemented(kind)),
        }
    }
}

/// Sequential bulk helper shared by providers without a batch endpoint.
pub(crate) async fn send_sequentially<P: EmailProvider + ?Sized>(
    provider: &P,
    messages: &[EmailMessage],
) -> Vec<SendResult> {
    let mut results = Vec::with_capacity(messages.len());
    for message in messages {
        results.push(provider.send_email(message).await);
    }
    results
}
