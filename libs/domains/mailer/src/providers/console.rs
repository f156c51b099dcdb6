//! Local development sink.
//!
//! Nothing leaves the process: every message is logged and kept in an
//! in-memory outbox. The sink is always healthy and never fails a send.

use super::{BulkMode, EmailProvider, ProviderCapabilities, send_sequentially};
use crate::config::ProviderConfig;
use crate::error::ConfigurationError;
use crate::models::{EmailMessage, HealthCheckResult, SendResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const NAME: &str = "Console";

/// Development provider that logs instead of delivering.
#[derive(Debug, Clone, Default)]
pub struct ConsoleProvider {
    outbox: Arc<Mutex<Vec<EmailMessage>>>,
}

impl ConsoleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages "sent" so far.
    pub fn outbox(&self) -> Vec<EmailMessage> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EmailProvider for ConsoleProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            attachments: true,
            bulk: BulkMode::Sequential,
            delivery_tracking: false,
            templates: false,
        }
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigurationError> {
        config.validate()
    }

    async fn send_email(&self, message: &EmailMessage) -> SendResult {
        let message_id = format!("console-{}", Uuid::new_v4());

        info!(
            message_id = %message_id,
            from = %message.from.mailbox(),
            to = ?message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            attachment_names = ?message.attachments.iter().map(|a| a.filename.as_str()).collect::<Vec<_>>(),
            tenant_id = ?message.tenant_id,
            "Console email (not delivered)"
        );

        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(message.clone());
        }

        SendResult::sent(NAME, Some(message_id))
    }

    async fn send_bulk_emails(&self, messages: &[EmailMessage]) -> Vec<SendResult> {
        send_sequentially(self, messages).await
    }

    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy(NAME, Duration::ZERO)
    }
}
