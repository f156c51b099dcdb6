//! Audit trail of delivered messages.
//!
//! Writes are fire-and-forget: the facade spawns them after a successful send
//! and a failing sink never changes the `SendResult`.

use crate::error::LogSinkError;
use crate::models::{EmailMessage, SendResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLogEntry {
    pub message_id: Option<String>,
    pub provider: String,
    pub to: Vec<String>,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl EmailLogEntry {
    pub fn new(message: &EmailMessage, result: &SendResult) -> Self {
        Self {
            message_id: result.message_id.clone(),
            provider: result.provider.clone(),
            to: message.to.clone(),
            subject: message.subject.clone(),
            timestamp: result.timestamp,
            tenant_id: message.tenant_id.clone(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailLogSink: Send + Sync {
    async fn write(&self, entry: EmailLogEntry) -> Result<(), LogSinkError>;
}

/// Sink that emits a structured `tracing` event per delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

#[async_trait]
impl EmailLogSink for TracingLogSink {
    async fn write(&self, entry: EmailLogEntry) -> Result<(), LogSinkError> {
        info!(
            target: "email_audit",
            message_id = ?entry.message_id,
            provider = %entry.provider,
            to = ?entry.to,
            subject = %entry.subject,
            tenant_id = ?entry.tenant_id,
            timestamp = %entry.timestamp,
            "Email delivered"
        );
        Ok(())
    }
}

/// Collects entries in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogSink {
    entries: Arc<Mutex<Vec<EmailLogEntry>>>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<EmailLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EmailLogSink for InMemoryLogSink {
    async fn write(&self, entry: EmailLogEntry) -> Result<(), LogSinkError> {
        self.entries
            .lock()
            .map_err(|e| LogSinkError(e.to_string()))?
            .push(entry);
        Ok(())
    }
}

/// Hand `entry` to `sink` on a background task.
pub(crate) fn spawn_write(sink: Arc<dyn EmailLogSink>, entry: EmailLogEntry) -> JoinHandle<()> {
    tokio::spawn(async move {
        let message_id = entry.message_id.clone();
        if let Err(err) = sink.write(entry).await {
            warn!(message_id = ?message_id, error = %err, "Failed to write email log entry");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> EmailLogEntry {
        let message = EmailMessage::new("a@example.com", "b@example.com", "Hello", "<p>Hi</p>")
            .with_tenant("tenant-1");
        let result = SendResult::sent("Console", Some("console-1".to_string()));
        EmailLogEntry::new(&message, &result)
    }

    #[test]
    fn test_entry_copies_message_and_result_fields() {
        let entry = entry();
        assert_eq!(entry.message_id.as_deref(), Some("console-1"));
        assert_eq!(entry.provider, "Console");
        assert_eq!(entry.to, vec!["b@example.com".to_string()]);
        assert_eq!(entry.subject, "Hello");
        assert_eq!(entry.tenant_id.as_deref(), Some("tenant-1"));
    }

    #[tokio::test]
    async fn test_in_memory_sink_collects_entries() {
        let sink = InMemoryLogSink::new();
        let entry = entry();
        sink.write(entry.clone()).await.unwrap();
        assert_eq!(sink.entries(), vec![entry]);
    }

    #[tokio::test]
    async fn test_spawned_write_swallows_sink_errors() {
        let mut sink = MockEmailLogSink::new();
        sink.expect_write()
            .times(1)
            .returning(|_| Err(LogSinkError("disk full".to_string())));

        let handle = spawn_write(Arc::new(sink), entry());
        assert!(handle.await.is_ok());
    }
}
