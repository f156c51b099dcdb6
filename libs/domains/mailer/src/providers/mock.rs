//! Mock email provider for testing.
//!
//! Clones share their call counters and outbox, so a test can keep one handle
//! while the registry owns another.

use super::{BulkMode, EmailProvider, ProviderCapabilities, ProviderFactory};
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ConfigurationError;
use crate::models::{EmailError, EmailMessage, ErrorCode, HealthCheckResult, SendResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Scripted result of one `send_email` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    Succeed,
    Fail(ErrorCode),
    /// Panic inside the send future.
    Panic,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockOutcome>,
    sent: Vec<EmailMessage>,
    bulk_batches: Vec<usize>,
}

/// Mock provider with scripted outcomes.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: &'static str,
    default_outcome: MockOutcome,
    healthy: bool,
    panic_on_initialize: bool,
    bulk_failure: Option<EmailError>,
    state: Arc<Mutex<MockState>>,
    send_calls: Arc<AtomicUsize>,
    initialize_calls: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create a healthy mock that accepts everything.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            default_outcome: MockOutcome::Succeed,
            healthy: true,
            panic_on_initialize: false,
            bulk_failure: None,
            state: Arc::new(Mutex::new(MockState::default())),
            send_calls: Arc::new(AtomicUsize::new(0)),
            initialize_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock whose every send fails with `code`.
    pub fn failing(name: &'static str, code: ErrorCode) -> Self {
        Self::new(name).with_default(MockOutcome::Fail(code))
    }

    pub fn with_default(mut self, outcome: MockOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// Queue outcomes consumed before the default applies.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.lock().script.extend(outcomes);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Panic inside `initialize`.
    pub fn panicking_on_initialize(mut self) -> Self {
        self.panic_on_initialize = true;
        self
    }

    /// Make `send_bulk_emails` fail atomically with `error`.
    pub fn with_bulk_failure(mut self, error: EmailError) -> Self {
        self.bulk_failure = Some(error);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn send_count(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn initialize_count(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    /// Messages accepted so far.
    pub fn sent_emails(&self) -> Vec<EmailMessage> {
        self.lock().sent.clone()
    }

    /// Sizes of the batches received through `send_bulk_emails`.
    pub fn bulk_batches(&self) -> Vec<usize> {
        self.lock().bulk_batches.clone()
    }

    pub fn was_sent_to(&self, address: &str) -> bool {
        self.lock()
            .sent
            .iter()
            .any(|m| m.to.iter().any(|to| to == address))
    }

    fn next_outcome(&self) -> MockOutcome {
        self.lock()
            .script
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

#[async_trait]
impl EmailProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            attachments: true,
            bulk: BulkMode::Native,
            delivery_tracking: false,
            templates: false,
        }
    }

    fn initialize(&mut self, _config: &ProviderConfig) -> Result<(), ConfigurationError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_initialize {
            panic!("mock provider '{}' panicked during initialize", self.name);
        }
        Ok(())
    }

    async fn send_email(&self, message: &EmailMessage) -> SendResult {
        self.send_calls.fetch_add(1, Ordering::SeqCst);

        match self.next_outcome() {
            MockOutcome::Succeed => {
                let mut state = self.lock();
                state.sent.push(message.clone());
                SendResult::sent(self.name, Some(format!("mock-{}", state.sent.len())))
            }
            MockOutcome::Fail(code) => SendResult::failed(
                self.name,
                EmailError::new(code, format!("Mock failure: {}", code)),
            ),
            MockOutcome::Panic => panic!("mock provider '{}' panicked", self.name),
        }
    }

    async fn send_bulk_emails(&self, messages: &[EmailMessage]) -> Vec<SendResult> {
        self.lock().bulk_batches.push(messages.len());

        if let Some(error) = &self.bulk_failure {
            return messages
                .iter()
                .map(|_| SendResult::failed(self.name, error.clone()))
                .collect();
        }

        let mut state = self.lock();
        messages
            .iter()
            .map(|message| {
                state.sent.push(message.clone());
                SendResult::sent(self.name, Some(format!("mock-{}", state.sent.len())))
            })
            .collect()
    }

    async fn health_check(&self) -> HealthCheckResult {
        if self.healthy {
            HealthCheckResult::healthy(self.name, Duration::from_millis(1))
        } else {
            HealthCheckResult::unhealthy(self.name, "Mock health check failed")
        }
    }
}

/// Factory handing out clones of registered mocks.
#[derive(Debug, Clone, Default)]
pub struct MockProviderFactory {
    providers: HashMap<ProviderKind, MockProvider>,
    created: Arc<AtomicUsize>,
}

impl MockProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, kind: ProviderKind, provider: MockProvider) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn EmailProvider>, ConfigurationError> {
        let provider = self
            .providers
            .get(&config.kind())
            .cloned()
            .ok_or(ConfigurationError::NotImplemented(config.kind()))?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(provider))
    }
}
