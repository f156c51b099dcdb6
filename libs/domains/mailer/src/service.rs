//! Public email facade.
//!
//! Every operation resolves to data: a [`SendResult`] per message or an
//! [`EmailHealthReport`]. Nothing in here returns `Err` or panics on a bad
//! provider.

use crate::branding::{BrandingOutcome, BrandingResolver};
use crate::config::{DeliveryConfig, ProviderConfig, ProviderConfigResolver};
use crate::error::{RegistryError, TemplateRenderError};
use crate::log_sink::{EmailLogEntry, EmailLogSink, TracingLogSink, spawn_write};
use crate::models::{
    EmailError, EmailHealthReport, EmailMessage, ErrorCode, HealthCheckResult, SendResult, Sender,
    Tag,
};
use crate::providers::EmailProvider;
use crate::registry::ProviderRegistry;
use crate::retry::{AttemptRecord, RetryOrchestrator, panic_message};
use crate::templates::{HandlebarsTemplateRegistry, RenderedTemplate, TemplateRegistry};
use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Full account of a single send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub result: SendResult,
    pub branding: BrandingOutcome,
    pub attempts: Vec<AttemptRecord>,
    pub used_fallback: bool,
}

impl DeliveryReport {
    fn rejected(result: SendResult, branding: BrandingOutcome) -> Self {
        Self {
            result,
            branding,
            attempts: Vec::new(),
            used_fallback: false,
        }
    }
}

/// Request for [`EmailService::send_template_email`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEmailRequest {
    pub template_id: String,
    #[serde(default)]
    pub props: Value,
    pub to: Vec<String>,
    /// Defaults to the configured sender.
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl TemplateEmailRequest {
    pub fn new(template_id: impl Into<String>, to: impl Into<String>, props: Value) -> Self {
        Self {
            template_id: template_id.into(),
            props,
            to: vec![to.into()],
            from: None,
            reply_to: None,
            tenant_id: None,
            custom_domain: None,
            tags: Vec::new(),
        }
    }

    pub fn with_from(mut self, from: impl Into<Sender>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// Email delivery service composing branding, configuration, the provider
/// registry, retries and the audit log.
#[derive(Clone)]
pub struct EmailService {
    resolver: ProviderConfigResolver,
    registry: Arc<ProviderRegistry>,
    orchestrator: RetryOrchestrator,
    branding: BrandingResolver,
    templates: Arc<dyn TemplateRegistry>,
    log_sink: Option<Arc<dyn EmailLogSink>>,
}

impl EmailService {
    pub fn new(
        resolver: ProviderConfigResolver,
        registry: Arc<ProviderRegistry>,
        templates: Arc<dyn TemplateRegistry>,
    ) -> Self {
        Self {
            resolver,
            orchestrator: RetryOrchestrator::new(Arc::clone(&registry)),
            registry,
            branding: BrandingResolver::disabled(),
            templates,
            log_sink: None,
        }
    }

    /// Service reading the process environment, with the built-in templates
    /// and a tracing audit log.
    pub fn from_env() -> Result<Self, TemplateRenderError> {
        Ok(Self::new(
            ProviderConfigResolver::from_env(),
            Arc::new(ProviderRegistry::new()),
            Arc::new(HandlebarsTemplateRegistry::new()?),
        )
        .with_log_sink(Arc::new(TracingLogSink)))
    }

    pub fn with_branding(mut self, branding: BrandingResolver) -> Self {
        self.branding = branding;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn EmailLogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Send one message through the provider chain.
    pub async fn send_email(&self, message: &EmailMessage) -> SendResult {
        self.send_email_with_report(message).await.result
    }

    /// Like [`send_email`](Self::send_email), also reporting branding and
    /// every attempt made.
    #[instrument(skip(self, message), fields(to = ?message.to, tenant_id = ?message.tenant_id))]
    pub async fn send_email_with_report(&self, message: &EmailMessage) -> DeliveryReport {
        let branded = self.branding.apply(message).await;

        if let Err(err) = branded.message.validate() {
            warn!(error = %err.message, "Rejecting invalid email message");
            return DeliveryReport::rejected(
                SendResult::failed(SendResult::FAILED_PROVIDER, err),
                branded.outcome,
            );
        }

        let config = match self.resolve_config() {
            Ok(config) => config,
            Err(result) => return DeliveryReport::rejected(result, branded.outcome),
        };

        let chain = self.orchestrator.send(&branded.message, &config).await;
        if chain.result.success {
            self.log_delivery(&branded.message, &chain.result);
        }

        DeliveryReport {
            result: chain.result,
            branding: branded.outcome,
            attempts: chain.attempts,
            used_fallback: chain.used_fallback,
        }
    }

    /// Send a batch through a single provider bulk call.
    ///
    /// Output length and order always match `messages`. The batch is not
    /// retried; if the provider call fails as a whole, every message in it
    /// carries the same error.
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn send_bulk_emails(&self, messages: &[EmailMessage]) -> Vec<SendResult> {
        if messages.is_empty() {
            return Vec::new();
        }

        let branded = join_all(messages.iter().map(|m| self.branding.apply(m))).await;

        let mut results: Vec<Option<SendResult>> = vec![None; messages.len()];
        let mut batch = Vec::with_capacity(messages.len());
        let mut positions = Vec::with_capacity(messages.len());
        for (index, item) in branded.into_iter().enumerate() {
            match item.message.validate() {
                Ok(()) => {
                    positions.push(index);
                    batch.push(item.message);
                }
                Err(err) => {
                    results[index] = Some(SendResult::failed(SendResult::FAILED_PROVIDER, err))
                }
            }
        }

        if !batch.is_empty() {
            let sent = self.send_batch(&batch).await;
            for ((index, message), result) in positions.into_iter().zip(&batch).zip(sent) {
                if result.success {
                    self.log_delivery(message, &result);
                }
                results[index] = Some(result);
            }
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| {
                    SendResult::failed(
                        SendResult::FAILED_PROVIDER,
                        EmailError::new(ErrorCode::BulkSendFailed, "No result for message"),
                    )
                })
            })
            .collect()
    }

    async fn send_batch(&self, batch: &[EmailMessage]) -> Vec<SendResult> {
        let uniform = |provider: &str, error: EmailError| -> Vec<SendResult> {
            batch
                .iter()
                .map(|_| SendResult::failed(provider, error.clone()))
                .collect()
        };

        let config = match self.resolve_config() {
            Ok(config) => config,
            Err(result) => {
                let error = result.error.unwrap_or_else(|| {
                    EmailError::new(ErrorCode::ConfigurationError, "Configuration error")
                });
                return uniform(SendResult::FAILED_PROVIDER, error);
            }
        };

        let provider = match self.bulk_provider(&config).await {
            Ok(provider) => provider,
            Err(err) => {
                error!(error = %err, "No email provider available for bulk send");
                return uniform(
                    SendResult::FAILED_PROVIDER,
                    EmailError::new(ErrorCode::ProviderUnavailable, err.to_string()),
                );
            }
        };

        let sent = match AssertUnwindSafe(provider.send_bulk_emails(batch))
            .catch_unwind()
            .await
        {
            Ok(sent) => sent,
            Err(_) => {
                error!(provider = provider.name(), "Email provider panicked during bulk send");
                return uniform(
                    provider.name(),
                    EmailError::new(ErrorCode::ProviderError, "Provider panicked during bulk send"),
                );
            }
        };

        if sent.len() != batch.len() {
            error!(
                provider = provider.name(),
                expected = batch.len(),
                received = sent.len(),
                "Bulk send returned a mismatched number of results"
            );
            return uniform(
                provider.name(),
                EmailError::new(
                    ErrorCode::BulkSendFailed,
                    format!(
                        "Provider returned {} results for {} messages",
                        sent.len(),
                        batch.len()
                    ),
                ),
            );
        }

        let delivered = sent.iter().filter(|r| r.success).count();
        info!(provider = provider.name(), delivered, total = batch.len(), "Bulk send finished");
        sent
    }

    /// Primary provider, or the fallback if the primary cannot be obtained.
    async fn bulk_provider(
        &self,
        config: &DeliveryConfig,
    ) -> Result<Arc<dyn EmailProvider>, RegistryError> {
        match self.registry.get_or_create(&config.primary).await {
            Ok(provider) => Ok(provider),
            Err(err) => match config.active_fallback() {
                Some(fallback) => {
                    warn!(error = %err, "Primary provider unavailable for bulk send, using fallback");
                    self.registry.get_or_create(fallback).await
                }
                None => Err(err),
            },
        }
    }

    /// Render a template and send it.
    #[instrument(skip(self, request), fields(template_id = %request.template_id))]
    pub async fn send_template_email(&self, request: TemplateEmailRequest) -> SendResult {
        let rendered = match self.render(&request.template_id, &request.props) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(error = %err, "Template rendering failed");
                return SendResult::failed(
                    SendResult::FAILED_PROVIDER,
                    EmailError::new(ErrorCode::TemplateRenderFailed, err.to_string())
                        .with_details(serde_json::json!({ "templateId": request.template_id })),
                );
            }
        };

        let from = match request.from {
            Some(from) => from,
            None => match self.resolve_config() {
                Ok(config) => config.default_from,
                Err(result) => return result,
            },
        };

        let mut message = EmailMessage {
            to: request.to,
            cc: Vec::new(),
            bcc: Vec::new(),
            from,
            reply_to: request.reply_to,
            subject: rendered.subject,
            html: rendered.html,
            text: Some(rendered.text),
            attachments: Vec::new(),
            headers: Default::default(),
            tags: request.tags,
            tenant_id: request.tenant_id,
            custom_domain: request.custom_domain,
        };
        message.tags.push(Tag {
            name: "template".to_string(),
            value: request.template_id,
        });

        self.send_email(&message).await
    }

    /// Render through the registry; a panicking layout is a render error.
    fn render(&self, template_id: &str, props: &Value) -> Result<RenderedTemplate, TemplateRenderError> {
        std::panic::catch_unwind(AssertUnwindSafe(|| self.templates.render(template_id, props)))
            .unwrap_or_else(|panic| {
                Err(TemplateRenderError::Render(format!(
                    "template '{}' panicked: {}",
                    template_id,
                    panic_message(panic.as_ref())
                )))
            })
    }

    /// Probe the configured primary and fallback providers.
    #[instrument(skip(self))]
    pub async fn check_email_health(&self) -> EmailHealthReport {
        let config = match self.resolver.resolve() {
            Ok(config) => config,
            Err(err) => {
                return EmailHealthReport::new(
                    Some(HealthCheckResult::unhealthy("configuration", err.to_string())),
                    None,
                );
            }
        };

        let (primary, fallback) = tokio::join!(
            self.probe(&config.primary),
            async {
                match config.active_fallback() {
                    Some(fallback) => Some(self.probe(fallback).await),
                    None => None,
                }
            }
        );

        let report = EmailHealthReport::new(Some(primary), fallback);
        debug!(healthy = report.healthy, "Email health checked");
        report
    }

    async fn probe(&self, config: &ProviderConfig) -> HealthCheckResult {
        match self.registry.get_or_create(config).await {
            Ok(provider) => AssertUnwindSafe(provider.health_check())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    HealthCheckResult::unhealthy(
                        provider.name(),
                        format!("health check panicked: {}", panic_message(panic.as_ref())),
                    )
                }),
            Err(RegistryError::Unhealthy { provider, reason }) => {
                HealthCheckResult::unhealthy(provider, reason)
            }
            Err(err) => HealthCheckResult::unhealthy(config.kind().to_string(), err.to_string()),
        }
    }

    fn resolve_config(&self) -> Result<DeliveryConfig, SendResult> {
        self.resolver.resolve().map_err(|err| {
            error!(error = %err, "Email configuration is invalid");
            SendResult::failed(
                SendResult::FAILED_PROVIDER,
                EmailError::new(ErrorCode::ConfigurationError, err.to_string()),
            )
        })
    }

    fn log_delivery(&self, message: &EmailMessage, result: &SendResult) {
        if let Some(sink) = &self.log_sink {
            spawn_write(Arc::clone(sink), EmailLogEntry::new(message, result));
        }
    }
}
