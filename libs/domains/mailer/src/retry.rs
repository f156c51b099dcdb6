//! Retry and fallback orchestration.
//!
//! ```text
//! Attempting(n) ──ok──────────────▶ Success
//!      │ retryable error, n < max
//!      ▼
//! RetryWait(base * 2^n) ──▶ Attempting(n + 1)
//!      │ budget spent
//!      ▼
//! Exhausted ──fallback enabled──▶ FallbackAttempting(...) ──▶ Success | Failed
//! ```
//!
//! A non-retryable error ends the whole chain on the spot. Primary and
//! fallback are tried strictly one after the other.

use crate::config::{DeliveryConfig, ProviderConfig, RetryPolicy};
use crate::models::{EmailError, EmailMessage, ErrorCode, SendResult, millis};
use crate::providers::EmailProvider;
use crate::registry::ProviderRegistry;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-provider retry state, threaded through the backoff loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    pub attempt: u32,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub last_error: Option<EmailError>,
}

impl RetryContext {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_retries: policy.max_retries,
            base_delay: policy.base_delay,
            last_error: None,
        }
    }

    fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    fn backoff(&self) -> Duration {
        RetryPolicy::new(self.max_retries, self.base_delay).delay_for(self.attempt)
    }
}

/// One try against one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub provider: String,
    /// Zero-based attempt number within this provider's budget.
    pub attempt: u32,
    pub fallback: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    /// Wait scheduled after this attempt, if another one follows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// Final result of a chain plus everything that was tried.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub result: SendResult,
    pub attempts: Vec<AttemptRecord>,
    pub used_fallback: bool,
}

/// How one provider's budget ended.
#[derive(Debug)]
pub enum LinkOutcome {
    Delivered(SendResult),
    /// Non-retryable failure; the chain stops here.
    Rejected(SendResult),
    Exhausted(EmailError),
}

/// Runs sends through the primary provider and, once its budget is spent,
/// the fallback.
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    registry: Arc<ProviderRegistry>,
}

impl RetryOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `message` according to `config`. Never fails; every outcome
    /// is a [`SendResult`].
    pub async fn send(&self, message: &EmailMessage, config: &DeliveryConfig) -> ChainOutcome {
        let mut attempts = Vec::new();

        let last_error = match self
            .run_link(message, &config.primary, &config.retry, &mut attempts)
            .await
        {
            LinkOutcome::Delivered(result) | LinkOutcome::Rejected(result) => {
                return ChainOutcome {
                    result,
                    attempts,
                    used_fallback: false,
                };
            }
            LinkOutcome::Exhausted(err) => err,
        };

        let Some(fallback) = config.active_fallback() else {
            error!(error = %last_error, "Primary email provider exhausted and no fallback is enabled");
            return ChainOutcome {
                result: SendResult::all_providers_failed(Some(&last_error)),
                attempts,
                used_fallback: false,
            };
        };

        warn!(
            error = %last_error,
            fallback = %fallback.kind(),
            "Primary email provider exhausted, switching to fallback"
        );

        let result = match self
            .run_link(message, fallback, &config.retry, &mut attempts)
            .await
        {
            LinkOutcome::Delivered(result) | LinkOutcome::Rejected(result) => result,
            LinkOutcome::Exhausted(err) => {
                error!(error = %err, "All email providers failed");
                SendResult::all_providers_failed(Some(&err))
            }
        };

        ChainOutcome {
            result,
            attempts,
            used_fallback: true,
        }
    }

    async fn run_link(
        &self,
        message: &EmailMessage,
        config: &ProviderConfig,
        policy: &RetryPolicy,
        attempts: &mut Vec<AttemptRecord>,
    ) -> LinkOutcome {
        match self.registry.get_or_create(config).await {
            Ok(provider) => {
                send_with_retry(provider.as_ref(), message, policy, config.is_fallback(), attempts)
                    .await
            }
            Err(err) => {
                warn!(
                    kind = %config.kind(),
                    fallback = config.is_fallback(),
                    error = %err,
                    "Email provider unavailable"
                );
                let error = EmailError::new(ErrorCode::ProviderUnavailable, err.to_string());
                attempts.push(AttemptRecord {
                    provider: config.kind().to_string(),
                    attempt: 0,
                    fallback: config.is_fallback(),
                    success: false,
                    error: Some(error.code),
                    backoff_ms: None,
                });
                LinkOutcome::Exhausted(error)
            }
        }
    }
}

/// Exponential-backoff loop against a single provider.
///
/// Makes at most `policy.max_retries + 1` attempts, sleeping
/// `base * 2^attempt` between them. Non-retryable codes return after the
/// first attempt without sleeping.
pub async fn send_with_retry(
    provider: &dyn EmailProvider,
    message: &EmailMessage,
    policy: &RetryPolicy,
    fallback: bool,
    attempts: &mut Vec<AttemptRecord>,
) -> LinkOutcome {
    let mut ctx = RetryContext::new(policy);

    loop {
        let result = guarded_send(provider, message).await;
        let mut record = AttemptRecord {
            provider: provider.name().to_string(),
            attempt: ctx.attempt,
            fallback,
            success: result.success,
            error: result.error_code(),
            backoff_ms: None,
        };

        if result.success {
            info!(
                provider = provider.name(),
                attempt = ctx.attempt,
                message_id = ?result.message_id,
                "Email delivered"
            );
            attempts.push(record);
            return LinkOutcome::Delivered(result);
        }

        let error = result.error.clone().unwrap_or_else(|| {
            EmailError::new(ErrorCode::ProviderError, "Provider reported failure without details")
        });

        if !error.is_retryable() {
            warn!(
                provider = provider.name(),
                code = %error.code,
                error = %error.message,
                "Non-retryable email error"
            );
            attempts.push(record);
            return LinkOutcome::Rejected(result);
        }

        if !ctx.can_retry() {
            debug!(
                provider = provider.name(),
                attempts = ctx.attempt + 1,
                "Retry budget exhausted"
            );
            attempts.push(record);
            return LinkOutcome::Exhausted(error);
        }

        let delay = ctx.backoff();
        record.backoff_ms = Some(millis(delay));
        attempts.push(record);

        warn!(
            provider = provider.name(),
            attempt = ctx.attempt,
            max_retries = ctx.max_retries,
            delay_ms = millis(delay),
            code = %error.code,
            "Retryable email error, backing off"
        );

        ctx.last_error = Some(error);
        tokio::time::sleep(delay).await;
        ctx.attempt += 1;
    }
}

/// Calls the provider, converting a panic into a `PROVIDER_ERROR` result.
async fn guarded_send(provider: &dyn EmailProvider, message: &EmailMessage) -> SendResult {
    match AssertUnwindSafe(provider.send_email(message))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let details = panic_message(panic.as_ref());
            error!(provider = provider.name(), panic = %details, "Email provider panicked");
            SendResult::failed(
                provider.name(),
                EmailError::new(ErrorCode::ProviderError, format!("Provider panicked: {}", details)),
            )
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderKind, keys};
    use crate::providers::mock::MockOutcome;
    use crate::providers::{MockProvider, MockProviderFactory};
    use std::collections::BTreeMap;

    fn message() -> EmailMessage {
        EmailMessage::new("a@example.com", "b@example.com", "Hello", "<p>Hi</p>")
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100))
    }

    fn resend_config() -> ProviderConfig {
        let credentials = BTreeMap::from([(keys::API_KEY.to_string(), "re_test".to_string())]);
        ProviderConfig::new(ProviderKind::Resend, credentials, BTreeMap::new(), false).unwrap()
    }

    fn fallback_console() -> ProviderConfig {
        ProviderConfig::new(ProviderKind::Console, BTreeMap::new(), BTreeMap::new(), true).unwrap()
    }

    fn orchestrator(primary: &MockProvider, fallback: &MockProvider) -> RetryOrchestrator {
        let factory = MockProviderFactory::new()
            .with_provider(ProviderKind::Resend, primary.clone())
            .with_provider(ProviderKind::Console, fallback.clone());
        RetryOrchestrator::new(Arc::new(ProviderRegistry::with_factory(Arc::new(factory))))
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_double_each_attempt() {
        let provider = MockProvider::failing("Primary", ErrorCode::ServiceUnavailable);
        let mut attempts = Vec::new();
        let started = tokio::time::Instant::now();

        let outcome = send_with_retry(&provider, &message(), &policy(), false, &mut attempts).await;

        assert!(matches!(outcome, LinkOutcome::Exhausted(ref e) if e.code == ErrorCode::ServiceUnavailable));
        assert_eq!(provider.send_count(), 4);
        let delays: Vec<_> = attempts.iter().map(|a| a.backoff_ms).collect();
        assert_eq!(delays, vec![Some(100), Some(200), Some(400), None]);
        assert_eq!(started.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_makes_one_attempt() {
        let provider = MockProvider::failing("Primary", ErrorCode::InvalidSender);
        let mut attempts = Vec::new();
        let started = tokio::time::Instant::now();

        let outcome = send_with_retry(&provider, &message(), &policy(), false, &mut attempts).await;

        assert!(matches!(outcome, LinkOutcome::Rejected(_)));
        assert_eq!(provider.send_count(), 1);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].backoff_ms, None);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let provider = MockProvider::new("Primary").with_script([
            MockOutcome::Fail(ErrorCode::RateLimited),
            MockOutcome::Succeed,
        ]);
        let mut attempts = Vec::new();

        let outcome = send_with_retry(&provider, &message(), &policy(), false, &mut attempts).await;

        assert!(matches!(outcome, LinkOutcome::Delivered(ref r) if r.success));
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].error, Some(ErrorCode::RateLimited));
        assert!(attempts[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_converted_to_provider_error() {
        let provider = MockProvider::new("Primary").with_default(MockOutcome::Panic);
        let mut attempts = Vec::new();

        let outcome =
            send_with_retry(&provider, &message(), &RetryPolicy::none(), false, &mut attempts).await;

        match outcome {
            LinkOutcome::Exhausted(err) => {
                assert_eq!(err.code, ErrorCode::ProviderError);
                assert!(err.message.contains("panicked"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_primary_falls_back() {
        let primary = MockProvider::failing("Primary", ErrorCode::ServiceUnavailable);
        let fallback = MockProvider::new("Fallback");
        let config = DeliveryConfig::new(resend_config())
            .with_fallback(fallback_console())
            .with_retry(policy());

        let outcome = orchestrator(&primary, &fallback).send(&message(), &config).await;

        assert!(outcome.result.success);
        assert_eq!(outcome.result.provider, "Fallback");
        assert!(outcome.used_fallback);
        assert_eq!(primary.send_count(), 4);
        assert_eq!(fallback.send_count(), 1);
        assert_eq!(outcome.attempts.len(), 5);
        assert!(outcome.attempts[4].fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_primary_never_touches_fallback() {
        let primary = MockProvider::failing("Primary", ErrorCode::InvalidRecipient);
        let fallback = MockProvider::new("Fallback");
        let config = DeliveryConfig::new(resend_config())
            .with_fallback(fallback_console())
            .with_retry(policy());

        let outcome = orchestrator(&primary, &fallback).send(&message(), &config).await;

        assert!(!outcome.result.success);
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::InvalidRecipient));
        assert!(!outcome.used_fallback);
        assert_eq!(fallback.send_count(), 0);
        assert_eq!(fallback.initialize_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_exhausted_reports_all_providers_failed() {
        let primary = MockProvider::failing("Primary", ErrorCode::Timeout);
        let fallback = MockProvider::failing("Fallback", ErrorCode::NetworkError);
        let config = DeliveryConfig::new(resend_config())
            .with_fallback(fallback_console())
            .with_retry(RetryPolicy::new(1, Duration::from_millis(10)));

        let outcome = orchestrator(&primary, &fallback).send(&message(), &config).await;

        assert_eq!(outcome.result.provider, SendResult::FAILED_PROVIDER);
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::AllProvidersFailed));
        assert_eq!(primary.send_count(), 2);
        assert_eq!(fallback.send_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_fallback_is_skipped() {
        let primary = MockProvider::failing("Primary", ErrorCode::Timeout);
        let fallback = MockProvider::new("Fallback");
        let mut config = DeliveryConfig::new(resend_config())
            .with_fallback(fallback_console())
            .with_retry(RetryPolicy::none());
        config.fallback_enabled = false;

        let outcome = orchestrator(&primary, &fallback).send(&message(), &config).await;

        assert_eq!(outcome.result.error_code(), Some(ErrorCode::AllProvidersFailed));
        assert_eq!(fallback.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_primary_moves_to_fallback() {
        let primary = MockProvider::new("Primary").unhealthy();
        let fallback = MockProvider::new("Fallback");
        let config = DeliveryConfig::new(resend_config()).with_fallback(fallback_console());

        let outcome = orchestrator(&primary, &fallback).send(&message(), &config).await;

        assert!(outcome.result.success);
        assert_eq!(outcome.attempts[0].error, Some(ErrorCode::ProviderUnavailable));
        assert_eq!(primary.send_count(), 0);
    }
}
