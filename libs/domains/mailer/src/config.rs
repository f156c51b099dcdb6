//! Provider configuration and the environment resolver.
//!
//! Configuration is resolved per call from a [`ConfigSource`], so rotating a
//! credential in the environment takes effect on the next send without a
//! restart. The registry keys its cache on the resulting fingerprint.

use crate::error::ConfigurationError;
use crate::models::Sender;
use core_config::Environment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub const EMAIL_PROVIDER: &str = "EMAIL_PROVIDER";
pub const EMAIL_FALLBACK_PROVIDER: &str = "EMAIL_FALLBACK_PROVIDER";
pub const EMAIL_FALLBACK_ENABLED: &str = "EMAIL_FALLBACK_ENABLED";
pub const EMAIL_MAX_RETRIES: &str = "EMAIL_MAX_RETRIES";
pub const EMAIL_RETRY_BASE_DELAY_MS: &str = "EMAIL_RETRY_BASE_DELAY_MS";
pub const EMAIL_FROM_ADDRESS: &str = "EMAIL_FROM_ADDRESS";
pub const EMAIL_FROM_NAME: &str = "EMAIL_FROM_NAME";
pub const APP_ENV: &str = "APP_ENV";

/// Sender used when `EMAIL_FROM_ADDRESS` is unset.
pub const DEFAULT_FROM_ADDRESS: &str = "noreply@localhost";
pub const DEFAULT_FROM_NAME: &str = "Notifications";

/// Credential and setting keys used inside [`ProviderConfig`].
pub mod keys {
    pub const API_KEY: &str = "api_key";
    pub const API_URL: &str = "api_url";
    pub const ACCESS_KEY_ID: &str = "access_key_id";
    pub const SECRET_ACCESS_KEY: &str = "secret_access_key";
    pub const REGION: &str = "region";
    pub const CONFIGURATION_SET: &str = "configuration_set";
    pub const FROM_ADDRESS: &str = "from_address";
    pub const FROM_NAME: &str = "from_name";
}

static AWS_REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-gov)?-[a-z]+-\d$").expect("valid regex"));

/// Closed set of transport variants.
///
/// Adding a variant forces every `match` over it (factory, validator,
/// env reader) to handle the new backend explicitly.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    /// Cloud transactional API.
    Resend,
    /// Amazon SES used as a raw-MIME relay.
    #[strum(to_string = "ses", serialize = "aws-ses", serialize = "amazon-ses")]
    Ses,
    /// Local development sink.
    Console,
    Sendgrid,
    Postmark,
    Mailgun,
    Smtp,
}

impl ProviderKind {
    pub fn is_implemented(&self) -> bool {
        match self {
            ProviderKind::Resend | ProviderKind::Ses | ProviderKind::Console => true,
            ProviderKind::Sendgrid
            | ProviderKind::Postmark
            | ProviderKind::Mailgun
            | ProviderKind::Smtp => false,
        }
    }

    /// Parse a variant tag, mapping unknown strings to a configuration error.
    pub fn parse_tag(tag: &str) -> Result<Self, ConfigurationError> {
        tag.trim()
            .parse()
            .map_err(|_| ConfigurationError::UnknownProvider(tag.trim().to_string()))
    }
}

/// Validated configuration for one provider instance.
///
/// Fields are private: a `ProviderConfig` only exists after
/// [`ProviderConfig::new`] accepted it, and it cannot change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    kind: ProviderKind,
    credentials: BTreeMap<String, String>,
    settings: BTreeMap<String, String>,
    is_fallback: bool,
}

impl ProviderConfig {
    /// Validate and build a configuration.
    pub fn new(
        kind: ProviderKind,
        credentials: BTreeMap<String, String>,
        settings: BTreeMap<String, String>,
        is_fallback: bool,
    ) -> Result<Self, ConfigurationError> {
        let config = Self {
            kind,
            credentials,
            settings,
            is_fallback,
        };
        config.validate()?;
        Ok(config)
    }

    /// Development sink configuration; always valid.
    pub fn console() -> Self {
        Self {
            kind: ProviderKind::Console,
            credentials: BTreeMap::new(),
            settings: BTreeMap::new(),
            is_fallback: false,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }

    pub fn credentials(&self) -> &BTreeMap<String, String> {
        &self.credentials
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Check every required field of the declared variant and report all
    /// problems at once.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut problems = Vec::new();

        match self.kind {
            ProviderKind::Resend => {
                match self.credential(keys::API_KEY) {
                    None => problems.push(format!("missing credential '{}'", keys::API_KEY)),
                    Some(key) if !key.starts_with("re_") => problems.push(format!(
                        "credential '{}' must start with 're_'",
                        keys::API_KEY
                    )),
                    Some(_) => {}
                }
                if let Some(url) = self.setting(keys::API_URL) {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        problems.push(format!("setting '{}' must be an http(s) URL", keys::API_URL));
                    }
                }
            }
            ProviderKind::Ses => {
                for key in [keys::ACCESS_KEY_ID, keys::SECRET_ACCESS_KEY, keys::REGION] {
                    if self.credential(key).is_none() {
                        problems.push(format!("missing credential '{}'", key));
                    }
                }
                if let Some(region) = self.credential(keys::REGION) {
                    if !AWS_REGION_RE.is_match(region) {
                        problems.push(format!("'{}' is not a valid AWS region", region));
                    }
                }
            }
            ProviderKind::Console => {}
            ProviderKind::Sendgrid
            | ProviderKind::Postmark
            | ProviderKind::Mailgun
            | ProviderKind::Smtp => return Err(ConfigurationError::NotImplemented(self.kind)),
        }

        if let Some(from) = self.setting(keys::FROM_ADDRESS) {
            if !from.contains('@') {
                problems.push(format!("setting '{}' must be an email address", keys::FROM_ADDRESS));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidProviderConfig {
                provider: self.kind,
                problems,
            })
        }
    }
}

/// Exponential backoff parameters for one provider chain link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries and no waiting.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Total tries allowed against one provider.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Everything the facade needs for one send, resolved at request time.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    pub primary: ProviderConfig,
    pub fallback: Option<ProviderConfig>,
    pub fallback_enabled: bool,
    pub retry: RetryPolicy,
    pub default_from: Sender,
}

impl DeliveryConfig {
    pub fn new(primary: ProviderConfig) -> Self {
        Self {
            primary,
            fallback: None,
            fallback_enabled: false,
            retry: RetryPolicy::default(),
            default_from: Sender::named(DEFAULT_FROM_ADDRESS, DEFAULT_FROM_NAME),
        }
    }

    pub fn with_fallback(mut self, fallback: ProviderConfig) -> Self {
        self.fallback = Some(fallback);
        self.fallback_enabled = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_from(mut self, from: Sender) -> Self {
        self.default_from = from;
        self
    }

    /// Fallback config if the chain is allowed to use it.
    pub fn active_fallback(&self) -> Option<&ProviderConfig> {
        if self.fallback_enabled {
            self.fallback.as_ref()
        } else {
            None
        }
    }
}

/// Key/value lookup the resolver reads from.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Builds [`DeliveryConfig`] values from a [`ConfigSource`].
#[derive(Clone)]
pub struct ProviderConfigResolver {
    source: Arc<dyn ConfigSource>,
}

impl ProviderConfigResolver {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source }
    }

    pub fn from_env() -> Self {
        Self::new(Arc::new(ProcessEnv))
    }

    fn var(&self, key: &str) -> Option<String> {
        self.source
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn first_var(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.var(key))
    }

    fn parse_var<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigurationError>
    where
        T::Err: std::fmt::Display,
    {
        match self.var(key) {
            None => Ok(default),
            Some(raw) => Ok(core_config::parse_value(key, &raw)?),
        }
    }

    fn parse_bool(&self, key: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.var(key) {
            None => Ok(default),
            Some(raw) => Ok(core_config::parse_bool(key, &raw)?),
        }
    }

    fn environment(&self) -> Environment {
        self.var(APP_ENV)
            .map(|env| Environment::parse(&env))
            .unwrap_or(Environment::Development)
    }

    /// Resolve primary, optional fallback, retry policy and default sender.
    ///
    /// Every section is checked even after one fails, so the returned error
    /// lists all problems found.
    pub fn resolve(&self) -> Result<DeliveryConfig, ConfigurationError> {
        let mut errors = Vec::new();

        let primary_kind = match self.var(EMAIL_PROVIDER) {
            Some(tag) => collect(&mut errors, ProviderKind::parse_tag(&tag)),
            None if self.environment().is_production() => {
                errors.push(ConfigurationError::InvalidSetting {
                    key: EMAIL_PROVIDER.to_string(),
                    details: "required when APP_ENV=production".to_string(),
                });
                None
            }
            None => Some(ProviderKind::Console),
        };
        let primary =
            primary_kind.and_then(|kind| collect(&mut errors, self.provider_config(kind, false)));

        let fallback_tag = self.var(EMAIL_FALLBACK_PROVIDER);
        let fallback = match fallback_tag.as_deref().map(ProviderKind::parse_tag) {
            None => None,
            Some(Err(err)) => {
                errors.push(err);
                None
            }
            Some(Ok(kind)) if Some(kind) == primary_kind => {
                errors.push(ConfigurationError::InvalidSetting {
                    key: EMAIL_FALLBACK_PROVIDER.to_string(),
                    details: format!("fallback must differ from primary provider '{}'", kind),
                });
                None
            }
            Some(Ok(kind)) => collect(&mut errors, self.provider_config(kind, true)),
        };

        let fallback_enabled = collect(
            &mut errors,
            self.parse_bool(EMAIL_FALLBACK_ENABLED, fallback_tag.is_some()),
        );
        let max_retries = collect(&mut errors, self.parse_var(EMAIL_MAX_RETRIES, 3u32));
        let base_delay_ms = collect(&mut errors, self.parse_var(EMAIL_RETRY_BASE_DELAY_MS, 1000u64));

        let from_address = self
            .var(EMAIL_FROM_ADDRESS)
            .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string());
        let from_name = self
            .var(EMAIL_FROM_NAME)
            .unwrap_or_else(|| DEFAULT_FROM_NAME.to_string());

        match (primary, fallback_enabled, max_retries, base_delay_ms) {
            (Some(primary), Some(fallback_enabled), Some(max_retries), Some(base_delay_ms))
                if errors.is_empty() =>
            {
                Ok(DeliveryConfig {
                    primary,
                    fallback,
                    fallback_enabled,
                    retry: RetryPolicy::new(max_retries, Duration::from_millis(base_delay_ms)),
                    default_from: Sender::named(from_address, from_name),
                })
            }
            _ => Err(ConfigurationError::combine(errors)),
        }
    }

    /// Read the variant's credentials and settings, then validate them.
    pub fn provider_config(
        &self,
        kind: ProviderKind,
        is_fallback: bool,
    ) -> Result<ProviderConfig, ConfigurationError> {
        let mut credentials = BTreeMap::new();
        let mut settings = BTreeMap::new();

        match kind {
            ProviderKind::Resend => {
                put(&mut credentials, keys::API_KEY, self.var("RESEND_API_KEY"));
                put(&mut settings, keys::API_URL, self.var("RESEND_API_URL"));
            }
            ProviderKind::Ses => {
                put(
                    &mut credentials,
                    keys::ACCESS_KEY_ID,
                    self.first_var(&["AWS_SES_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"]),
                );
                put(
                    &mut credentials,
                    keys::SECRET_ACCESS_KEY,
                    self.first_var(&["AWS_SES_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"]),
                );
                put(
                    &mut credentials,
                    keys::REGION,
                    self.first_var(&["AWS_SES_REGION", "AWS_REGION"]),
                );
                put(
                    &mut settings,
                    keys::CONFIGURATION_SET,
                    self.var("AWS_SES_CONFIGURATION_SET"),
                );
            }
            ProviderKind::Console => {}
            ProviderKind::Sendgrid
            | ProviderKind::Postmark
            | ProviderKind::Mailgun
            | ProviderKind::Smtp => return Err(ConfigurationError::NotImplemented(kind)),
        }

        put(&mut settings, keys::FROM_ADDRESS, self.var(EMAIL_FROM_ADDRESS));
        put(&mut settings, keys::FROM_NAME, self.var(EMAIL_FROM_NAME));

        ProviderConfig::new(kind, credentials, settings, is_fallback)
    }
}

fn collect<T>(errors: &mut Vec<ConfigurationError>, result: Result<T, ConfigurationError>) -> Option<T> {
    result.map_err(|err| errors.push(err)).ok()
}

fn put(map: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(vars: &[(&str, &str)]) -> ProviderConfigResolver {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProviderConfigResolver::new(Arc::new(map))
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(ProviderKind::parse_tag("resend").unwrap(), ProviderKind::Resend);
        assert_eq!(ProviderKind::parse_tag("AWS-SES").unwrap(), ProviderKind::Ses);
        assert_eq!(ProviderKind::parse_tag(" console ").unwrap(), ProviderKind::Console);
        assert_eq!(ProviderKind::Ses.to_string(), "ses");

        let err = ProviderKind::parse_tag("carrier-pigeon").unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownProvider("carrier-pigeon".to_string()));
    }

    #[test]
    fn test_unimplemented_variants_fail_naming_the_variant() {
        use strum::IntoEnumIterator;

        for kind in ProviderKind::iter().filter(|k| !k.is_implemented()) {
            let err = ProviderConfig::new(kind, BTreeMap::new(), BTreeMap::new(), false)
                .unwrap_err();
            assert_eq!(err, ConfigurationError::NotImplemented(kind));
            assert!(err.to_string().contains(&kind.to_string()));
        }
    }

    #[test]
    fn test_ses_validation_reports_every_missing_field() {
        let err = ProviderConfig::new(ProviderKind::Ses, BTreeMap::new(), BTreeMap::new(), false)
            .unwrap_err();

        match err {
            ConfigurationError::InvalidProviderConfig { provider, problems } => {
                assert_eq!(provider, ProviderKind::Ses);
                assert_eq!(problems.len(), 3);
                assert!(problems.iter().any(|p| p.contains("access_key_id")));
                assert!(problems.iter().any(|p| p.contains("secret_access_key")));
                assert!(problems.iter().any(|p| p.contains("region")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resend_key_prefix_is_checked() {
        let credentials = BTreeMap::from([(keys::API_KEY.to_string(), "sk_live".to_string())]);
        let err = ProviderConfig::new(ProviderKind::Resend, credentials, BTreeMap::new(), false)
            .unwrap_err();
        assert!(err.to_string().contains("re_"));
    }

    #[test]
    fn test_resolve_defaults_to_console_in_development() {
        let config = resolver(&[]).resolve().unwrap();
        assert_eq!(config.primary.kind(), ProviderKind::Console);
        assert!(config.fallback.is_none());
        assert!(!config.fallback_enabled);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_resolve_requires_provider_in_production() {
        let err = resolver(&[(APP_ENV, "production")]).resolve().unwrap_err();
        assert!(err.to_string().contains(EMAIL_PROVIDER));
    }

    #[test]
    fn test_resolve_primary_and_fallback() {
        let config = resolver(&[
            (EMAIL_PROVIDER, "resend"),
            ("RESEND_API_KEY", "re_123"),
            (EMAIL_FALLBACK_PROVIDER, "ses"),
            ("AWS_SES_ACCESS_KEY_ID", "AKIA"),
            ("AWS_SES_SECRET_ACCESS_KEY", "secret"),
            ("AWS_REGION", "eu-west-1"),
            (EMAIL_MAX_RETRIES, "5"),
            (EMAIL_RETRY_BASE_DELAY_MS, "250"),
            (EMAIL_FROM_ADDRESS, "hello@example.com"),
        ])
        .resolve()
        .unwrap();

        assert_eq!(config.primary.kind(), ProviderKind::Resend);
        assert!(!config.primary.is_fallback());
        let fallback = config.active_fallback().unwrap();
        assert_eq!(fallback.kind(), ProviderKind::Ses);
        assert!(fallback.is_fallback());
        assert_eq!(fallback.credential(keys::REGION), Some("eu-west-1"));
        assert_eq!(config.retry, RetryPolicy::new(5, Duration::from_millis(250)));
        assert_eq!(config.default_from.email(), "hello@example.com");
    }

    #[test]
    fn test_fallback_can_be_disabled() {
        let config = resolver(&[
            (EMAIL_FALLBACK_PROVIDER, "resend"),
            ("RESEND_API_KEY", "re_123"),
            (EMAIL_FALLBACK_ENABLED, "false"),
        ])
        .resolve()
        .unwrap();

        assert!(config.fallback.is_some());
        assert!(config.active_fallback().is_none());
    }

    #[test]
    fn test_fallback_must_differ_from_primary() {
        let err = resolver(&[
            (EMAIL_PROVIDER, "console"),
            (EMAIL_FALLBACK_PROVIDER, "console"),
        ])
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSetting { .. }));
    }

    #[test]
    fn test_invalid_retry_setting() {
        let err = resolver(&[(EMAIL_MAX_RETRIES, "many")]).resolve().unwrap_err();
        assert!(err.to_string().contains(EMAIL_MAX_RETRIES));
    }

    #[test]
    fn test_resolve_reports_primary_fallback_and_settings_together() {
        let err = resolver(&[
            (EMAIL_PROVIDER, "resend"),
            (EMAIL_FALLBACK_PROVIDER, "ses"),
            (EMAIL_MAX_RETRIES, "many"),
            (EMAIL_FALLBACK_ENABLED, "sometimes"),
        ])
        .resolve()
        .unwrap_err();

        let problems = err.problems();
        assert_eq!(problems.len(), 4, "{err}");
        assert!(problems.iter().any(|p| matches!(
            p,
            ConfigurationError::InvalidProviderConfig { provider: ProviderKind::Resend, .. }
        )));
        assert!(problems.iter().any(|p| matches!(
            p,
            ConfigurationError::InvalidProviderConfig { provider: ProviderKind::Ses, problems: missing }
                if missing.len() == 3
        )));

        let rendered = err.to_string();
        assert!(rendered.contains("api_key"));
        assert!(rendered.contains("access_key_id"));
        assert!(rendered.contains("secret_access_key"));
        assert!(rendered.contains(EMAIL_MAX_RETRIES));
        assert!(rendered.contains(EMAIL_FALLBACK_ENABLED));
    }

    #[test]
    fn test_production_flag_is_case_insensitive() {
        let err = resolver(&[(APP_ENV, "Production")]).resolve().unwrap_err();
        assert!(err.to_string().contains(EMAIL_PROVIDER));

        let config = resolver(&[(APP_ENV, "staging")]).resolve().unwrap();
        assert_eq!(config.primary.kind(), ProviderKind::Console);
    }

    #[test]
    fn test_unimplemented_primary_is_rejected() {
        let err = resolver(&[(EMAIL_PROVIDER, "postmark")]).resolve().unwrap_err();
        assert_eq!(err, ConfigurationError::NotImplemented(ProviderKind::Postmark));
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let delays: Vec<_> = (0..policy.max_retries).map(|i| policy.delay_for(i)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
        assert_eq!(policy.total_attempts(), 5);
    }

    #[test]
    fn test_process_env_source() {
        temp_env::with_vars(
            [
                (EMAIL_PROVIDER, Some("resend")),
                ("RESEND_API_KEY", Some("re_from_env")),
                (APP_ENV, None),
            ],
            || {
                let config = ProviderConfigResolver::from_env().resolve().unwrap();
                assert_eq!(config.primary.credential(keys::API_KEY), Some("re_from_env"));
            },
        );
    }
}
