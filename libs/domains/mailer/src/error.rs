//! Error types for the mailer domain.
//!
//! Only configuration and provider construction fail with `Err`. Everything
//! that happens while delivering a message is reported as data inside a
//! [`SendResult`](crate::models::SendResult) instead.

use crate::config::ProviderKind;
use thiserror::Error;

/// Fatal configuration problems, raised while building a provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// One or more required fields are missing or malformed.
    ///
    /// Every problem found is listed so operators can fix the environment in
    /// a single pass.
    #[error("Invalid configuration for provider '{provider}': {}", .problems.join("; "))]
    InvalidProviderConfig {
        provider: ProviderKind,
        problems: Vec<String>,
    },

    /// The variant tag is known but no transport exists for it yet.
    #[error("Email provider '{0}' is not implemented")]
    NotImplemented(ProviderKind),

    /// The variant tag is not recognised at all.
    #[error("Unknown email provider '{0}'")]
    UnknownProvider(String),

    /// A delivery setting could not be parsed.
    #[error("Invalid setting '{key}': {details}")]
    InvalidSetting { key: String, details: String },

    /// The backend client could not be constructed.
    #[error("Failed to build {provider} client: {details}")]
    Client {
        provider: ProviderKind,
        details: String,
    },

    /// Several independent problems found in one resolution pass.
    #[error("Invalid email configuration: {}", join_problems(.0))]
    Multiple(Vec<ConfigurationError>),
}

impl ConfigurationError {
    /// Fold collected problems into one error; a single problem stays as is.
    pub fn combine(mut errors: Vec<ConfigurationError>) -> Self {
        if errors.len() == 1 {
            if let Some(only) = errors.pop() {
                return only;
            }
        }
        ConfigurationError::Multiple(errors)
    }

    /// Every leaf problem, with nested groups flattened.
    pub fn problems(&self) -> Vec<&ConfigurationError> {
        match self {
            ConfigurationError::Multiple(errors) => {
                errors.iter().flat_map(ConfigurationError::problems).collect()
            }
            other => vec![other],
        }
    }
}

fn join_problems(errors: &[ConfigurationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

impl From<core_config::ConfigError> for ConfigurationError {
    fn from(err: core_config::ConfigError) -> Self {
        match err {
            core_config::ConfigError::ParseError { key, details } => {
                ConfigurationError::InvalidSetting { key, details }
            }
        }
    }
}

/// Errors raised by the provider registry.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The provider initialised but failed its first health check.
    #[error("Provider '{provider}' is unhealthy: {reason}")]
    Unhealthy { provider: String, reason: String },

    /// Construction, `initialize` or the first health check panicked.
    #[error("Provider '{provider}' panicked during setup: {details}")]
    Panicked { provider: ProviderKind, details: String },
}

/// Template rendering failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateRenderError {
    #[error("Template not found: {0}")]
    UnknownTemplate(String),

    #[error("Invalid props for template '{template}': {details}")]
    InvalidProps { template: String, details: String },

    #[error("Template rendering error: {0}")]
    Render(String),
}

impl From<handlebars::RenderError> for TemplateRenderError {
    fn from(err: handlebars::RenderError) -> Self {
        TemplateRenderError::Render(err.to_string())
    }
}

/// Branding lookup or application failures. Never surfaced to callers of
/// the facade; they end up in [`BrandingOutcome::Failed`](crate::branding::BrandingOutcome).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrandingError {
    #[error("Branding store error: {0}")]
    Store(String),

    #[error("Invalid branding profile: {0}")]
    InvalidProfile(String),
}

/// Audit log sink failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Email log sink error: {0}")]
pub struct LogSinkError(pub String);
