//! Mailer Domain
//!
//! Transactional email delivery with pluggable transports, retries with
//! exponential backoff, a fallback provider, per-tenant branding and
//! Handlebars templates.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ EmailService │  ← Facade: send, bulk, templated, health
//! └──────┬───────┘
//!        │ branding → config → registry → retry/fallback → log sink
//! ┌──────▼───────────┐
//! │ RetryOrchestrator│  ← Backoff loop, primary then fallback
//! └──────┬───────────┘
//!        │
//! ┌──────▼───────────┐
//! │ ProviderRegistry │  ← Cached, health-checked instances
//! └──────┬───────────┘
//!        │
//! ┌──────▼──────┐
//! │  Providers  │  ← Resend, Amazon SES, console
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_mailer::{EmailMessage, EmailService, Sender};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = EmailService::from_env()?;
//!
//! let message = EmailMessage::new(
//!     Sender::named("bookings@example.com", "Bookings"),
//!     "guest@example.org",
//!     "Your booking is confirmed",
//!     "<p>See you soon!</p>",
//! );
//!
//! let result = service.send_email(&message).await;
//! if !result.success {
//!     eprintln!("delivery failed: {:?}", result.error);
//! }
//! # Ok(())
//! # }
//! ```

pub mod branding;
pub mod config;
pub mod error;
pub mod log_sink;
pub mod models;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod service;
pub mod templates;

// Re-export commonly used types
pub use branding::{
    BrandedMessage, BrandingChange, BrandingOutcome, BrandingProfile, BrandingResolver,
    BrandingStore, InMemoryBrandingStore, SkipReason,
};
pub use config::{
    ConfigSource, DeliveryConfig, ProcessEnv, ProviderConfig, ProviderConfigResolver,
    ProviderKind, RetryPolicy,
};
pub use error::{
    BrandingError, ConfigurationError, LogSinkError, RegistryError, TemplateRenderError,
};
pub use log_sink::{EmailLogEntry, EmailLogSink, InMemoryLogSink, TracingLogSink};
pub use models::{
    Attachment, EmailError, EmailHealthReport, EmailMessage, ErrorCode, HealthCheckResult,
    SendResult, Sender, Tag,
};
pub use providers::{
    BulkMode, ConsoleProvider, DefaultProviderFactory, EmailProvider, MockProvider,
    MockProviderFactory, ProviderCapabilities, ProviderFactory, ResendProvider, SesProvider,
};
pub use registry::ProviderRegistry;
pub use retry::{AttemptRecord, RetryContext, RetryOrchestrator};
pub use service::{DeliveryReport, EmailService, TemplateEmailRequest};
pub use templates::{EmailLayout, HandlebarsTemplateRegistry, RenderedTemplate, TemplateRegistry};
