//! Per-tenant white-label branding.
//!
//! Branding is best-effort. [`BrandingResolver::apply`] always hands back a
//! message; when anything goes wrong it is the caller's message, unchanged,
//! and the reason is carried in [`BrandingOutcome::Failed`].

use crate::error::BrandingError;
use crate::models::{EmailMessage, Sender};
use crate::retry::panic_message;
use async_trait::async_trait;
use futures::FutureExt;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;
use tracing::{debug, warn};

static HEX_COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$").expect("valid regex")
});

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}$")
        .expect("valid regex")
});

/// Domain part of an address, including the `@`.
static ADDRESS_DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@[^@\s]+$").expect("valid regex"));

/// Visual and identity overrides for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandingProfile {
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default)]
    pub secondary_color: Option<String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
}

impl BrandingProfile {
    /// Reject colours that are not CSS hex values and domains that are not
    /// hostnames.
    pub fn validate(&self) -> Result<(), BrandingError> {
        let mut problems = Vec::new();

        for (field, value) in [
            ("primaryColor", &self.primary_color),
            ("secondaryColor", &self.secondary_color),
        ] {
            if let Some(color) = value {
                if !HEX_COLOR_RE.is_match(color) {
                    problems.push(format!("{} '{}' is not a hex colour", field, color));
                }
            }
        }
        if let Some(domain) = &self.custom_domain {
            if !HOSTNAME_RE.is_match(domain) {
                problems.push(format!("customDomain '{}' is not a hostname", domain));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BrandingError::InvalidProfile(problems.join("; ")))
        }
    }

    fn has_colors(&self) -> bool {
        self.primary_color.is_some() || self.secondary_color.is_some()
    }
}

/// Tenant → branding profile lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrandingStore: Send + Sync {
    /// `Ok(None)` when the tenant has no profile.
    async fn find_by_tenant(&self, tenant_id: &str)
    -> Result<Option<BrandingProfile>, BrandingError>;
}

/// In-memory branding store.
#[derive(Debug, Default)]
pub struct InMemoryBrandingStore {
    profiles: RwLock<HashMap<String, BrandingProfile>>,
}

impl InMemoryBrandingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, tenant_id: impl Into<String>, profile: BrandingProfile) -> Self {
        self.profiles.get_mut().insert(tenant_id.into(), profile);
        self
    }

    pub async fn insert(&self, tenant_id: impl Into<String>, profile: BrandingProfile) {
        self.profiles.write().await.insert(tenant_id.into(), profile);
    }
}

#[async_trait]
impl BrandingStore for InMemoryBrandingStore {
    async fn find_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<BrandingProfile>, BrandingError> {
        Ok(self.profiles.read().await.get(tenant_id).cloned())
    }
}

/// A single modification made to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrandingChange {
    SenderDomain { from: String, to: String },
    DisplayName { name: String },
    ColorStyles,
}

/// Why branding left a message alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoTenant,
    NoStore,
    NoProfile,
    NothingToApply,
}

/// What branding did to a message. Kept separate from transport results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BrandingOutcome {
    Applied(Vec<BrandingChange>),
    Skipped(SkipReason),
    Failed(String),
}

impl BrandingOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, BrandingOutcome::Applied(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BrandingOutcome::Failed(_))
    }
}

/// Message after branding, plus what happened.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandedMessage {
    pub message: EmailMessage,
    pub outcome: BrandingOutcome,
}

impl BrandedMessage {
    fn unchanged(message: &EmailMessage, outcome: BrandingOutcome) -> Self {
        Self {
            message: message.clone(),
            outcome,
        }
    }
}

/// Applies tenant branding profiles to outgoing messages.
#[derive(Clone, Default)]
pub struct BrandingResolver {
    store: Option<Arc<dyn BrandingStore>>,
}

impl BrandingResolver {
    pub fn new(store: Arc<dyn BrandingStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Resolver that never brands anything.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Produce a branded copy of `message`. Never fails, and a panicking
    /// store is reported as [`BrandingOutcome::Failed`].
    pub async fn apply(&self, message: &EmailMessage) -> BrandedMessage {
        let attempt = AssertUnwindSafe(self.try_apply(message))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(BrandingError::Store(format!(
                    "branding panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        match attempt {
            Ok(branded) => {
                if let BrandingOutcome::Applied(changes) = &branded.outcome {
                    debug!(
                        tenant_id = ?message.tenant_id,
                        changes = changes.len(),
                        "Branding applied"
                    );
                }
                branded
            }
            Err(err) => {
                warn!(
                    tenant_id = ?message.tenant_id,
                    error = %err,
                    "Branding failed; sending unbranded message"
                );
                BrandedMessage::unchanged(message, BrandingOutcome::Failed(err.to_string()))
            }
        }
    }

    async fn try_apply(&self, message: &EmailMessage) -> Result<BrandedMessage, BrandingError> {
        let Some(tenant_id) = message.tenant_id.as_deref() else {
            return Ok(BrandedMessage::unchanged(
                message,
                BrandingOutcome::Skipped(SkipReason::NoTenant),
            ));
        };
        let Some(store) = &self.store else {
            return Ok(BrandedMessage::unchanged(
                message,
                BrandingOutcome::Skipped(SkipReason::NoStore),
            ));
        };
        let Some(profile) = store.find_by_tenant(tenant_id).await? else {
            return Ok(BrandedMessage::unchanged(
                message,
                BrandingOutcome::Skipped(SkipReason::NoProfile),
            ));
        };

        profile.validate()?;
        let domain = match &message.custom_domain {
            Some(domain) if !HOSTNAME_RE.is_match(domain) => {
                return Err(BrandingError::InvalidProfile(format!(
                    "customDomain '{}' is not a hostname",
                    domain
                )));
            }
            Some(domain) => Some(domain.as_str()),
            None => profile.custom_domain.as_deref(),
        };

        let mut branded = message.clone();
        let mut changes = Vec::new();

        if let Some(domain) = domain {
            let current = message.from.email();
            let rewritten = ADDRESS_DOMAIN_RE
                .replace(current, NoExpand(&format!("@{}", domain)))
                .into_owned();
            if rewritten != current {
                branded.from = branded.from.with_email(rewritten.clone());
                changes.push(BrandingChange::SenderDomain {
                    from: current.to_string(),
                    to: rewritten,
                });
            }
        }

        if let Some(company) = profile.company_name.as_deref().filter(|c| !c.trim().is_empty()) {
            if branded.from.name().is_none() {
                branded.from = Sender::named(branded.from.email(), company);
                changes.push(BrandingChange::DisplayName {
                    name: company.to_string(),
                });
            }
        }

        if profile.has_colors() {
            branded.html = format!("{}{}", color_block(&profile), branded.html);
            changes.push(BrandingChange::ColorStyles);
        }

        let outcome = if changes.is_empty() {
            BrandingOutcome::Skipped(SkipReason::NothingToApply)
        } else {
            BrandingOutcome::Applied(changes)
        };
        Ok(BrandedMessage {
            message: branded,
            outcome,
        })
    }
}

fn color_block(profile: &BrandingProfile) -> String {
    let mut vars = String::new();
    if let Some(primary) = &profile.primary_color {
        vars.push_str(&format!("--brand-primary: {};", primary));
    }
    if let Some(secondary) = &profile.secondary_color {
        vars.push_str(&format!("--brand-secondary: {};", secondary));
    }
    format!("<style>:root {{ {} }}</style>\n", vars)
}
