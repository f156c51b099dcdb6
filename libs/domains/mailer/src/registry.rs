//! Process-wide cache of initialised providers.
//!
//! Construct one [`ProviderRegistry`] at startup and hand it to the
//! [`EmailService`](crate::service::EmailService). Instances are keyed by a
//! fingerprint of the configuration, created lazily on first use and kept
//! until [`ProviderRegistry::reset`].

use crate::config::ProviderConfig;
use crate::error::RegistryError;
use crate::providers::{DefaultProviderFactory, EmailProvider, ProviderFactory};
use crate::retry::panic_message;
use futures::FutureExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};

type Slot = Arc<OnceCell<Arc<dyn EmailProvider>>>;

/// Deterministic cache key: SHA-256 over the variant, credentials and
/// settings. Maps are ordered, so equal configurations always hash equally.
pub fn fingerprint(config: &ProviderConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config.kind().to_string().as_bytes());
    for (section, map) in [("credentials", config.credentials()), ("settings", config.settings())] {
        hasher.update([0u8]);
        hasher.update(section.as_bytes());
        for (key, value) in map {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Registry of initialised, healthy providers.
pub struct ProviderRegistry {
    factory: Arc<dyn ProviderFactory>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ProviderRegistry {
    /// Registry backed by the real transports.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultProviderFactory))
    }

    pub fn with_factory(factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached provider for `config`, creating it on first use.
    ///
    /// Creation runs `initialize` followed by a health check. Concurrent
    /// callers with the same fingerprint wait for the first one; only a
    /// healthy instance is stored. A failed creation frees its slot.
    pub async fn get_or_create(
        &self,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn EmailProvider>, RegistryError> {
        let key = fingerprint(config);
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        if let Some(provider) = slot.get() {
            debug!(provider = provider.name(), "Using cached email provider");
            return Ok(Arc::clone(provider));
        }

        match slot.get_or_try_init(|| self.guarded_create(config, &key)).await {
            Ok(provider) => Ok(Arc::clone(provider)),
            Err(err) => {
                self.release(&key, &slot).await;
                Err(err)
            }
        }
    }

    /// Drop `slot` from the map unless another caller replaced or filled it.
    async fn release(&self, key: &str, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        if let Some(current) = slots.get(key) {
            if Arc::ptr_eq(current, slot) && !current.initialized() {
                slots.remove(key);
            }
        }
    }

    async fn guarded_create(
        &self,
        config: &ProviderConfig,
        key: &str,
    ) -> Result<Arc<dyn EmailProvider>, RegistryError> {
        match AssertUnwindSafe(self.create(config, key)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let details = panic_message(panic.as_ref());
                error!(kind = %config.kind(), panic = %details, "Email provider panicked during setup");
                Err(RegistryError::Panicked {
                    provider: config.kind(),
                    details,
                })
            }
        }
    }

    async fn create(
        &self,
        config: &ProviderConfig,
        key: &str,
    ) -> Result<Arc<dyn EmailProvider>, RegistryError> {
        let mut provider = self.factory.create(config)?;
        provider.initialize(config)?;

        let health = provider.health_check().await;
        if !health.healthy {
            let reason = health.error.unwrap_or_else(|| "health check failed".to_string());
            warn!(
                provider = provider.name(),
                fallback = config.is_fallback(),
                reason = %reason,
                "Email provider failed its initial health check; not caching"
            );
            return Err(RegistryError::Unhealthy {
                provider: provider.name().to_string(),
                reason,
            });
        }

        info!(
            provider = provider.name(),
            kind = %config.kind(),
            fallback = config.is_fallback(),
            fingerprint = &key[..12],
            "Email provider initialized"
        );
        Ok(Arc::from(provider))
    }

    /// Drop every cached instance.
    pub async fn reset(&self) {
        let mut slots = self.slots.lock().await;
        let dropped = slots.len();
        slots.clear();
        debug!(dropped, "Provider registry reset");
    }

    /// Number of initialised providers.
    pub async fn len(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderKind, keys};
    use crate::error::ConfigurationError;
    use crate::providers::{MockProvider, MockProviderFactory};
    use std::collections::BTreeMap;

    fn resend_config(api_key: &str) -> ProviderConfig {
        let credentials = BTreeMap::from([(keys::API_KEY.to_string(), api_key.to_string())]);
        ProviderConfig::new(ProviderKind::Resend, credentials, BTreeMap::new(), false).unwrap()
    }

    fn registry_with(mock: &MockProvider) -> (ProviderRegistry, MockProviderFactory) {
        let factory = MockProviderFactory::new().with_provider(ProviderKind::Resend, mock.clone());
        (ProviderRegistry::with_factory(Arc::new(factory.clone())), factory)
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint(&resend_config("re_a")), fingerprint(&resend_config("re_a")));
        assert_ne!(fingerprint(&resend_config("re_a")), fingerprint(&resend_config("re_b")));
        assert_ne!(
            fingerprint(&resend_config("re_a")),
            fingerprint(&ProviderConfig::console())
        );
    }

    #[tokio::test]
    async fn test_same_config_returns_cached_instance() {
        let mock = MockProvider::new("Resend");
        let (registry, factory) = registry_with(&mock);
        let config = resend_config("re_a");

        let first = registry.get_or_create(&config).await.unwrap();
        let second = registry.get_or_create(&config).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mock.initialize_count(), 1);
        assert_eq!(factory.created_count(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_initialize_once() {
        let mock = MockProvider::new("Resend");
        let (registry, _) = registry_with(&mock);
        let config = resend_config("re_a");

        let (a, b) = tokio::join!(registry.get_or_create(&config), registry.get_or_create(&config));

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(mock.initialize_count(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_is_not_cached() {
        let mock = MockProvider::new("Resend").unhealthy();
        let (registry, factory) = registry_with(&mock);
        let config = resend_config("re_a");

        let err = registry.get_or_create(&config).await.err().unwrap();
        assert!(matches!(err, RegistryError::Unhealthy { ref provider, .. } if provider == "Resend"));
        assert!(registry.is_empty().await);

        // A second call tries again instead of returning a cached instance
        assert!(registry.get_or_create(&config).await.is_err());
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_variant_surfaces_configuration_error() {
        let registry = ProviderRegistry::with_factory(Arc::new(MockProviderFactory::new()));

        let err = registry.get_or_create(&resend_config("re_a")).await.err().unwrap();

        assert!(matches!(
            err,
            RegistryError::Configuration(ConfigurationError::NotImplemented(ProviderKind::Resend))
        ));
    }

    #[tokio::test]
    async fn test_failed_creation_frees_its_slot() {
        let mock = MockProvider::new("Resend").unhealthy();
        let (registry, _) = registry_with(&mock);

        for key in ["re_a", "re_b", "re_c"] {
            assert!(registry.get_or_create(&resend_config(key)).await.is_err());
        }

        assert_eq!(registry.slots.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_panicking_initialize_becomes_registry_error() {
        let mock = MockProvider::new("Resend").panicking_on_initialize();
        let (registry, _) = registry_with(&mock);

        let err = registry.get_or_create(&resend_config("re_a")).await.err().unwrap();

        assert!(matches!(
            err,
            RegistryError::Panicked { provider: ProviderKind::Resend, ref details }
                if details.contains("panicked during initialize")
        ));
        assert!(registry.slots.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_drops_instances() {
        let mock = MockProvider::new("Resend");
        let (registry, _) = registry_with(&mock);
        let config = resend_config("re_a");

        let first = registry.get_or_create(&config).await.unwrap();
        registry.reset().await;
        assert!(registry.is_empty().await);

        let second = registry.get_or_create(&config).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(mock.initialize_count(), 2);
    }

    #[tokio::test]
    async fn test_default_factory_builds_console() {
        let registry = ProviderRegistry::new();
        let provider = registry.get_or_create(&ProviderConfig::console()).await.unwrap();
        assert_eq!(provider.name(), "Console");
    }
}
