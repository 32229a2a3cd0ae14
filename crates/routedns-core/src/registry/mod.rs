//! Plugin-based provider registry
//!
//! The registry maps configuration discriminators (`provider: adguard`,
//! `type: traefik`) to factories, so the daemon never grows an if-else chain
//! over concrete implementations. An unknown discriminator is a configuration
//! error whose message lists every registered alternative.
//!
//! ## Registration
//!
//! Implementations register themselves during initialization:
//!
//! ```rust,ignore
//! // In routedns-provider-adguard
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_dns_provider("adguard", Box::new(AdGuardFactory));
//! }
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = ProviderRegistry::new();
//! routedns_provider_adguard::register(&registry);
//! routedns_proxy_traefik::register(&registry);
//!
//! let dns = registry.create_dns_provider(&config.dns_provider, &retry)?;
//! let proxy = registry.create_proxy_provider(&config.proxy_provider, config.instances.clone(), &retry)?;
//! ```

use crate::config::DnsProviderConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::traits::{
    DnsProvider, DnsProviderFactory, ProxyInstance, ProxyProvider, ProxyProviderFactory,
};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Provider registry for plugin-based provider creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered DNS provider factories
    dns_providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,

    /// Registered proxy provider factories
    proxy_providers: RwLock<HashMap<String, Box<dyn ProxyProviderFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS provider factory under `name` (case-insensitive)
    pub fn register_dns_provider(
        &self,
        name: impl Into<String>,
        factory: Box<dyn DnsProviderFactory>,
    ) {
        let name = name.into().to_ascii_lowercase();
        let mut providers = self
            .dns_providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        providers.insert(name, factory);
    }

    /// Register a proxy provider factory under `name` (case-insensitive)
    pub fn register_proxy_provider(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ProxyProviderFactory>,
    ) {
        let name = name.into().to_ascii_lowercase();
        let mut providers = self
            .proxy_providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        providers.insert(name, factory);
    }

    /// Create a DNS provider from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DnsProvider>)`: Created provider instance
    /// - `Err(Error::Config)`: If `config.provider` is not registered or creation fails
    pub fn create_dns_provider(
        &self,
        config: &DnsProviderConfig,
        retry: &RetryPolicy,
    ) -> Result<Box<dyn DnsProvider>> {
        let providers = self
            .dns_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = providers
            .get(&config.provider.to_ascii_lowercase())
            .ok_or_else(|| unknown("DNS provider", &config.provider, providers.keys()))?;

        factory.create(config, retry)
    }

    /// Create a proxy provider polling `instances`
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ProxyProvider>)`: Created provider instance
    /// - `Err(Error::Config)`: If `name` is not registered or creation fails
    pub fn create_proxy_provider(
        &self,
        name: &str,
        instances: Vec<ProxyInstance>,
        retry: &RetryPolicy,
    ) -> Result<Box<dyn ProxyProvider>> {
        let providers = self
            .proxy_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = providers
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| unknown("proxy provider", name, providers.keys()))?;

        factory.create(instances, retry)
    }

    /// List all registered DNS provider types, sorted
    pub fn list_dns_providers(&self) -> Vec<String> {
        let providers = self
            .dns_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        sorted(providers.keys())
    }

    /// List all registered proxy provider types, sorted
    pub fn list_proxy_providers(&self) -> Vec<String> {
        let providers = self
            .proxy_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        sorted(providers.keys())
    }

    /// Check if a DNS provider type is registered
    pub fn has_dns_provider(&self, name: &str) -> bool {
        let providers = self
            .dns_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        providers.contains_key(&name.to_ascii_lowercase())
    }

    /// Check if a proxy provider type is registered
    pub fn has_proxy_provider(&self, name: &str) -> bool {
        let providers = self
            .proxy_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        providers.contains_key(&name.to_ascii_lowercase())
    }
}

fn sorted<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut names: Vec<String> = names.cloned().collect();
    names.sort();
    names
}

fn unknown<'a>(what: &str, name: &str, registered: impl Iterator<Item = &'a String>) -> Error {
    let supported = sorted(registered);
    let supported = if supported.is_empty() {
        "none registered".to_string()
    } else {
        supported.join(", ")
    };
    Error::config(format!(
        "Unknown {} '{}'. Supported: {}",
        what, name, supported
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockDnsFactory;

    impl DnsProviderFactory for MockDnsFactory {
        fn create(
            &self,
            _config: &DnsProviderConfig,
            _retry: &RetryPolicy,
        ) -> Result<Box<dyn DnsProvider>> {
            Err(Error::not_found("Mock provider not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ProviderRegistry::new();

        // Initially empty
        assert!(!registry.has_dns_provider("mock"));

        // Register
        registry.register_dns_provider("Mock", Box::new(MockDnsFactory));

        // Now present, case-insensitively
        assert!(registry.has_dns_provider("mock"));
        assert!(registry.has_dns_provider("MOCK"));
        assert_eq!(registry.list_dns_providers(), vec!["mock".to_string()]);
        assert!(registry.list_proxy_providers().is_empty());
    }

    #[test]
    fn test_unknown_provider_lists_supported() {
        let registry = ProviderRegistry::new();
        registry.register_dns_provider("mock", Box::new(MockDnsFactory));
        registry.register_dns_provider("adguard", Box::new(MockDnsFactory));

        let config = DnsProviderConfig::new("pihole", "http://pihole");
        let err = match registry.create_dns_provider(&config, &RetryPolicy::no_retry()) {
            Err(e) => e,
            Ok(_) => panic!("unknown provider must not be created"),
        };
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("'pihole'"));
        assert!(err.to_string().contains("adguard, mock"));

        let err = match registry.create_proxy_provider("caddy", Vec::new(), &RetryPolicy::no_retry())
        {
            Err(e) => e,
            Ok(_) => panic!("unknown provider must not be created"),
        };
        assert!(err.to_string().contains("none registered"));
    }
}
