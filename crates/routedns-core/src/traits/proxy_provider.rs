// # Proxy Provider Trait
//
// Defines the interface for discovering hostnames exposed by reverse-proxy
// instances.
//
// ## Implementations
//
// - Traefik HTTP routers: `routedns-proxy-traefik` crate
// - Future: Caddy, nginx-proxy-manager, etc.
//
// ## Usage
//
// ```rust,ignore
// use routedns_core::ProxyProvider;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let provider = /* ProxyProvider implementation */;
//
//     for instance in provider.get_instances() {
//         let routes = provider.get_routes(&instance).await?;
//         println!("{}: {} route(s)", instance.name, routes.len());
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// HTTP basic-auth credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    /// User name
    pub username: String,
    /// Password
    /// ⚠️ NEVER log this value
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// A configured reverse-proxy instance to poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyInstance {
    /// Unique instance name, used as the ownership key
    pub name: String,
    /// Base URL of the proxy's API
    pub url: String,
    /// IP address DNS answers for this instance's routes point to
    pub target_ip: IpAddr,
    /// Optional basic-auth credentials for the API
    pub auth: Option<BasicAuth>,
    /// Verify the API's TLS certificate
    pub verify_tls: bool,
    /// Shell-glob on route names; non-matching routes are ignored
    pub route_filter: Option<String>,
    /// Only keep routes that use this middleware
    pub middleware_filter: Option<String>,
}

impl ProxyInstance {
    /// Create an instance with TLS verification on and no filters
    pub fn new(name: impl Into<String>, url: impl Into<String>, target_ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            target_ip,
            auth: None,
            verify_tls: true,
            route_filter: None,
            middleware_filter: None,
        }
    }

    /// Set basic-auth credentials
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Enable or disable TLS verification
    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }
}

/// A hostname reported by a proxy instance, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRoute {
    /// Hostname the route serves
    pub domain: String,
    /// Identifying name of the route (e.g. Traefik router name), used for zone detection
    pub zone_hint: String,
}

impl DiscoveredRoute {
    /// Create a discovered route
    pub fn new(domain: impl Into<String>, zone_hint: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            zone_hint: zone_hint.into(),
        }
    }
}

/// Trait for reverse-proxy provider implementations
///
/// # Reachability
///
/// `get_routes` returning `Ok` means the instance answered and the routes
/// are the complete set it currently exposes. An empty `Ok` list is a
/// confirmation that the instance has no routes, which allows the reconciler
/// to delete the records it owns.
///
/// Any `Err` (transport failure after retries, HTTP error, or a response whose
/// overall shape is invalid) marks the instance unreachable for this cycle.
/// Individual malformed entries inside an otherwise valid response are skipped
/// with a warning instead.
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// The configured instances, in configuration order
    fn get_instances(&self) -> Vec<ProxyInstance>;

    /// Fetch every route currently exposed by `instance`
    async fn get_routes(
        &self,
        instance: &ProxyInstance,
    ) -> Result<Vec<DiscoveredRoute>, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing proxy providers from configuration
pub trait ProxyProviderFactory: Send + Sync {
    /// Create a ProxyProvider polling `instances`
    fn create(
        &self,
        instances: Vec<ProxyInstance>,
        retry: &crate::retry::RetryPolicy,
    ) -> Result<Box<dyn ProxyProvider>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_not_exposed_in_debug() {
        let instance = ProxyInstance::new("core", "http://traefik:8080", [10, 0, 0, 2].into())
            .with_auth("admin", "hunter2-secret");

        let debug_str = format!("{:?}", instance);
        assert!(!debug_str.contains("hunter2-secret"));
        assert!(debug_str.contains("admin"));
    }
}
