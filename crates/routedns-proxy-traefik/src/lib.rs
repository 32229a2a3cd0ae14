// # Traefik Proxy Provider
//
// This crate discovers hostnames served by one or more Traefik instances
// through the Traefik API (`GET /api/http/routers`).
//
// ## Discovery
//
// Each router contributes every hostname in its `rule` that appears inside a
// ``Host(`...`)`` matcher (backticks, double or single quotes). The router
// `name` is passed on as the zone hint, so `app-external@docker` lands in the
// external zone.
//
// Per-instance filters:
//
// - `router_filter`: shell-glob on the router name
// - `middleware_filter`: router must use this middleware (case-insensitive,
//   `@provider` suffix ignored)
//
// ## Reachability
//
// A response that is not a JSON array makes the whole instance unreachable for
// the cycle. Individual non-object entries are skipped.

use async_trait::async_trait;
use regex::Regex;
use routedns_core::classifier::glob_matches;
use routedns_core::retry::RetryPolicy;
use routedns_core::traits::{DiscoveredRoute, ProxyInstance, ProxyProvider, ProxyProviderFactory};
use routedns_core::{Error, ProviderRegistry, Result};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for a single API request
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry discriminator (`type: traefik`)
pub const PROVIDER_NAME: &str = "traefik";

/// Router API path relative to the instance URL
const ROUTERS_PATH: &str = "/api/http/routers";

const HOST_RULE_PATTERN: &str = r#"Host\([`"']([^`"']+)[`"']\)"#;

/// Traefik proxy provider polling a fixed list of instances
pub struct TraefikProvider {
    instances: Vec<ProxyInstance>,

    /// One client per instance name (TLS verification differs per instance)
    clients: HashMap<String, reqwest::Client>,

    host_rule: Regex,

    retry: RetryPolicy,
}

impl std::fmt::Debug for TraefikProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraefikProvider")
            .field("instances", &self.instances)
            .field("retry", &self.retry)
            .finish()
    }
}

fn build_client(instance: &ProxyInstance) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .danger_accept_invalid_certs(!instance.verify_tls)
        .build()
        .map_err(|e| {
            Error::config(format!(
                "Failed to build HTTP client for source '{}': {}",
                instance.name, e
            ))
        })
}

impl TraefikProvider {
    /// Create a provider for `instances`, kept in the given order
    pub fn new(instances: Vec<ProxyInstance>, retry: RetryPolicy) -> Result<Self> {
        let mut clients = HashMap::with_capacity(instances.len());
        for instance in &instances {
            if !instance.verify_tls {
                warn!(
                    "TLS verification disabled for source '{}' ({})",
                    instance.name, instance.url
                );
            }
            clients.insert(instance.name.clone(), build_client(instance)?);
        }

        let host_rule = Regex::new(HOST_RULE_PATTERN)
            .map_err(|e| Error::Other(format!("invalid host rule pattern: {}", e)))?;

        Ok(Self {
            instances,
            clients,
            host_rule,
            retry,
        })
    }

    /// One GET attempt against the router API
    async fn fetch_once(&self, client: &reqwest::Client, instance: &ProxyInstance) -> Result<String> {
        let url = format!("{}{}", instance.url.trim_end_matches('/'), ROUTERS_PATH);
        let mut request = client.get(&url);
        if let Some(auth) = &instance.auth
            && !auth.username.is_empty()
            && !auth.password.is_empty()
        {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(format!("{}: {}", instance.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => Error::auth(format!(
                    "Traefik '{}' rejected the credentials (HTTP {})",
                    instance.name,
                    status.as_u16()
                )),
                code => Error::http(code, format!("{}: {}", instance.name, body.trim())),
            });
        }

        response
            .text()
            .await
            .map_err(|e| Error::transport(format!("{}: {}", instance.name, e)))
    }

    /// Turn a router list into routes, applying the instance's filters
    pub fn parse_routers(&self, body: &str, instance: &ProxyInstance) -> Result<Vec<DiscoveredRoute>> {
        let value: Value = serde_json::from_str(body)?;
        let Value::Array(routers) = value else {
            return Err(Error::malformed(format!(
                "Unexpected response format from {}: expected a list of routers",
                instance.name
            )));
        };

        let mut routes = Vec::new();
        for router in &routers {
            let Some(router) = router.as_object() else {
                debug!("Skipping non-object router entry: {}", router);
                continue;
            };
            let name = router.get("name").and_then(Value::as_str).unwrap_or("");

            if let Some(pattern) = &instance.route_filter
                && !glob_matches(pattern, name)
            {
                debug!("Router '{}' filtered out by name pattern '{}'", name, pattern);
                continue;
            }

            if let Some(middleware) = &instance.middleware_filter
                && !has_middleware(router.get("middlewares"), middleware)
            {
                debug!("Router '{}' filtered out by middleware '{}'", name, middleware);
                continue;
            }

            let rule = router.get("rule").and_then(Value::as_str).unwrap_or("");
            for host in self.extract_hosts(rule) {
                routes.push(DiscoveredRoute::new(host, name));
            }
        }
        Ok(routes)
    }

    /// Hostnames inside `Host(...)` matchers of `rule`, sorted and deduplicated
    pub fn extract_hosts(&self, rule: &str) -> BTreeSet<String> {
        self.host_rule
            .captures_iter(rule)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|host| !host.is_empty())
            .collect()
    }
}

/// Whether a router's `middlewares` list contains `wanted`
fn has_middleware(middlewares: Option<&Value>, wanted: &str) -> bool {
    let Some(Value::Array(middlewares)) = middlewares else {
        return false;
    };
    let wanted = wanted.to_ascii_lowercase();
    middlewares
        .iter()
        .filter_map(Value::as_str)
        .map(|mw| mw.split('@').next().unwrap_or(mw).to_ascii_lowercase())
        .any(|mw| mw == wanted)
}

#[async_trait]
impl ProxyProvider for TraefikProvider {
    fn get_instances(&self) -> Vec<ProxyInstance> {
        self.instances.clone()
    }

    async fn get_routes(&self, instance: &ProxyInstance) -> Result<Vec<DiscoveredRoute>> {
        let client = match self.clients.get(&instance.name) {
            Some(client) => client.clone(),
            None => build_client(instance)?,
        };

        let body = self
            .retry
            .run(|| self.fetch_once(&client, instance))
            .await?;
        let routes = self.parse_routers(&body, instance)?;
        debug!("{}: {} route(s) discovered", instance.name, routes.len());
        Ok(routes)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

/// Factory for creating Traefik providers
pub struct TraefikFactory;

impl ProxyProviderFactory for TraefikFactory {
    fn create(
        &self,
        instances: Vec<ProxyInstance>,
        retry: &RetryPolicy,
    ) -> Result<Box<dyn ProxyProvider>> {
        Ok(Box::new(TraefikProvider::new(instances, retry.clone())?))
    }
}

/// Register the Traefik provider with a registry
pub fn register(registry: &ProviderRegistry) {
    registry.register_proxy_provider(PROVIDER_NAME, Box::new(TraefikFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn instance(url: &str) -> ProxyInstance {
        ProxyInstance::new("core", url, [10, 0, 0, 2].into())
    }

    fn provider(instance: &ProxyInstance) -> TraefikProvider {
        TraefikProvider::new(vec![instance.clone()], fast_retry()).unwrap()
    }

    fn domains(routes: &[DiscoveredRoute]) -> Vec<&str> {
        routes.iter().map(|r| r.domain.as_str()).collect()
    }

    #[test]
    fn extracts_hosts_with_any_quote_style() {
        let p = provider(&instance("http://traefik:8080"));
        let hosts = p.extract_hosts(
            "Host(`b.example.com`) || Host(\"a.example.com\") || (Host('c.example.com') && PathPrefix(`/api`))",
        );
        assert_eq!(
            hosts.into_iter().collect::<Vec<_>>(),
            vec!["a.example.com", "b.example.com", "c.example.com"]
        );
    }

    #[test]
    fn rule_without_host_yields_nothing() {
        let p = provider(&instance("http://traefik:8080"));
        assert!(p.extract_hosts("PathPrefix(`/api`)").is_empty());
        assert!(p.extract_hosts("").is_empty());
    }

    #[test]
    fn router_name_becomes_zone_hint() {
        let inst = instance("http://traefik:8080");
        let body = r#"[
            {"name": "app-internal@docker", "rule": "Host(`app.example.com`)"},
            "not-a-router",
            {"name": "api@docker", "rule": "Host(`api.example.com`) || Host(`api2.example.com`)"}
        ]"#;

        let routes = provider(&inst).parse_routers(body, &inst).unwrap();
        assert_eq!(
            routes,
            vec![
                DiscoveredRoute::new("app.example.com", "app-internal@docker"),
                DiscoveredRoute::new("api.example.com", "api@docker"),
                DiscoveredRoute::new("api2.example.com", "api@docker"),
            ]
        );
    }

    #[test]
    fn non_array_response_is_malformed() {
        let inst = instance("http://traefik:8080");
        let err = provider(&inst)
            .parse_routers(r#"{"routers": []}"#, &inst)
            .unwrap_err();
        assert_eq!(err.kind(), routedns_core::ErrorKind::MalformedData);
    }

    #[test]
    fn router_filter_uses_glob() {
        let mut inst = instance("http://traefik:8080");
        inst.route_filter = Some("*-internal*".to_string());
        let body = r#"[
            {"name": "app-internal@docker", "rule": "Host(`app.example.com`)"},
            {"name": "public@docker", "rule": "Host(`public.example.com`)"}
        ]"#;

        let routes = provider(&inst).parse_routers(body, &inst).unwrap();
        assert_eq!(domains(&routes), vec!["app.example.com"]);
    }

    #[test]
    fn middleware_filter_ignores_case_and_provider_suffix() {
        let mut inst = instance("http://traefik:8080");
        inst.middleware_filter = Some("LAN-Only".to_string());
        let body = r#"[
            {"name": "a", "rule": "Host(`a.example.com`)", "middlewares": ["lan-only@file"]},
            {"name": "b", "rule": "Host(`b.example.com`)", "middlewares": ["auth@docker"]},
            {"name": "c", "rule": "Host(`c.example.com`)"},
            {"name": "d", "rule": "Host(`d.example.com`)", "middlewares": "lan-only"}
        ]"#;

        let routes = provider(&inst).parse_routers(body, &inst).unwrap();
        assert_eq!(domains(&routes), vec!["a.example.com"]);
    }

    #[test]
    fn register_adds_traefik() {
        let registry = ProviderRegistry::new();
        register(&registry);
        assert!(registry.has_proxy_provider("Traefik"));
    }

    #[tokio::test]
    async fn get_routes_queries_router_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/http/routers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "app@docker", "rule": "Host(`app.example.com`)"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let inst = instance(&format!("{}/", server.uri()));
        let routes = provider(&inst).get_routes(&inst).await.unwrap();
        assert_eq!(domains(&routes), vec!["app.example.com"]);
    }

    #[tokio::test]
    async fn empty_router_list_is_a_confirmed_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/http/routers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        assert!(provider(&inst).get_routes(&inst).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn basic_auth_is_sent_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/http/routers"))
            .and(basic_auth("admin", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let inst = instance(&server.uri()).with_auth("admin", "secret");
        provider(&inst).get_routes(&inst).await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/http/routers"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        let err = provider(&inst).get_routes(&inst).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_instance_is_a_transport_error() {
        let inst = instance("http://127.0.0.1:9");
        let p = TraefikProvider::new(vec![inst.clone()], RetryPolicy::no_retry()).unwrap();

        let err = p.get_routes(&inst).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn instances_keep_configuration_order() {
        let instances = vec![
            ProxyInstance::new("zeta", "http://z:8080", [10, 0, 0, 26].into()),
            ProxyInstance::new("alpha", "http://a:8080", [10, 0, 0, 1].into()),
        ];
        let p = TraefikProvider::new(instances, fast_retry()).unwrap();
        let names: Vec<String> = p.get_instances().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
