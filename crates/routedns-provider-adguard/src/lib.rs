// # AdGuard Home DNS Provider
//
// This crate provides a `DnsProvider` backed by AdGuard Home's DNS rewrite
// list.
//
// ## Behaviour
//
// - Every HTTP call goes through the configured `RetryPolicy`
// - 5 second timeout per request
// - Optional HTTP basic auth (only when both username and password are set)
// - `update_record` uses the trait default (delete old, then add new) since
//   AdGuard's rewrite API has no atomic replace
// - Malformed entries in the rewrite list are skipped, never fatal
//
// ## Security Requirements
//
// - The password NEVER appears in logs or `Debug` output
//
// ## API Reference
//
// - Status: GET `/control/status`
// - List rewrites: GET `/control/rewrite/list` -> `[{"domain": .., "answer": ..}]`
// - Add rewrite: POST `/control/rewrite/add` `{"domain": .., "answer": ..}`
// - Delete rewrite: POST `/control/rewrite/delete` `{"domain": .., "answer": ..}`

use async_trait::async_trait;
use routedns_core::config::DnsProviderConfig;
use routedns_core::retry::RetryPolicy;
use routedns_core::traits::{DnsProvider, DnsProviderFactory, DnsRecord};
use routedns_core::{Error, ProviderRegistry, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timeout for a single API request
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry discriminator (`provider: adguard`)
pub const PROVIDER_NAME: &str = "adguard";

/// Request body for rewrite add/delete
#[derive(Serialize)]
struct RewriteEntry<'a> {
    domain: &'a str,
    answer: &'a str,
}

/// AdGuard Home DNS provider
pub struct AdGuardProvider {
    /// Base URL without trailing slash
    url: String,

    /// `(username, password)` when authentication is configured
    /// ⚠️ NEVER log the password
    credentials: Option<(String, String)>,

    client: reqwest::Client,

    retry: RetryPolicy,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for AdGuardProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdGuardProvider")
            .field("url", &self.url)
            .field(
                "username",
                &self.credentials.as_ref().map(|(user, _)| user.as_str()),
            )
            .field("password", &"<REDACTED>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl AdGuardProvider {
    /// Create a provider for the AdGuard Home instance at `url`
    ///
    /// Credentials are used only when both are non-empty.
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(Error::config("AdGuard URL is required"));
        }

        let (username, password) = (username.into(), password.into());
        let credentials = if !username.is_empty() && !password.is_empty() {
            Some((username, password))
        } else {
            None
        };

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url,
            credentials,
            client,
            retry,
        })
    }

    /// Base URL of the AdGuard instance
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.url, path));
        match &self.credentials {
            Some((username, password)) => builder.basic_auth(username, Some(password)),
            None => builder,
        }
    }

    /// One GET attempt returning the response body
    async fn get_once(&self, path: &str) -> Result<String> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        response.text().await.map_err(transport_error)
    }

    /// One POST attempt with a rewrite entry body
    async fn post_once(&self, path: &str, domain: &str, answer: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(&RewriteEntry { domain, answer })
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::transport(e.to_string())
}

/// Map a non-success response to an error carrying the status code
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    match status.as_u16() {
        401 | 403 => Err(Error::auth(format!(
            "AdGuard rejected the credentials (HTTP {})",
            status.as_u16()
        ))),
        code => Err(Error::http(code, body.trim().to_string())),
    }
}

/// Parse the rewrite list, skipping malformed entries
///
/// A body that is not a JSON array is rejected as a whole.
fn parse_rewrites(body: &str) -> Result<Vec<DnsRecord>> {
    let value: Value = serde_json::from_str(body)?;
    let Value::Array(entries) = value else {
        return Err(Error::malformed(
            "AdGuard rewrite list is not a JSON array",
        ));
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let domain = entry.get("domain").and_then(Value::as_str);
        let answer = entry.get("answer").and_then(Value::as_str);
        match (domain, answer) {
            (Some(domain), Some(answer)) => records.push(DnsRecord::new(domain, answer)),
            _ => warn!("Skipping malformed AdGuard rewrite entry: {}", entry),
        }
    }
    Ok(records)
}

#[async_trait]
impl DnsProvider for AdGuardProvider {
    async fn test_connection(&self) -> bool {
        match self.retry.run(|| self.get_once("/control/status")).await {
            Ok(_) => {
                info!("AdGuard Home connection successful ({})", self.url);
                true
            }
            Err(e) => {
                error!("Failed to connect to AdGuard Home at {}: {}", self.url, e);
                false
            }
        }
    }

    async fn get_records(&self) -> Result<Vec<DnsRecord>> {
        let body = self
            .retry
            .run(|| self.get_once("/control/rewrite/list"))
            .await?;
        let records = parse_rewrites(&body)?;
        debug!("AdGuard returned {} rewrite(s)", records.len());
        Ok(records)
    }

    async fn add_record(&self, domain: &str, answer: &str) -> Result<()> {
        self.retry
            .run(|| self.post_once("/control/rewrite/add", domain, answer))
            .await?;
        info!("Added DNS record: {} -> {}", domain, answer);
        Ok(())
    }

    async fn delete_record(&self, domain: &str, answer: &str) -> Result<()> {
        self.retry
            .run(|| self.post_once("/control/rewrite/delete", domain, answer))
            .await?;
        info!("Deleted DNS record: {} -> {}", domain, answer);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

/// Factory for creating AdGuard providers
pub struct AdGuardFactory;

impl DnsProviderFactory for AdGuardFactory {
    fn create(
        &self,
        config: &DnsProviderConfig,
        retry: &RetryPolicy,
    ) -> Result<Box<dyn DnsProvider>> {
        if config.url.trim().is_empty() {
            return Err(Error::config(format!(
                "DNS provider '{}' has no url",
                config.name
            )));
        }

        Ok(Box::new(AdGuardProvider::new(
            config.url.trim(),
            config.username.clone(),
            config.password.clone(),
            retry.clone(),
        )?))
    }
}

/// Register the AdGuard provider with a registry
///
/// # Example
///
/// ```rust
/// use routedns_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// routedns_provider_adguard::register(&registry);
/// assert!(registry.has_dns_provider("adguard"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_dns_provider(PROVIDER_NAME, Box::new(AdGuardFactory));
}
