// # DNS Provider Trait
//
// Defines the interface for reading and writing records in a DNS backend.
//
// ## Implementations
//
// - AdGuard Home rewrites: `routedns-provider-adguard` crate
// - Future: Pi-hole local DNS, Technitium, etc.
//
// ## Usage
//
// ```rust,ignore
// use routedns_core::DnsProvider;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let provider = /* DnsProvider implementation */;
//
//     for record in provider.get_records().await? {
//         println!("{} -> {}", record.domain, record.answer);
//     }
//     provider.add_record("app.example.com", "10.0.0.2").await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A hostname-to-answer entry stored in the DNS provider
///
/// The answer is kept as the provider returned it. Providers such as AdGuard
/// accept CNAME-style answers too, and records the reconciler does not own
/// must survive a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Fully-qualified domain name
    pub domain: String,
    /// Record answer (usually an IP address)
    pub answer: String,
}

impl DnsRecord {
    /// Create a new record
    pub fn new(domain: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            answer: answer.into(),
        }
    }

    /// Whether this record already answers with `ip`
    ///
    /// Compares parsed addresses so that equivalent IPv6 spellings match.
    pub fn answers_with(&self, ip: IpAddr) -> bool {
        match self.answer.trim().parse::<IpAddr>() {
            Ok(current) => current == ip,
            Err(_) => false,
        }
    }
}

/// Trait for DNS provider implementations
///
/// The reconciler depends on this trait only. Implementations wrap each
/// outbound call in a [`RetryPolicy`](crate::retry::RetryPolicy) and report
/// the final outcome; they never decide *whether* a record should change.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a provider can be shared with
/// the watch loop's task.
///
/// # Malformed Data
///
/// [`get_records`](DnsProvider::get_records) must not fail because one entry is
/// malformed. Unparseable entries are skipped with a warning and the valid
/// subset is returned. An error is only returned when the provider could not
/// be reached or the response as a whole is unusable.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Check that the provider is reachable and accepts our credentials
    async fn test_connection(&self) -> bool;

    /// List every record currently stored in the provider
    async fn get_records(&self) -> Result<Vec<DnsRecord>, crate::Error>;

    /// Create a record
    async fn add_record(&self, domain: &str, answer: &str) -> Result<(), crate::Error>;

    /// Delete the record `domain -> answer`
    async fn delete_record(&self, domain: &str, answer: &str) -> Result<(), crate::Error>;

    /// Replace `domain -> old_answer` with `domain -> new_answer`
    ///
    /// The default implementation deletes the old record and then adds the
    /// new one. Providers with a native update call should override it.
    async fn update_record(
        &self,
        domain: &str,
        old_answer: &str,
        new_answer: &str,
    ) -> Result<(), crate::Error> {
        self.delete_record(domain, old_answer).await?;
        self.add_record(domain, new_answer).await
    }

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this provider
    /// - `retry`: Retry policy the provider must wrap its calls in
    fn create(
        &self,
        config: &crate::config::DnsProviderConfig,
        retry: &crate::retry::RetryPolicy,
    ) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
