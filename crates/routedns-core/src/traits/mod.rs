//! Core traits for the routedns system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DnsProvider`]: Read and write records in a DNS backend
//! - [`ProxyProvider`]: Discover routes from reverse-proxy instances
//! - [`StateStore`]: Persistent ownership state

pub mod dns_provider;
pub mod proxy_provider;
pub mod state_store;

pub use dns_provider::{DnsProvider, DnsProviderFactory, DnsRecord};
pub use proxy_provider::{
    BasicAuth, DiscoveredRoute, ProxyInstance, ProxyProvider, ProxyProviderFactory,
};
pub use state_store::{InstanceHealth, OwnershipState, StateStore};
