//! Test doubles and common utilities for architecture contract tests
//!
//! The doubles keep their state behind `Arc`s so a test can hand one clone to
//! the reconciler and inspect another afterwards.

#![allow(dead_code)]

use routedns_core::error::{Error, Result};
use routedns_core::state::MemoryStateStore;
use routedns_core::traits::{DiscoveredRoute, DnsProvider, DnsRecord, ProxyInstance, ProxyProvider};
use routedns_core::Reconciler;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Parse an IP literal
pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// A proxy instance named `name` pointing records at `target_ip`
pub fn instance(name: &str, target_ip: &str) -> ProxyInstance {
    ProxyInstance::new(name, format!("http://{}:8080", name), ip(target_ip))
}

/// A route without a zone marker
pub fn route(domain: &str) -> DiscoveredRoute {
    DiscoveredRoute::new(domain, format!("{}@docker", domain.replace('.', "-")))
}

/// A route whose router name carries a zone marker
pub fn route_named(domain: &str, router: &str) -> DiscoveredRoute {
    DiscoveredRoute::new(domain, router)
}

/// A DNS provider keeping records in memory and logging every call
#[derive(Clone, Default)]
pub struct MockDnsProvider {
    records: Arc<Mutex<Vec<DnsRecord>>>,
    calls: Arc<Mutex<Vec<String>>>,
    failing_domains: Arc<Mutex<HashSet<String>>>,
    fail_listing: Arc<AtomicBool>,
    panic_on_listing: Arc<AtomicBool>,
    listings: Arc<AtomicUsize>,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with `(domain, answer)` pairs
    pub fn with_records(records: &[(&str, &str)]) -> Self {
        let provider = Self::new();
        *provider.records.lock().unwrap() = records
            .iter()
            .map(|(d, a)| DnsRecord::new(*d, *a))
            .collect();
        provider
    }

    /// Current records, sorted by domain
    pub fn records(&self) -> Vec<(String, String)> {
        let mut records: Vec<(String, String)> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.domain.clone(), r.answer.clone()))
            .collect();
        records.sort();
        records
    }

    /// Answer stored for `domain`, if any
    pub fn answer_for(&self, domain: &str) -> Option<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.domain == domain)
            .map(|r| r.answer.clone())
    }

    /// Mutating calls, e.g. `add a.example.com 10.0.0.1`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Mutating calls starting with `verb`
    pub fn calls_of(&self, verb: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(verb))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make every mutating call for `domain` fail
    pub fn fail_domain(&self, domain: &str) {
        self.failing_domains.lock().unwrap().insert(domain.to_string());
    }

    pub fn heal_domain(&self, domain: &str) {
        self.failing_domains.lock().unwrap().remove(domain);
    }

    /// Make `get_records` fail
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make `get_records` panic
    pub fn panic_on_listing(&self, panic: bool) {
        self.panic_on_listing.store(panic, Ordering::SeqCst);
    }

    /// Number of `get_records` calls
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    fn check(&self, domain: &str) -> Result<()> {
        if self.failing_domains.lock().unwrap().contains(domain) {
            return Err(Error::http(500, format!("injected failure for {}", domain)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DnsProvider for MockDnsProvider {
    async fn test_connection(&self) -> bool {
        !self.fail_listing.load(Ordering::SeqCst)
    }

    async fn get_records(&self) -> Result<Vec<DnsRecord>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_listing.load(Ordering::SeqCst) {
            panic!("injected panic in get_records");
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::transport("injected listing failure"));
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn add_record(&self, domain: &str, answer: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("add {} {}", domain, answer));
        self.check(domain)?;
        self.records
            .lock()
            .unwrap()
            .push(DnsRecord::new(domain, answer));
        Ok(())
    }

    async fn delete_record(&self, domain: &str, answer: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {} {}", domain, answer));
        self.check(domain)?;
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| !(r.domain == domain && r.answer == answer));
        if records.len() == before {
            return Err(Error::not_found(format!("{} -> {}", domain, answer)));
        }
        Ok(())
    }

    async fn update_record(&self, domain: &str, old_answer: &str, new_answer: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("update {} {} {}", domain, old_answer, new_answer));
        self.check(domain)?;
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.domain == domain && r.answer == old_answer)
        {
            Some(record) => {
                record.answer = new_answer.to_string();
                Ok(())
            }
            None => Err(Error::not_found(format!("{} -> {}", domain, old_answer))),
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock-dns"
    }
}

/// A proxy provider whose per-instance answers are scripted by the test
///
/// An instance without a script answers with no routes.
#[derive(Clone, Default)]
pub struct ScriptedProxyProvider {
    instances: Arc<Mutex<Vec<ProxyInstance>>>,
    scripts: Arc<Mutex<HashMap<String, std::result::Result<Vec<DiscoveredRoute>, String>>>>,
    polls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProxyProvider {
    pub fn new(instances: Vec<ProxyInstance>) -> Self {
        let provider = Self::default();
        *provider.instances.lock().unwrap() = instances;
        provider
    }

    /// Instance `name` answers with `routes`
    pub fn set_routes(&self, name: &str, routes: Vec<DiscoveredRoute>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), Ok(routes));
    }

    /// Instance `name` fails to answer
    pub fn set_unreachable(&self, name: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), Err(format!("{} timed out", name)));
    }

    /// Replace the configured instances
    pub fn set_instances(&self, instances: Vec<ProxyInstance>) {
        *self.instances.lock().unwrap() = instances;
    }

    /// Configured instances
    pub fn instances(&self) -> Vec<ProxyInstance> {
        self.instances.lock().unwrap().clone()
    }

    /// Instance names in the order they were polled
    pub fn polls(&self) -> Vec<String> {
        self.polls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProxyProvider for ScriptedProxyProvider {
    fn get_instances(&self) -> Vec<ProxyInstance> {
        self.instances.lock().unwrap().clone()
    }

    async fn get_routes(&self, instance: &ProxyInstance) -> Result<Vec<DiscoveredRoute>> {
        self.polls.lock().unwrap().push(instance.name.clone());
        match self.scripts.lock().unwrap().get(&instance.name) {
            Some(Ok(routes)) => Ok(routes.clone()),
            Some(Err(message)) => Err(Error::transport(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn provider_name(&self) -> &'static str {
        "scripted-proxy"
    }
}

/// Everything a reconciliation test needs, sharing state with the reconciler
pub struct Harness {
    pub dns: MockDnsProvider,
    pub proxy: ScriptedProxyProvider,
    pub store: MemoryStateStore,
}

impl Harness {
    pub fn new(instances: Vec<ProxyInstance>) -> Self {
        Self {
            dns: MockDnsProvider::new(),
            proxy: ScriptedProxyProvider::new(instances),
            store: MemoryStateStore::new(),
        }
    }

    pub fn with_dns(mut self, dns: MockDnsProvider) -> Self {
        self.dns = dns;
        self
    }

    /// A reconciler wired to this harness's doubles
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Box::new(self.dns.clone()),
            Box::new(self.proxy.clone()),
            Box::new(self.store.clone()),
        )
    }
}
