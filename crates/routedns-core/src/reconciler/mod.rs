//! Core reconciliation engine
//!
//! The Reconciler is responsible for:
//! - Discovering routes on every configured proxy instance
//! - Classifying them (zone, exclusions) and resolving cross-instance conflicts
//! - Diffing the desired set against the DNS provider's current records
//! - Applying the resulting operations, one at a time
//! - Producing the next [`OwnershipState`]
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   routes    ┌──────────────┐   records   ┌──────────────┐
//! │ ProxyProvider │────────────▶│  Reconciler  │◀────────────│ DnsProvider  │
//! └───────────────┘             └──────────────┘             └──────────────┘
//!                                 │    ▲     │  add/update/delete     ▲
//!                      classify   │    │     └────────────────────────┘
//!                                 ▼    │ previous / next state
//!                         ┌────────────┐  ┌────────────┐
//!                         │ Classifier │  │ StateStore │
//!                         └────────────┘  └────────────┘
//! ```
//!
//! ## Deletion Safety
//!
//! A record is deleted only when all of the following hold:
//! 1. The domain is in the previous ownership state
//! 2. Its owner answered this cycle (or is no longer configured at all)
//! 3. No instance and no static rewrite wants the domain any more
//!
//! Only records answering with the owner's target IP are deleted; a record
//! the reconciler never created is never deleted, even when it shares a
//! name with an owned one. An instance that fails to answer keeps every
//! domain it owns until it answers again, and no other instance can take
//! such a domain over in the meantime.

use crate::classifier::{self, ExclusionPattern, Zone};
use crate::config::{StaticRewrite, SyncConfig};
use crate::error::Result;
use crate::traits::{
    DnsProvider, DnsRecord, InstanceHealth, OwnershipState, ProxyInstance, ProxyProvider,
    StateStore,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, error, info, warn};

/// A single change requested from the DNS provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsOperation {
    /// Create `domain -> ip`
    Add {
        /// Domain name
        domain: String,
        /// Answer to create
        ip: IpAddr,
    },

    /// Replace the answer of an existing record
    Update {
        /// Domain name, as stored by the provider
        domain: String,
        /// Answer currently stored
        old_answer: String,
        /// Answer to store instead
        ip: IpAddr,
    },

    /// Remove an existing record
    Delete {
        /// Domain name, as stored by the provider
        domain: String,
        /// Answer currently stored
        answer: String,
    },
}

impl DnsOperation {
    /// Domain the operation applies to
    pub fn domain(&self) -> &str {
        match self {
            Self::Add { domain, .. } | Self::Update { domain, .. } | Self::Delete { domain, .. } => {
                domain
            }
        }
    }
}

impl fmt::Display for DnsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { domain, ip } => write!(f, "add {} -> {}", domain, ip),
            Self::Update {
                domain,
                old_answer,
                ip,
            } => write!(f, "update {} {} -> {}", domain, old_answer, ip),
            Self::Delete { domain, answer } => write!(f, "delete {} -> {}", domain, answer),
        }
    }
}

/// An operation the DNS provider rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperation {
    /// The operation that was attempted
    pub operation: DnsOperation,
    /// Provider error message
    pub error: String,
}

/// Two instances offered the same domain in one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Contested domain
    pub domain: String,
    /// Instance that keeps the domain (earlier in configuration order)
    pub winner: String,
    /// Instance whose route was discarded
    pub loser: String,
}

/// How one reachable instance's routes were classified
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCounts {
    /// Instance name
    pub instance: String,
    /// Routes kept for the internal zone
    pub internal: usize,
    /// Routes dropped by an exclusion pattern
    pub excluded: usize,
    /// Routes in the external zone
    pub external: usize,
}

/// Outcome of one reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Ownership and health to persist
    pub state: OwnershipState,
    /// Operations the provider accepted, in application order
    pub applied: Vec<DnsOperation>,
    /// Operations the provider rejected
    pub failed: Vec<FailedOperation>,
    /// Non-fatal errors (unreachable instances, failed operations)
    pub errors: Vec<String>,
    /// Cross-instance conflicts
    pub conflicts: Vec<Conflict>,
    /// Instances that did not answer, in configuration order
    pub unreachable: Vec<String>,
    /// Route classification per reachable instance, in configuration order
    pub routes: Vec<RouteCounts>,
}

impl Reconciliation {
    /// Whether the cycle completed without any non-fatal error
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Who wants a domain to exist
#[derive(Debug, Clone, PartialEq, Eq)]
enum Claim {
    /// Discovered on a proxy instance
    Route { owner: String },
    /// Operator-declared
    Static,
}

#[derive(Debug, Clone)]
struct Desired {
    ip: IpAddr,
    claim: Claim,
}

/// An operation plus its effect on ownership
#[derive(Debug)]
struct Planned {
    key: String,
    operation: DnsOperation,
    owner_on_success: Option<String>,
    owner_on_failure: Option<String>,
}

/// Core reconciliation engine
///
/// A Reconciler is immutable for its whole life. On configuration reload the
/// watch loop builds a new one instead of mutating this one.
pub struct Reconciler {
    dns: Box<dyn DnsProvider>,
    proxy: Box<dyn ProxyProvider>,
    store: Box<dyn StateStore>,
    default_zone: Zone,
    exclusions: Vec<ExclusionPattern>,
    static_rewrites: BTreeMap<String, IpAddr>,
}

impl Reconciler {
    /// Create a reconciler with no exclusions, no static rewrites and the
    /// internal default zone
    pub fn new(
        dns: Box<dyn DnsProvider>,
        proxy: Box<dyn ProxyProvider>,
        store: Box<dyn StateStore>,
    ) -> Self {
        Self {
            dns,
            proxy,
            store,
            default_zone: Zone::Internal,
            exclusions: Vec::new(),
            static_rewrites: BTreeMap::new(),
        }
    }

    /// Create a reconciler applying the rules of `config`
    pub fn from_config(
        config: &SyncConfig,
        dns: Box<dyn DnsProvider>,
        proxy: Box<dyn ProxyProvider>,
        store: Box<dyn StateStore>,
    ) -> Self {
        Self::new(dns, proxy, store)
            .with_default_zone(config.settings.default_zone)
            .with_exclusions(&config.exclude_domains)
            .with_static_rewrites(config.static_rewrites.iter().cloned())
    }

    /// Zone for routes without a zone suffix
    pub fn with_default_zone(mut self, zone: Zone) -> Self {
        self.default_zone = zone;
        self
    }

    /// Exclusion patterns; malformed ones are skipped with a warning
    pub fn with_exclusions<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.exclusions = classifier::compile_patterns(patterns);
        self
    }

    /// Records that must always exist
    pub fn with_static_rewrites(mut self, rewrites: impl IntoIterator<Item = StaticRewrite>) -> Self {
        self.static_rewrites = rewrites
            .into_iter()
            .map(|r| (normalize_domain(&r.domain), r.ip))
            .filter(|(domain, _)| !domain.is_empty())
            .collect();
        self
    }

    /// Check that the DNS provider is reachable
    pub async fn test_connection(&self) -> bool {
        self.dns.test_connection().await
    }

    /// Name of the DNS provider implementation
    pub fn dns_provider_name(&self) -> &'static str {
        self.dns.provider_name()
    }

    /// Name of the proxy provider implementation
    pub fn proxy_provider_name(&self) -> &'static str {
        self.proxy.provider_name()
    }

    /// Configured proxy instances, in configuration order
    pub fn instances(&self) -> Vec<ProxyInstance> {
        self.proxy.get_instances()
    }

    /// Run one full cycle: load state, reconcile, persist
    ///
    /// Failing to save the new state is logged and reported as a non-fatal
    /// error; the next cycle recomputes everything anyway.
    pub async fn run_cycle(&self) -> Result<Reconciliation> {
        let previous = self.store.load().await;
        let instances = self.proxy.get_instances();

        let mut report = self.reconcile(&instances, &previous).await?;

        if let Err(e) = self.store.save(&report.state).await {
            error!("Failed to persist state: {}", e);
            report.errors.push(format!("state: {}", e));
        }

        Ok(report)
    }

    /// Reconcile `instances` against the DNS provider
    ///
    /// # Errors
    ///
    /// Only a failure to list the provider's current records aborts the
    /// cycle. In that case nothing is applied and the previous state stays
    /// authoritative. Every other failure is collected in the report.
    pub async fn reconcile(
        &self,
        instances: &[ProxyInstance],
        previous: &OwnershipState,
    ) -> Result<Reconciliation> {
        let records = self.dns.get_records().await.map_err(|e| {
            error!(
                "Failed to list records from {}: {}",
                self.dns.provider_name(),
                e
            );
            e
        })?;

        let mut existing: BTreeMap<String, Vec<DnsRecord>> = BTreeMap::new();
        for record in records {
            let key = normalize_domain(&record.domain);
            if !key.is_empty() {
                existing.entry(key).or_default().push(record);
            }
        }

        let mut report = Reconciliation {
            state: OwnershipState::default(),
            applied: Vec::new(),
            failed: Vec::new(),
            errors: Vec::new(),
            conflicts: Vec::new(),
            unreachable: Vec::new(),
            routes: Vec::new(),
        };

        let (desired, reachable) = self
            .discover(instances, previous, &existing, &mut report)
            .await;
        let configured: HashSet<&str> = instances.iter().map(|i| i.name.as_str()).collect();

        let mut domains = BTreeMap::new();
        let mut plan = Vec::new();

        // Desired domains: add, update, adopt or leave alone
        for (key, want) in &desired {
            let current = existing.get(key).map(Vec::as_slice).unwrap_or_default();

            if current.iter().any(|r| r.answers_with(want.ip)) {
                if let Claim::Route { owner } = &want.claim {
                    if previous.owner_of(key).is_none() {
                        info!("Adopting existing record {} -> {} for {}", key, want.ip, owner);
                    }
                    domains.insert(key.clone(), owner.clone());
                }
                continue;
            }

            let Some(first) = current.first() else {
                plan.push(Planned {
                    key: key.clone(),
                    operation: DnsOperation::Add {
                        domain: key.clone(),
                        ip: want.ip,
                    },
                    owner_on_success: want.claim.owner(),
                    owner_on_failure: None,
                });
                continue;
            };

            let previous_owner = previous.owner_of(key).map(str::to_string);
            let owned = previous_owner
                .as_deref()
                .map(|owner| owned_answers(owner, instances, previous))
                .unwrap_or_default();
            let stale = current
                .iter()
                .find(|r| owned.iter().any(|ip| r.answers_with(*ip)))
                .unwrap_or(first);

            if want.claim == Claim::Static || previous_owner.is_some() {
                plan.push(Planned {
                    key: key.clone(),
                    operation: DnsOperation::Update {
                        domain: stale.domain.clone(),
                        old_answer: stale.answer.clone(),
                        ip: want.ip,
                    },
                    owner_on_success: want.claim.owner(),
                    owner_on_failure: want.claim.owner().and(previous_owner),
                });
            } else {
                warn!(
                    "Skipping {}: existing record points to {} (not managed), wanted {}",
                    key, stale.answer, want.ip
                );
            }
        }

        // Previously owned domains nobody wants any more
        for (key, owner) in &previous.domains {
            if desired.contains_key(key) {
                continue;
            }

            let Some(current) = existing.get(key) else {
                debug!("Record for {} no longer exists; dropping ownership", key);
                continue;
            };

            let removed = !configured.contains(owner.as_str());
            if !removed && !reachable.contains(owner.as_str()) {
                debug!("Keeping {}: owner {} is unreachable", key, owner);
                domains.insert(key.clone(), owner.clone());
                continue;
            }

            if removed {
                info!("Owner {} of {} is no longer configured", owner, key);
            }

            let owned = owned_answers(owner, instances, previous);
            if owned.is_empty() {
                warn!(
                    "Leaving {} alone: no known answer for its owner {}",
                    key, owner
                );
                continue;
            }

            for record in current {
                if !owned.iter().any(|ip| record.answers_with(*ip)) {
                    debug!(
                        "Preserving pre-existing record {} -> {}",
                        record.domain, record.answer
                    );
                    continue;
                }
                plan.push(Planned {
                    key: key.clone(),
                    operation: DnsOperation::Delete {
                        domain: record.domain.clone(),
                        answer: record.answer.clone(),
                    },
                    owner_on_success: None,
                    owner_on_failure: Some(owner.clone()),
                });
            }
        }

        plan.sort_by(|a, b| a.key.cmp(&b.key));
        self.apply(plan, &mut domains, &mut report).await;

        report.state.domains = domains;
        info!(
            "Reconciliation complete: {} applied, {} failed, {} conflict(s), {} unreachable",
            report.applied.len(),
            report.failed.len(),
            report.conflicts.len(),
            report.unreachable.len()
        );
        Ok(report)
    }

    /// Poll every instance and build the desired domain set
    ///
    /// Fills health, conflicts and unreachable instances into `report`. A
    /// domain whose record is owned by an unreachable instance is held for
    /// that instance: routes offering it elsewhere are ignored this cycle.
    async fn discover(
        &self,
        instances: &[ProxyInstance],
        previous: &OwnershipState,
        existing: &BTreeMap<String, Vec<DnsRecord>>,
        report: &mut Reconciliation,
    ) -> (BTreeMap<String, Desired>, HashSet<String>) {
        let mut desired: BTreeMap<String, Desired> = self
            .static_rewrites
            .iter()
            .map(|(domain, ip)| {
                (
                    domain.clone(),
                    Desired {
                        ip: *ip,
                        claim: Claim::Static,
                    },
                )
            })
            .collect();
        let now = Utc::now();

        // Poll everything first: holding a domain depends on every instance's reachability
        let mut polled = Vec::with_capacity(instances.len());
        for instance in instances {
            match self.proxy.get_routes(instance).await {
                Ok(routes) => {
                    debug!("Instance {} returned {} route(s)", instance.name, routes.len());
                    report.state.instances.insert(
                        instance.name.clone(),
                        InstanceHealth {
                            healthy: true,
                            last_success: Some(now),
                            last_error: None,
                            target_ip: Some(instance.target_ip),
                        },
                    );
                    polled.push((instance, routes));
                }
                Err(e) => {
                    warn!("Instance {} unreachable: {}", instance.name, e);
                    report.unreachable.push(instance.name.clone());
                    report.errors.push(format!("instance {}: {}", instance.name, e));
                    let last_success = previous
                        .instances
                        .get(&instance.name)
                        .and_then(|h| h.last_success);
                    report.state.instances.insert(
                        instance.name.clone(),
                        InstanceHealth {
                            healthy: false,
                            last_success,
                            last_error: Some(e.to_string()),
                            target_ip: Some(instance.target_ip),
                        },
                    );
                }
            }
        }

        let reachable: HashSet<String> = polled.iter().map(|(i, _)| i.name.clone()).collect();
        let unreachable: HashSet<String> = report.unreachable.iter().cloned().collect();

        for (instance, routes) in polled {
            let mut counts = RouteCounts {
                instance: instance.name.clone(),
                ..RouteCounts::default()
            };

            for route in routes {
                let key = normalize_domain(&route.domain);
                if key.is_empty() {
                    continue;
                }

                let zone = classifier::detect_zone(&route.zone_hint, self.default_zone);
                if zone == Zone::External {
                    debug!("Skipping {} ({}): external zone", key, route.zone_hint);
                    counts.external += 1;
                    continue;
                }
                if classifier::is_excluded(&key, &self.exclusions) {
                    debug!("Skipping {}: excluded", key);
                    counts.excluded += 1;
                    continue;
                }
                counts.internal += 1;

                if let Some(holder) = previous.owner_of(&key)
                    && unreachable.contains(holder)
                    && existing.contains_key(&key)
                    && !desired.contains_key(&key)
                {
                    debug!(
                        "Ignoring {} from {}: held by unreachable owner {}",
                        key, instance.name, holder
                    );
                    continue;
                }

                match desired.get(&key).map(|d| &d.claim) {
                    None => {
                        desired.insert(
                            key,
                            Desired {
                                ip: instance.target_ip,
                                claim: Claim::Route {
                                    owner: instance.name.clone(),
                                },
                            },
                        );
                    }
                    Some(Claim::Static) => {
                        debug!("Skipping {} from {}: static rewrite takes precedence", key, instance.name);
                    }
                    Some(Claim::Route { owner }) if *owner == instance.name => {}
                    Some(Claim::Route { owner }) => {
                        let conflict = Conflict {
                            domain: key,
                            winner: owner.clone(),
                            loser: instance.name.clone(),
                        };
                        if !report.conflicts.contains(&conflict) {
                            warn!(
                                "Conflict: {} offered by both {} and {}; keeping {}",
                                conflict.domain, conflict.winner, conflict.loser, conflict.winner
                            );
                            report.conflicts.push(conflict);
                        }
                    }
                }
            }

            info!(
                "{}: {} internal domain(s) ({} excluded, {} external)",
                counts.instance, counts.internal, counts.excluded, counts.external
            );
            report.routes.push(counts);
        }

        (desired, reachable)
    }

    /// Apply `plan` in order; one failure never stops the rest
    async fn apply(
        &self,
        plan: Vec<Planned>,
        domains: &mut BTreeMap<String, String>,
        report: &mut Reconciliation,
    ) {
        for planned in plan {
            let result = match &planned.operation {
                DnsOperation::Add { domain, ip } => {
                    self.dns.add_record(domain, &ip.to_string()).await
                }
                DnsOperation::Update {
                    domain,
                    old_answer,
                    ip,
                } => {
                    self.dns
                        .update_record(domain, old_answer, &ip.to_string())
                        .await
                }
                DnsOperation::Delete { domain, answer } => {
                    self.dns.delete_record(domain, answer).await
                }
            };

            match result {
                Ok(()) => {
                    info!("Applied: {}", planned.operation);
                    if let Some(owner) = planned.owner_on_success {
                        domains.insert(planned.key, owner);
                    }
                    report.applied.push(planned.operation);
                }
                Err(e) => {
                    error!("Failed to {}: {}", planned.operation, e);
                    if let Some(owner) = planned.owner_on_failure {
                        domains.insert(planned.key, owner);
                    }
                    report.errors.push(format!("{}: {}", planned.operation, e));
                    report.failed.push(FailedOperation {
                        operation: planned.operation,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

impl Claim {
    fn owner(&self) -> Option<String> {
        match self {
            Claim::Route { owner } => Some(owner.clone()),
            Claim::Static => None,
        }
    }
}

/// Answers the records of `owner` carry: its configured target IP and the
/// one recorded when it was last polled
fn owned_answers(owner: &str, instances: &[ProxyInstance], previous: &OwnershipState) -> Vec<IpAddr> {
    let mut answers: Vec<IpAddr> = instances
        .iter()
        .filter(|i| i.name == owner)
        .map(|i| i.target_ip)
        .collect();
    if let Some(ip) = previous.instances.get(owner).and_then(|h| h.target_ip)
        && !answers.contains(&ip)
    {
        answers.push(ip);
    }
    answers
}

/// Canonical form used for comparing domains
fn normalize_domain(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" App.Example.COM. "), "app.example.com");
        assert_eq!(normalize_domain("   "), "");
    }

    #[test]
    fn test_operation_display() {
        let op = DnsOperation::Update {
            domain: "a.example.com".to_string(),
            old_answer: "10.0.0.1".to_string(),
            ip: [10, 0, 0, 2].into(),
        };
        assert_eq!(op.to_string(), "update a.example.com 10.0.0.1 -> 10.0.0.2");
        assert_eq!(op.domain(), "a.example.com");
    }
}
