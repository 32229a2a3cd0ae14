// # State Store Trait
//
// Defines the interface for persistent ownership state.
//
// ## Purpose
//
// The state store remembers, across cycles and restarts:
// - Which proxy instance owns each domain the reconciler created
// - Whether each instance was healthy on its last poll, and the answer
//   its records carried
//
// Ownership is what makes deletion safe: a record is only ever deleted when
// its owner answered and no longer offers the domain.
//
// ## Implementations
//
// - File-based: JSON file with write-then-rename
// - In-memory: tests and single-run experiments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Current state file format version
pub const STATE_VERSION: u32 = 1;

/// Last observed health of a proxy instance
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceHealth {
    /// Whether the last poll succeeded
    pub healthy: bool,
    /// Time of the most recent successful poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// Error from the most recent failed poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Answer the instance's records carried when last polled
    ///
    /// Lets records of an instance that was since removed from the
    /// configuration be told apart from records created by other tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ip: Option<IpAddr>,
}

/// Persisted ownership and health bookkeeping
///
/// `domains` maps each managed domain to exactly one owning instance name.
/// The map type makes "at most one owner per domain" structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipState {
    /// State format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Domain -> owning instance name
    #[serde(default)]
    pub domains: BTreeMap<String, String>,
    /// Instance name -> last observed health
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceHealth>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for OwnershipState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            domains: BTreeMap::new(),
            instances: BTreeMap::new(),
        }
    }
}

impl OwnershipState {
    /// Owner of `domain`, if the reconciler manages it
    pub fn owner_of(&self, domain: &str) -> Option<&str> {
        self.domains.get(domain).map(String::as_str)
    }

    /// Whether `instance` was healthy on its last poll
    pub fn is_healthy(&self, instance: &str) -> bool {
        self.instances.get(instance).is_some_and(|h| h.healthy)
    }

    /// Domains currently owned by `instance`, sorted
    pub fn domains_owned_by<'a>(&'a self, instance: &'a str) -> impl Iterator<Item = &'a str> {
        self.domains
            .iter()
            .filter(move |(_, owner)| owner.as_str() == instance)
            .map(|(domain, _)| domain.as_str())
    }
}

/// Trait for state store implementations
///
/// # Failure Semantics
///
/// `load` never fails: a missing, empty or unparseable state is logged and
/// replaced by [`OwnershipState::default`], and the reconciler re-learns
/// ownership on the next cycle. `save` reports failures so the caller can
/// log them; it must never leave a partially written state behind.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted state, or the empty default
    async fn load(&self) -> OwnershipState;

    /// Persist `state`, replacing what was stored before
    async fn save(&self, state: &OwnershipState) -> Result<(), crate::Error>;
}
