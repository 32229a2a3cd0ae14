//! Configuration types for the routedns system
//!
//! A [`SyncConfig`] is built once at startup (and again on every hot reload)
//! from YAML files plus environment overrides, validated, and then handed to
//! the reconciler and watch loop by reference. Nothing mutates it afterwards.
//!
//! ## Sources, in order of precedence
//!
//! 1. Environment variables (`SYNC_MODE`, `POLL_INTERVAL_SECONDS`, ...)
//! 2. YAML at `CONFIG_PATH`: a single file, or a directory whose `*.yaml`
//!    files are merged in sorted order
//! 3. Legacy single-instance variables (`TRAEFIK_URL`, `ADGUARD_URL`, ...),
//!    only consulted when YAML defines no sources / providers
//! 4. Built-in defaults

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::classifier::Zone;
use crate::traits::ProxyInstance;

/// Default location of the configuration file or directory
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

/// Default location of the ownership state file
pub const DEFAULT_STATE_PATH: &str = "/data/state.json";

/// Smallest accepted poll interval, in seconds
pub const MIN_POLL_INTERVAL_SECS: u64 = 5;

/// Largest accepted poll interval, in seconds
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

/// Accepted `log_level` values
pub const SUPPORTED_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error"];

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_DNS_PROVIDER: &str = "adguard";
const DEFAULT_PROXY_PROVIDER: &str = "traefik";

/// How the daemon schedules reconciliation cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Reconcile every poll interval until shut down
    #[default]
    Watch,
    /// Reconcile exactly once and exit
    Once,
}

impl std::str::FromStr for SyncMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watch" => Ok(SyncMode::Watch),
            "once" => Ok(SyncMode::Once),
            other => Err(crate::Error::config(format!(
                "Invalid sync mode '{}'. Supported modes: watch, once",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Watch => f.write_str("watch"),
            SyncMode::Once => f.write_str("once"),
        }
    }
}

/// DNS provider entry (`providers:` in YAML)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsProviderConfig {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Implementation discriminator, looked up in the provider registry
    #[serde(default = "default_dns_provider")]
    pub provider: String,

    /// Base URL of the provider API
    #[serde(default)]
    pub url: String,

    /// Basic-auth user name (empty for none)
    #[serde(default)]
    pub username: String,

    /// Basic-auth password
    /// ⚠️ NEVER log this value
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for DnsProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsProviderConfig")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl DnsProviderConfig {
    /// Create an entry for `provider` at `url` without credentials
    pub fn new(provider: impl Into<String>, url: impl Into<String>) -> Self {
        let provider = provider.into();
        Self {
            name: provider.clone(),
            provider,
            url: url.into(),
            username: String::new(),
            password: String::new(),
        }
    }

    /// Set basic-auth credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

fn default_dns_provider() -> String {
    DEFAULT_DNS_PROVIDER.to_string()
}

/// Proxy instance entry (`sources:` in YAML)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique instance name
    #[serde(default = "default_proxy_provider")]
    pub name: String,

    /// Proxy implementation discriminator
    #[serde(rename = "type", default = "default_proxy_provider")]
    pub kind: String,

    /// Base URL of the proxy API
    #[serde(default)]
    pub url: String,

    /// IP address records for this instance point to
    #[serde(default, alias = "internal_ip")]
    pub target_ip: String,

    /// Verify the API's TLS certificate
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Basic-auth user name (empty for none)
    #[serde(default)]
    pub username: String,

    /// Basic-auth password
    #[serde(default)]
    pub password: String,

    /// Shell-glob on router names (empty for all)
    #[serde(default)]
    pub router_filter: String,

    /// Required middleware name (empty for none)
    #[serde(default)]
    pub middleware_filter: String,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("target_ip", &self.target_ip)
            .field("verify_tls", &self.verify_tls)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("router_filter", &self.router_filter)
            .field("middleware_filter", &self.middleware_filter)
            .finish()
    }
}

impl SourceConfig {
    /// Convert into a [`ProxyInstance`], parsing `target_ip`
    pub fn to_instance(&self) -> Result<ProxyInstance, crate::Error> {
        let target_ip: IpAddr = self.target_ip.trim().parse().map_err(|_| {
            crate::Error::config(format!(
                "Source '{}' has invalid target_ip '{}'. Expected an IPv4 or IPv6 address",
                self.name, self.target_ip
            ))
        })?;

        let mut instance = ProxyInstance::new(self.name.trim(), self.url.trim(), target_ip)
            .with_verify_tls(self.verify_tls);
        if !self.username.trim().is_empty() {
            instance = instance.with_auth(self.username.trim(), self.password.trim());
        }
        instance.route_filter = non_empty(&self.router_filter);
        instance.middleware_filter = non_empty(&self.middleware_filter);
        Ok(instance)
    }
}

fn default_proxy_provider() -> String {
    DEFAULT_PROXY_PROVIDER.to_string()
}

fn default_verify_tls() -> bool {
    true
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `settings:` section as written in YAML; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingsSection {
    /// `watch` or `once`
    pub sync_mode: Option<String>,
    /// Seconds between cycles
    pub poll_interval: Option<u64>,
    /// Log verbosity
    pub log_level: Option<String>,
    /// Zone for routes without a zone suffix
    pub default_zone: Option<String>,
    /// Ownership state file
    pub state_path: Option<String>,
}

impl SettingsSection {
    fn merge(&mut self, other: SettingsSection) {
        if other.sync_mode.is_some() {
            self.sync_mode = other.sync_mode;
        }
        if other.poll_interval.is_some() {
            self.poll_interval = other.poll_interval;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        if other.default_zone.is_some() {
            self.default_zone = other.default_zone;
        }
        if other.state_path.is_some() {
            self.state_path = other.state_path;
        }
    }
}

/// One YAML configuration document, before overrides and validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// DNS providers; only the first is used
    pub providers: Vec<DnsProviderConfig>,
    /// Proxy instances, in configuration order
    pub sources: Vec<SourceConfig>,
    /// Runtime settings
    pub settings: SettingsSection,
    /// Exclusion patterns
    pub exclude_domains: Vec<String>,
    /// Domain -> IP (empty or null for "first instance's target IP")
    pub static_rewrites: BTreeMap<String, Option<String>>,
}

impl ConfigFile {
    /// Parse a YAML document; an empty document yields the defaults
    pub fn from_yaml(content: &str) -> Result<Self, crate::Error> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Read and parse a YAML file
    pub fn from_path(path: &Path) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content).map_err(|e| {
            crate::Error::config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Fold a later document into this one
    ///
    /// Lists accumulate; settings and static rewrites are overridden key by key.
    pub fn merge(&mut self, other: ConfigFile) {
        self.providers.extend(other.providers);
        self.sources.extend(other.sources);
        self.settings.merge(other.settings);
        for pattern in other.exclude_domains {
            if !self.exclude_domains.contains(&pattern) {
                self.exclude_domains.push(pattern);
            }
        }
        self.static_rewrites.extend(other.static_rewrites);
    }
}

/// List the configuration files behind `config_path`
///
/// A file is returned as-is. For a directory, its `*.yaml` files are returned
/// in sorted order; `*.template` files are ignored. A missing path yields an
/// empty list so that environment-only deployments work.
pub fn find_config_files(config_path: &Path) -> Vec<PathBuf> {
    if config_path.is_file() {
        return vec![config_path.to_path_buf()];
    }

    let Ok(entries) = std::fs::read_dir(config_path) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".yaml") && !n.ends_with(".template"))
        })
        .collect();
    files.sort();
    files
}

/// Runtime settings after defaults, overrides and validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Scheduling mode
    pub sync_mode: SyncMode,
    /// Delay between cycles
    pub poll_interval: Duration,
    /// Log verbosity (lowercase)
    pub log_level: String,
    /// Zone for routes without a zone suffix
    pub default_zone: Zone,
    /// Ownership state file
    pub state_path: PathBuf,
    /// Configuration file or directory the settings were read from
    pub config_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Watch,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            log_level: "info".to_string(),
            default_zone: Zone::Internal,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}

/// An operator-declared record, always desired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRewrite {
    /// Domain name
    pub domain: String,
    /// Answer the record must carry
    pub ip: IpAddr,
}

impl StaticRewrite {
    /// Create a static rewrite
    pub fn new(domain: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            domain: domain.into(),
            ip,
        }
    }
}

/// Complete, validated configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// DNS provider to write records to
    pub dns_provider: DnsProviderConfig,
    /// Proxy implementation discriminator shared by all instances
    pub proxy_provider: String,
    /// Proxy instances, in configuration order
    pub instances: Vec<ProxyInstance>,
    /// Runtime settings
    pub settings: Settings,
    /// Raw exclusion patterns (compiled by the reconciler)
    pub exclude_domains: Vec<String>,
    /// Static rewrites, sorted by domain
    pub static_rewrites: Vec<StaticRewrite>,
}

impl SyncConfig {
    /// Load configuration from `config_path` and the process environment
    pub fn load(config_path: &Path) -> Result<Self, crate::Error> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Load configuration from `config_path`, reading variables through `env`
    pub fn load_with_env<F>(config_path: &Path, env: F) -> Result<Self, crate::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = ConfigFile::default();
        for path in find_config_files(config_path) {
            tracing::debug!("Loading configuration from {}", path.display());
            merged.merge(ConfigFile::from_path(&path)?);
        }
        Self::resolve(merged, config_path, env)
    }

    /// Apply environment overrides and defaults to parsed YAML, then validate
    pub fn resolve<F>(mut file: ConfigFile, config_path: &Path, env: F) -> Result<Self, crate::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty variables count as unset
        let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Legacy single-instance fallbacks
        if file.sources.is_empty()
            && let Some(url) = var("TRAEFIK_URL")
        {
            file.sources.push(SourceConfig {
                name: DEFAULT_PROXY_PROVIDER.to_string(),
                kind: DEFAULT_PROXY_PROVIDER.to_string(),
                url,
                target_ip: var("TRAEFIK_TARGET_IP").unwrap_or_default(),
                verify_tls: true,
                username: String::new(),
                password: String::new(),
                router_filter: String::new(),
                middleware_filter: String::new(),
            });
        }
        if file.providers.is_empty()
            && let Some(url) = var("ADGUARD_URL")
        {
            file.providers.push(
                DnsProviderConfig::new(DEFAULT_DNS_PROVIDER, url).with_credentials(
                    var("ADGUARD_USERNAME").unwrap_or_default(),
                    var("ADGUARD_PASSWORD").unwrap_or_default(),
                ),
            );
        }

        // DNS provider
        if file.providers.len() > 1 {
            warn!(
                "{} DNS providers configured; using the first ('{}')",
                file.providers.len(),
                file.providers[0].name
            );
        }
        let mut dns_provider = file.providers.into_iter().next().ok_or_else(|| {
            crate::Error::config(
                "No DNS provider configured. Add a 'providers' entry to the configuration \
                 or set ADGUARD_URL",
            )
        })?;
        if let Some(provider) = var("DNS_PROVIDER") {
            dns_provider.provider = provider;
        }
        dns_provider.provider = dns_provider.provider.trim().to_ascii_lowercase();
        if dns_provider.name.trim().is_empty() {
            dns_provider.name = dns_provider.provider.clone();
        }

        // Proxy instances
        let proxy_provider = var("PROXY_PROVIDER")
            .or_else(|| file.sources.first().map(|s| s.kind.clone()))
            .unwrap_or_else(default_proxy_provider)
            .trim()
            .to_ascii_lowercase();
        for source in &file.sources {
            if !source.kind.trim().eq_ignore_ascii_case(&proxy_provider) {
                return Err(crate::Error::config(format!(
                    "Source '{}' has type '{}' but the proxy provider is '{}'. \
                     All sources must use the same type",
                    source.name, source.kind, proxy_provider
                )));
            }
        }
        let instances = file
            .sources
            .iter()
            .map(SourceConfig::to_instance)
            .collect::<Result<Vec<_>, _>>()?;

        // Settings
        let section = file.settings;
        let mut settings = Settings {
            config_path: config_path.to_path_buf(),
            ..Settings::default()
        };
        if let Some(mode) = var("SYNC_MODE").or(section.sync_mode) {
            settings.sync_mode = mode.parse()?;
        }
        if let Some(raw) = var("POLL_INTERVAL_SECONDS") {
            let secs: u64 = raw.parse().map_err(|_| {
                crate::Error::config(format!(
                    "POLL_INTERVAL_SECONDS '{}' is not a whole number of seconds",
                    raw
                ))
            })?;
            settings.poll_interval = Duration::from_secs(secs);
        } else if let Some(secs) = section.poll_interval {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(level) = var("LOG_LEVEL").or(section.log_level) {
            settings.log_level = level.trim().to_ascii_lowercase();
        }
        if let Some(zone) = var("EXTERNAL_DNS_DEFAULT_ZONE").or(section.default_zone) {
            settings.default_zone = zone.parse()?;
        }
        if let Some(path) = var("STATE_PATH").or(section.state_path) {
            settings.state_path = PathBuf::from(path);
        }

        // Exclusions: environment entries are appended
        let mut exclude_domains: Vec<String> = file
            .exclude_domains
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if let Some(raw) = var("EXTERNAL_DNS_EXCLUDE_DOMAINS") {
            for pattern in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                if !exclude_domains.iter().any(|p| p == pattern) {
                    exclude_domains.push(pattern.to_string());
                }
            }
        }

        // Static rewrites: environment entries override YAML ones
        let mut raw_rewrites: BTreeMap<String, String> = file
            .static_rewrites
            .into_iter()
            .map(|(domain, ip)| (domain.trim().to_string(), ip.unwrap_or_default()))
            .filter(|(domain, _)| !domain.is_empty())
            .collect();
        if let Some(raw) = var("EXTERNAL_DNS_STATIC_REWRITES") {
            for item in raw.split(',').map(str::trim).filter(|i| !i.is_empty()) {
                let (domain, ip) = item.split_once('=').unwrap_or((item, ""));
                let domain = domain.trim();
                if !domain.is_empty() {
                    raw_rewrites.insert(domain.to_string(), ip.trim().to_string());
                }
            }
        }
        let static_rewrites = resolve_static_rewrites(raw_rewrites, instances.first())?;

        let config = Self {
            dns_provider,
            proxy_provider,
            instances,
            settings,
            exclude_domains,
            static_rewrites,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Every message names the offending value and, where there is a fixed
    /// set, the supported alternatives.
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_url("DNS provider", &self.dns_provider.name, &self.dns_provider.url)?;

        if self.instances.is_empty() {
            return Err(crate::Error::config(
                "No proxy instances configured. Add a 'sources' entry to the configuration \
                 or set TRAEFIK_URL and TRAEFIK_TARGET_IP",
            ));
        }

        let mut seen = HashSet::new();
        for instance in &self.instances {
            if instance.name.is_empty() {
                return Err(crate::Error::config("Source name cannot be empty"));
            }
            if !seen.insert(instance.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate source name '{}'. Source names must be unique",
                    instance.name
                )));
            }
            validate_url("Source", &instance.name, &instance.url)?;
        }

        let secs = self.settings.poll_interval.as_secs();
        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&secs) {
            return Err(crate::Error::config(format!(
                "poll_interval {}s is out of range. Supported range: {}..={} seconds",
                secs, MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS
            )));
        }

        if !SUPPORTED_LOG_LEVELS.contains(&self.settings.log_level.as_str()) {
            return Err(crate::Error::config(format!(
                "Invalid log level '{}'. Supported levels: {}",
                self.settings.log_level,
                SUPPORTED_LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

fn validate_url(what: &str, name: &str, url: &str) -> Result<(), crate::Error> {
    if url.is_empty() {
        return Err(crate::Error::config(format!("{} '{}' has no url", what, name)));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(crate::Error::config(format!(
            "{} '{}' has unsupported url '{}'. Supported schemes: http, https",
            what, name, url
        )));
    }
    Ok(())
}

fn resolve_static_rewrites(
    raw: BTreeMap<String, String>,
    first_instance: Option<&ProxyInstance>,
) -> Result<Vec<StaticRewrite>, crate::Error> {
    let mut rewrites = Vec::with_capacity(raw.len());
    for (domain, ip) in raw {
        let ip = ip.trim();
        let ip = if ip.is_empty() {
            match first_instance {
                Some(instance) => instance.target_ip,
                None => {
                    warn!(
                        "Static rewrite '{}' has no IP and no source to default to; skipping",
                        domain
                    );
                    continue;
                }
            }
        } else {
            ip.parse().map_err(|_| {
                crate::Error::config(format!(
                    "Static rewrite '{}' has invalid IP '{}'. Expected an IPv4 or IPv6 address",
                    domain, ip
                ))
            })?
        };
        rewrites.push(StaticRewrite::new(domain, ip));
    }
    Ok(rewrites)
}
