// # routednsd - route-to-DNS sync daemon
//
// Thin integration layer: all reconciliation logic lives in routedns-core.
//
// The daemon is responsible for:
// 1. Loading configuration (YAML at `CONFIG_PATH` plus environment overrides)
// 2. Initializing logging and the runtime
// 3. Registering providers and building the reconciler
// 4. Running the watch loop until SIGTERM/SIGINT (or once, in `once` mode)
//
// ## Configuration
//
// - `CONFIG_PATH`: YAML file or directory of `*.yaml` files (default `/config/config.yaml`)
// - `SYNC_MODE`: `watch` (default) or `once`
// - `POLL_INTERVAL_SECONDS`: seconds between cycles (5..=86400)
// - `LOG_LEVEL`: trace, debug, info, warn/warning, error
// - `STATE_PATH`: ownership state file (default `/data/state.json`)
// - `EXTERNAL_DNS_DEFAULT_ZONE`, `EXTERNAL_DNS_EXCLUDE_DOMAINS`,
//   `EXTERNAL_DNS_STATIC_REWRITES`, `DNS_PROVIDER`, `PROXY_PROVIDER`
// - Legacy single instance: `TRAEFIK_URL`, `TRAEFIK_TARGET_IP`,
//   `ADGUARD_URL`, `ADGUARD_USERNAME`, `ADGUARD_PASSWORD`
//
// ## Example
//
// ```bash
// export ADGUARD_URL=http://adguard:3000
// export TRAEFIK_URL=http://traefik:8080
// export TRAEFIK_TARGET_IP=10.0.0.2
// export SYNC_MODE=once
//
// routednsd
// ```

use anyhow::{Context, Result};
use routedns_core::config::DEFAULT_CONFIG_PATH;
use routedns_core::watch::Reloaded;
use routedns_core::{
    ConfigWatcher, FileStateStore, ProviderRegistry, Reconciler, RetryPolicy, SyncConfig,
    SyncMode, WatchLoop,
};
use std::env;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown, or a completed single run
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoutednsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<RoutednsExitCode> for ExitCode {
    fn from(code: RoutednsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn parse_log_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn main() -> ExitCode {
    let config_path = env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    // Load and validate configuration
    let config = match SyncConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return RoutednsExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_log_level(&config.settings.log_level))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RoutednsExitCode::ConfigError.into();
    }

    info!("Starting routednsd daemon");

    // Collaborator calls are awaited one at a time, a single thread is enough
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RoutednsExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config, config_path)).into()
}

/// Register every compiled-in provider
fn build_registry() -> ProviderRegistry {
    let registry = ProviderRegistry::new();

    #[cfg(feature = "adguard")]
    routedns_provider_adguard::register(&registry);

    #[cfg(feature = "traefik")]
    routedns_proxy_traefik::register(&registry);

    registry
}

/// Create providers and state store for `config` and wire them into a reconciler
fn build_reconciler(
    registry: &ProviderRegistry,
    config: &SyncConfig,
) -> routedns_core::Result<Reconciler> {
    let retry = RetryPolicy::default();
    let dns = registry.create_dns_provider(&config.dns_provider, &retry)?;
    let proxy =
        registry.create_proxy_provider(&config.proxy_provider, config.instances.clone(), &retry)?;
    let store = FileStateStore::new(&config.settings.state_path);

    Ok(Reconciler::from_config(config, dns, proxy, Box::new(store)))
}

fn log_config_summary(config: &SyncConfig) {
    let settings = &config.settings;
    info!(
        "DNS provider: {} ({}) at {}",
        config.dns_provider.name, config.dns_provider.provider, config.dns_provider.url
    );
    info!(
        "Proxy provider: {} with {} instance(s)",
        config.proxy_provider,
        config.instances.len()
    );
    for instance in &config.instances {
        info!(
            "  - {}: {} -> {}{}",
            instance.name,
            instance.url,
            instance.target_ip,
            if instance.verify_tls { "" } else { " (TLS verification off)" }
        );
    }
    info!(
        "Mode: {}, poll interval: {}s, default zone: {}",
        settings.sync_mode,
        settings.poll_interval.as_secs(),
        settings.default_zone
    );
    info!(
        "{} exclusion pattern(s), {} static rewrite(s), state at {}",
        config.exclude_domains.len(),
        config.static_rewrites.len(),
        settings.state_path.display()
    );
}

/// Run the daemon
async fn run_daemon(config: SyncConfig, config_path: PathBuf) -> RoutednsExitCode {
    let registry = Arc::new(build_registry());

    let reconciler = match startup(&registry, &config).await {
        Ok(reconciler) => reconciler,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return RoutednsExitCode::ConfigError;
        }
    };

    let shutdown = match shutdown_signal() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            error!("{:#}", e);
            return RoutednsExitCode::RuntimeError;
        }
    };

    let mode = config.settings.sync_mode;
    let watch = WatchLoop::new(reconciler, config.settings.poll_interval)
        .with_mode(mode)
        .with_hot_reload(
            ConfigWatcher::new(&config_path),
            reloader(Arc::clone(&registry), config_path),
        );

    let summary = watch.run_until(shutdown).await;

    if mode == SyncMode::Once && summary.failed_cycles > 0 {
        error!("Single run failed");
        return RoutednsExitCode::RuntimeError;
    }

    info!("Shutting down daemon");
    RoutednsExitCode::CleanShutdown
}

/// Build the reconciler and check the DNS provider before entering the loop
async fn startup(registry: &ProviderRegistry, config: &SyncConfig) -> Result<Reconciler> {
    let reconciler =
        build_reconciler(registry, config).context("Failed to create providers")?;

    log_config_summary(config);

    if !reconciler.test_connection().await {
        anyhow::bail!(
            "Cannot reach DNS provider '{}' at {}",
            config.dns_provider.name,
            config.dns_provider.url
        );
    }

    Ok(reconciler)
}

/// Rebuild everything from the configuration on disk
///
/// Log level and sync mode are fixed for the life of the process.
fn reloader(
    registry: Arc<ProviderRegistry>,
    config_path: PathBuf,
) -> impl Fn() -> routedns_core::Result<Reloaded> + Send + Sync + 'static {
    move || {
        let config = load_for_reload(&config_path)?;
        let reconciler = build_reconciler(&registry, &config)?;
        log_config_summary(&config);
        Ok(Reloaded {
            reconciler,
            poll_interval: config.settings.poll_interval,
        })
    }
}

fn load_for_reload(config_path: &Path) -> routedns_core::Result<SyncConfig> {
    let config = SyncConfig::load(config_path)?;
    if config.settings.sync_mode != SyncMode::Watch {
        warn!("sync_mode changes take effect on restart");
    }
    Ok(config)
}

/// Resolve on the first SIGTERM or SIGINT
///
/// Handlers are installed immediately, so a signal that arrives during a
/// cycle is still observed once the cycle finishes.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!("Received shutdown signal: {}", name);
    })
}

/// Resolve on CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal: SIGINT"),
            Err(e) => {
                error!("Failed to wait for CTRL-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_map_to_tracing() {
        assert_eq!(parse_log_level("TRACE"), Level::TRACE);
        assert_eq!(parse_log_level("warning"), Level::WARN);
        assert_eq!(parse_log_level("warn"), Level::WARN);
        assert_eq!(parse_log_level("error"), Level::ERROR);
        assert_eq!(parse_log_level("info"), Level::INFO);
    }

    #[test]
    fn exit_codes_follow_systemd_conventions() {
        assert_eq!(RoutednsExitCode::CleanShutdown as u8, 0);
        assert_eq!(RoutednsExitCode::ConfigError as u8, 1);
        assert_eq!(RoutednsExitCode::RuntimeError as u8, 2);
    }

    #[test]
    fn registry_contains_default_providers() {
        let registry = build_registry();
        assert!(registry.has_dns_provider("adguard"));
        assert!(registry.has_proxy_provider("traefik"));
    }

    #[test]
    fn reconciler_builds_from_config() {
        let config = SyncConfig {
            dns_provider: routedns_core::DnsProviderConfig::new("adguard", "http://adguard:3000"),
            proxy_provider: "traefik".to_string(),
            instances: vec![routedns_core::traits::ProxyInstance::new(
                "core",
                "http://traefik:8080",
                [10, 0, 0, 2].into(),
            )],
            settings: Default::default(),
            exclude_domains: Vec::new(),
            static_rewrites: Vec::new(),
        };

        let reconciler = build_reconciler(&build_registry(), &config).unwrap();
        assert_eq!(reconciler.dns_provider_name(), "adguard");
        assert_eq!(reconciler.proxy_provider_name(), "traefik");

        let mut unknown = config.clone();
        unknown.proxy_provider = "caddy".to_string();
        let err = build_reconciler(&build_registry(), &unknown).err().unwrap();
        assert!(err.to_string().contains("Supported: traefik"));
    }
}
