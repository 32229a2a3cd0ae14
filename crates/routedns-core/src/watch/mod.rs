//! Polling scheduler
//!
//! The WatchLoop drives one reconciliation cycle per tick:
//!
//! ```text
//!        ┌──────┐  tick   ┌────────────────┐        ┌──────────┐
//!   ────▶│ Idle │────────▶│ Running(cycle) │───────▶│ Sleeping │──┐
//!        └──────┘         └────────────────┘        └──────────┘  │
//!            ▲                                                    │
//!            └───────────────── poll interval ────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - An error or panic inside a cycle is logged and the loop continues
//! - Shutdown is only observed while sleeping; an in-flight cycle finishes
//! - Configuration changes are detected by polling file modification times;
//!   a change reloads the configuration and reconciles immediately
//! - Every `health_every` ticks a health line is logged, whatever the outcome
//!   of recent cycles

use crate::config::{SyncMode, find_config_files};
use crate::error::{Error, Result};
use crate::reconciler::{Reconciler, Reconciliation};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Ticks between two health log lines
pub const DEFAULT_HEALTH_EVERY: u64 = 10;

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between ticks, before the first tick, or stopped
    Idle,
    /// Executing a reconciliation cycle
    Running {
        /// 1-based tick number
        cycle: u64,
    },
    /// Waiting for the next tick
    Sleeping,
}

/// Events emitted by the WatchLoop for external monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A cycle finished (possibly with non-fatal errors)
    CycleCompleted {
        cycle: u64,
        applied: usize,
        failed: usize,
    },

    /// A cycle aborted with an error or panic
    CycleFailed { cycle: u64, error: String },

    /// Configuration was reloaded
    ConfigReloaded { instances: usize },

    /// Configuration changed but could not be reloaded
    ReloadFailed { error: String },

    /// Periodic health line, every `health_every` ticks
    HealthCheck { ticks: u64, cycles: u64 },

    /// Loop stopped
    Stopped { cycles: u64 },
}

/// Counters returned when the loop stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopSummary {
    /// Scheduled ticks; reload-triggered cycles are not ticks
    pub ticks: u64,
    /// Cycles run (scheduled and reload-triggered)
    pub cycles: u64,
    /// Cycles that aborted with an error or panic
    pub failed_cycles: u64,
    /// Health lines logged
    pub health_checks: u64,
}

/// What a configuration reload produces
pub struct Reloaded {
    /// Reconciler built from the new configuration
    pub reconciler: Reconciler,
    /// New delay between ticks
    pub poll_interval: Duration,
}

/// Rebuilds the reconciler after the configuration changed
///
/// Implemented for any `Fn() -> Result<Reloaded>`, which is what the daemon
/// passes in.
pub trait ConfigReloader: Send + Sync {
    /// Load the configuration again and build a new reconciler
    fn reload(&self) -> Result<Reloaded>;
}

impl<F> ConfigReloader for F
where
    F: Fn() -> Result<Reloaded> + Send + Sync,
{
    fn reload(&self) -> Result<Reloaded> {
        self()
    }
}

/// Detects changes to the configuration files behind a path
///
/// A change is a file appearing, disappearing, or getting a new modification
/// time. Latency is bounded by how often [`has_changed`](Self::has_changed)
/// is called.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    mtimes: BTreeMap<PathBuf, Option<SystemTime>>,
}

impl ConfigWatcher {
    /// Start watching `path` (a file or a directory of `*.yaml` files)
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mtimes = Self::scan(&path);
        Self { path, mtimes }
    }

    /// Path being watched
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Files currently being watched
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.mtimes.keys().map(PathBuf::as_path)
    }

    /// Rescan and report whether anything changed since the last call
    pub fn has_changed(&mut self) -> bool {
        let current = Self::scan(&self.path);
        if current == self.mtimes {
            return false;
        }

        for path in current.keys().filter(|p| !self.mtimes.contains_key(*p)) {
            info!("New config file detected: {}", path.display());
        }
        for path in self.mtimes.keys().filter(|p| !current.contains_key(*p)) {
            info!("Config file removed: {}", path.display());
        }
        for (path, mtime) in &current {
            if self.mtimes.get(path).is_some_and(|old| old != mtime) {
                info!("Config change detected in: {}", path.display());
            }
        }

        self.mtimes = current;
        true
    }

    fn scan(path: &Path) -> BTreeMap<PathBuf, Option<SystemTime>> {
        find_config_files(path)
            .into_iter()
            .map(|file| {
                let mtime = std::fs::metadata(&file).and_then(|m| m.modified()).ok();
                (file, mtime)
            })
            .collect()
    }
}

struct HotReload {
    watcher: ConfigWatcher,
    reloader: Box<dyn ConfigReloader>,
}

/// Single-task polling scheduler around a [`Reconciler`]
pub struct WatchLoop {
    reconciler: Reconciler,
    poll_interval: Duration,
    mode: SyncMode,
    health_every: u64,
    hot_reload: Option<HotReload>,
    events: Option<mpsc::Sender<WatchEvent>>,
    state: LoopState,
    summary: LoopSummary,
}

impl WatchLoop {
    /// Create a loop in watch mode
    pub fn new(reconciler: Reconciler, poll_interval: Duration) -> Self {
        Self {
            reconciler,
            poll_interval,
            mode: SyncMode::Watch,
            health_every: DEFAULT_HEALTH_EVERY,
            hot_reload: None,
            events: None,
            state: LoopState::Idle,
            summary: LoopSummary::default(),
        }
    }

    /// Set the scheduling mode
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Log a health line every `ticks` ticks (0 disables it)
    pub fn with_health_every(mut self, ticks: u64) -> Self {
        self.health_every = ticks;
        self
    }

    /// Reload through `reloader` whenever `watcher` reports a change
    pub fn with_hot_reload(
        mut self,
        watcher: ConfigWatcher,
        reloader: impl ConfigReloader + 'static,
    ) -> Self {
        self.hot_reload = Some(HotReload {
            watcher,
            reloader: Box::new(reloader),
        });
        self
    }

    /// Emit [`WatchEvent`]s on `events`
    ///
    /// Events are dropped with a warning when the channel is full.
    pub fn with_events(mut self, events: mpsc::Sender<WatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current loop state
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The reconciler currently in use
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Run until `shutdown` resolves (watch mode) or after one cycle (once mode)
    pub async fn run_until<F>(mut self, shutdown: F) -> LoopSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            self.tick().await;

            if self.mode == SyncMode::Once {
                debug!("Single-run mode: stopping after one cycle");
                break;
            }

            self.state = LoopState::Sleeping;
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = tokio::time::sleep(self.poll_interval) => {
                    self.state = LoopState::Idle;
                }
            }
        }

        self.state = LoopState::Idle;
        self.emit(WatchEvent::Stopped {
            cycles: self.summary.cycles,
        });
        info!(
            "Watch loop stopped after {} tick(s), {} cycle(s), {} failed",
            self.summary.ticks, self.summary.cycles, self.summary.failed_cycles
        );
        self.summary
    }

    /// Run one guarded cycle without scheduling
    ///
    /// A panic inside the cycle is converted into an error.
    pub async fn run_once(&mut self) -> Result<Reconciliation> {
        self.summary.cycles += 1;
        let cycle = self.summary.cycles;
        self.state = LoopState::Running { cycle };

        let outcome = AssertUnwindSafe(self.reconciler.run_cycle())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Other(panic_message(panic.as_ref()))));

        self.state = LoopState::Idle;
        match &outcome {
            Ok(report) => {
                self.emit(WatchEvent::CycleCompleted {
                    cycle,
                    applied: report.applied.len(),
                    failed: report.failed.len(),
                });
            }
            Err(e) => {
                self.summary.failed_cycles += 1;
                error!("Sync cycle {} failed: {}", cycle, e);
                self.emit(WatchEvent::CycleFailed {
                    cycle,
                    error: e.to_string(),
                });
            }
        }
        outcome
    }

    async fn tick(&mut self) {
        self.summary.ticks += 1;
        // Errors were already logged and counted; the loop carries on
        let _ = self.run_once().await;

        let ticks = self.summary.ticks;
        if self.health_every > 0 && ticks % self.health_every == 0 {
            self.summary.health_checks += 1;
            info!(
                "Health check: {} sync cycles completed ({} failed)",
                self.summary.cycles, self.summary.failed_cycles
            );
            self.emit(WatchEvent::HealthCheck {
                ticks,
                cycles: self.summary.cycles,
            });
        }

        if self.mode == SyncMode::Watch {
            self.check_config().await;
        }
    }

    async fn check_config(&mut self) {
        let Some(hot) = self.hot_reload.as_mut() else {
            return;
        };
        if !hot.watcher.has_changed() {
            return;
        }

        match hot.reloader.reload() {
            Ok(Reloaded {
                reconciler,
                poll_interval,
            }) => {
                let instances = reconciler.instances();
                info!(
                    "Reloaded {} instance(s): {}",
                    instances.len(),
                    instances
                        .iter()
                        .map(|i| i.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                self.reconciler = reconciler;
                self.poll_interval = poll_interval;
                self.emit(WatchEvent::ConfigReloaded {
                    instances: instances.len(),
                });

                info!("Triggering immediate sync after config reload");
                let _ = self.run_once().await;
            }
            Err(e) => {
                error!("Failed to reload configuration: {}", e);
                warn!("Continuing with previous configuration");
                self.emit(WatchEvent::ReloadFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: WatchEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping watch event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event receiver dropped");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("cycle panicked: {}", detail)
}
