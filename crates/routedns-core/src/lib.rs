// # routedns-core
//
// Core library for keeping DNS records in step with reverse-proxy routes.
//
// ## Architecture Overview
//
// - **ProxyProvider**: Trait for discovering routes on reverse-proxy instances
// - **DnsProvider**: Trait for reading and writing records in a DNS backend
// - **StateStore**: Trait for persistent ownership state (safe deletion)
// - **Reconciler**: Computes and applies the add/update/delete set per cycle
// - **WatchLoop**: Polling scheduler with hot reload and panic isolation
// - **ProviderRegistry**: Plugin-based registry for provider implementations
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from implementations
// 2. **Ownership-Aware**: Only records this system created are ever deleted
// 3. **Plugin-Based**: Providers are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Never Crash on Recoverable Errors**: Cycle failures are logged, not fatal

pub mod classifier;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod state;
pub mod traits;
pub mod watch;

// Re-export core types for convenience
pub use classifier::{ExclusionPattern, Zone};
pub use config::{DnsProviderConfig, StaticRewrite, SyncConfig, SyncMode};
pub use error::{Error, ErrorKind, Result};
pub use reconciler::{DnsOperation, Reconciler, Reconciliation, RouteCounts};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{DnsProvider, ProxyProvider, StateStore};
pub use watch::{ConfigWatcher, WatchLoop};
