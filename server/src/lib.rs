//! Ledgerline Server
//!
//! Worker pool, ledger service and HTTP API in front of the ledger engine.
//! Every balance-changing request flows through the dispatcher so that
//! concurrent callers are funneled into a bounded set of workers.

pub mod config;
pub mod dispatcher;
pub mod http;
pub mod metrics;
pub mod service;
pub mod state;

pub use config::{DispatcherConfig, LogFormat, ServerConfig, StoreBackend, StoreConfig};
pub use dispatcher::{CommandOutcome, Dispatcher, LedgerCommand};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use service::LedgerService;
pub use state::ServiceState;
