//! Server configuration.

use std::time::Duration;

use ledgerline_common::time::constants;

/// Which ledger store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process store; state is lost on exit.
    Memory,
    /// PostgreSQL via `DATABASE_URL`.
    Postgres,
}

impl StoreBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "postgres" | "postgresql" => Some(StoreBackend::Postgres),
            _ => None,
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend selection.
    pub backend: StoreBackend,
    /// Database URL, required for PostgreSQL.
    pub database_url: Option<String>,
    /// Connection pool size.
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 20,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Bounded queue capacity.
    pub queue_capacity: usize,
    /// How long a job may wait for a worker to start it. `None` waits forever.
    pub job_timeout: Option<Duration>,
    /// Run one balance-changing operation at a time.
    pub serialize_transfers: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 100,
            job_timeout: Some(constants::default_job_timeout()),
            serialize_transfers: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Main server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Listen port.
    pub listen_port: u16,
    /// Store configuration.
    pub store: StoreConfig,
    /// Dispatcher configuration.
    pub dispatcher: DispatcherConfig,
    /// Time allowed for in-flight HTTP requests after a shutdown signal.
    pub shutdown_grace: Duration,
    /// Serve `/metrics`.
    pub metrics_enabled: bool,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            store: StoreConfig::default(),
            dispatcher: DispatcherConfig::default(),
            shutdown_grace: constants::shutdown_grace(),
            metrics_enabled: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(addr) = lookup("LEDGER_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(port) = lookup("LEDGER_LISTEN_PORT").and_then(|p| p.parse().ok()) {
            config.listen_port = port;
        }

        if let Some(backend) = lookup("LEDGER_STORE").and_then(|s| StoreBackend::parse(&s)) {
            config.store.backend = backend;
        }

        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.is_empty()) {
            config.store.database_url = Some(url);
        }

        if let Some(max) = lookup("DATABASE_MAX_CONNECTIONS").and_then(|m| m.parse().ok()) {
            config.store.max_connections = max;
        }

        if let Some(workers) = parsed("LEDGER_WORKERS") {
            config.dispatcher.workers = workers as usize;
        }

        if let Some(capacity) = parsed("LEDGER_QUEUE_CAPACITY") {
            config.dispatcher.queue_capacity = capacity as usize;
        }

        if let Some(ms) = parsed("LEDGER_JOB_TIMEOUT_MS") {
            config.dispatcher.job_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(serialize) = lookup("LEDGER_SERIALIZE_TRANSFERS").and_then(|v| parse_bool(&v)) {
            config.dispatcher.serialize_transfers = serialize;
        }

        if let Some(secs) = parsed("LEDGER_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = Duration::from_secs(secs);
        }

        if let Some(enabled) = lookup("LEDGER_METRICS_ENABLED").and_then(|v| parse_bool(&v)) {
            config.metrics_enabled = enabled;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("LEDGER_LOG_FORMAT") {
            if format.eq_ignore_ascii_case("pretty") {
                config.log_format = LogFormat::Pretty;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_port == 0 {
            return Err("Listen port cannot be 0".to_string());
        }

        if self.dispatcher.workers == 0 {
            return Err("Worker count cannot be 0".to_string());
        }

        if self.dispatcher.queue_capacity == 0 {
            return Err("Queue capacity cannot be 0".to_string());
        }

        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            return Err("DATABASE_URL is required for the postgres store".to_string());
        }

        Ok(())
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
