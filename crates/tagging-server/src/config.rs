//! Server Configuration
//!
//! Deployment settings for the tagging server with environment variable
//! overrides. Store limits and worker sizing live in
//! [`tagging_core::TaggingConfig`] and are loaded alongside.

use std::str::FromStr;
use std::time::Duration;

use tagging_core::TaggingConfig;
use tracing::warn;

/// Which backing store the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BackendKind {
    /// etcd cluster
    #[default]
    Etcd,
    /// Process-local maps, lost on restart
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "etcd" => Ok(Self::Etcd),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address (env: BIND_ADDR)
    pub bind_addr: String,

    /// Backing store (env: TAG_BACKEND)
    pub backend: BackendKind,

    // Etcd settings
    /// Etcd endpoints (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,

    /// Key prefix for membership and presence rows (env: ETCD_KEY_PREFIX)
    pub etcd_key_prefix: String,

    /// Key prefix of the legacy single-row tags (env: ETCD_LEGACY_PREFIX)
    pub etcd_legacy_prefix: String,

    /// Operations per etcd transaction (env: ETCD_MAX_TXN_OPS)
    pub etcd_max_txn_ops: usize,

    /// Initial interval for etcd connection retry
    pub etcd_backoff_initial: Duration,

    /// Maximum interval for etcd connection retry
    pub etcd_backoff_max: Duration,

    /// Maximum elapsed time for etcd connection retries
    pub etcd_backoff_max_elapsed: Duration,

    /// Multiplier for etcd backoff
    pub etcd_backoff_multiplier: f64,

    // Registry settings
    /// Base URL of the group registry (env: REGISTRY_URL)
    pub registry_url: String,

    /// Per-request timeout (env: REGISTRY_TIMEOUT_SECS)
    pub registry_timeout: Duration,

    /// Total retry budget for one registry call (env: REGISTRY_MAX_RETRY_SECS)
    pub registry_max_retry: Duration,

    /// Value of the `Xttl` header on registry writes (env: REGISTRY_TTL_SECS)
    pub registry_ttl_secs: u64,

    /// Store limits and worker sizing
    pub tagging: TaggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            backend: BackendKind::Etcd,

            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            etcd_key_prefix: "/tagging".to_string(),
            etcd_legacy_prefix: "/tagging/legacy".to_string(),
            etcd_max_txn_ops: 128,
            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),
            etcd_backoff_multiplier: 2.0,

            registry_url: "http://127.0.0.1:8090".to_string(),
            registry_timeout: Duration::from_secs(10),
            registry_max_retry: Duration::from_secs(30),
            registry_ttl_secs: 2_592_000,

            tagging: TaggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(bind_addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = bind_addr;
        }

        if let Some(backend) = parsed_env::<BackendKind>("TAG_BACKEND") {
            config.backend = backend;
        }

        if let Ok(endpoints) = std::env::var("ETCD_ENDPOINTS") {
            config.etcd_endpoints = endpoints.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(prefix) = std::env::var("ETCD_KEY_PREFIX") {
            config.etcd_key_prefix = prefix.trim_end_matches('/').to_string();
        }

        if let Ok(prefix) = std::env::var("ETCD_LEGACY_PREFIX") {
            config.etcd_legacy_prefix = prefix.trim_end_matches('/').to_string();
        }

        if let Some(ops) = parsed_env::<usize>("ETCD_MAX_TXN_OPS") {
            config.etcd_max_txn_ops = ops.max(2);
        }

        if let Ok(url) = std::env::var("REGISTRY_URL") {
            config.registry_url = url.trim_end_matches('/').to_string();
        }

        if let Some(secs) = parsed_env::<u64>("REGISTRY_TIMEOUT_SECS") {
            config.registry_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parsed_env::<u64>("REGISTRY_MAX_RETRY_SECS") {
            config.registry_max_retry = Duration::from_secs(secs);
        }

        if let Some(secs) = parsed_env::<u64>("REGISTRY_TTL_SECS") {
            config.registry_ttl_secs = secs;
        }

        config.tagging = TaggingConfig::from_env();
        config
    }
}

fn parsed_env<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(var = name, value = %raw, error = %e, "Ignoring invalid environment value");
            None
        }
    }
}
