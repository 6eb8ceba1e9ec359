//! Configuration for keystone-daemon

use keystone_resolver::ResolverConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// REST server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Message bus connection
    #[serde(default)]
    pub bus: BusConfig,

    /// Resolver subjects
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Reconciliation workers and timing
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// System entity bootstrap
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Message bus configuration. Without a URL the in-process bus is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// NATS server URL
    #[serde(default)]
    pub url: Option<String>,

    /// Credentials file for the resolver's own connection
    #[serde(default)]
    pub creds_file: Option<PathBuf>,

    /// Delay between reconnect attempts
    #[serde(default = "default_reconnect_wait")]
    pub reconnect_wait_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: None,
            creds_file: None,
            reconnect_wait_secs: default_reconnect_wait(),
        }
    }
}

impl BusConfig {
    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_secs(self.reconnect_wait_secs)
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Number of concurrent reconciliation workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Re-check interval while an issuer has not published its key
    #[serde(default = "default_dependency_retry")]
    pub dependency_retry_secs: u64,

    /// Requeue delay after a transient failure
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Full resync period
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            dependency_retry_secs: default_dependency_retry(),
            error_backoff_secs: default_error_backoff(),
            resync_interval_secs: default_resync_interval(),
        }
    }
}

impl ReconcilerConfig {
    pub fn dependency_retry(&self) -> Duration {
        Duration::from_secs(self.dependency_retry_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }
}

/// System entity bootstrap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Declare `<root>-system` and `<root>-jwt` for every converged root
    #[serde(default = "default_true")]
    pub system_entities: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            system_entities: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8090))
}

fn default_reconnect_wait() -> u64 {
    2
}

fn default_workers() -> usize {
    4
}

fn default_dependency_retry() -> u64 {
    5
}

fn default_error_backoff() -> u64 {
    10
}

fn default_resync_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `KEYSTONE_*` environment variables (`__` separates sections, e.g.
    /// `KEYSTONE_RECONCILER__WORKERS=8`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("KEYSTONE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8090);
        assert!(config.bus.url.is_none());
        assert!(config.bootstrap.system_entities);
        assert_eq!(
            config.resolver.lookup_subject,
            "$SYS.REQ.ACCOUNT.*.CLAIMS.LOOKUP"
        );
    }

    #[test]
    fn test_reconciler_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.dependency_retry(), Duration::from_secs(5));
        assert_eq!(config.error_backoff(), Duration::from_secs(10));
        assert_eq!(config.resync_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.reconciler.workers, 4);
        assert_eq!(config.logging.level, "info");
    }
}
