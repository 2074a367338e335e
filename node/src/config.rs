//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use quill_types::NetworkId;

use crate::NodeError;

/// Configuration for a Quill node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network to connect to.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Port to listen on for peering connections; 0 selects the network
    /// default.
    #[serde(default)]
    pub port: u16,

    /// I/O worker threads; 0 sizes from the CPU count (overridable with
    /// the `QUILL_HARDWARE_CONCURRENCY` environment variable).
    #[serde(default)]
    pub io_threads: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether locally submitted blocks are re-flooded until confirmed.
    #[serde(default = "default_true")]
    pub enable_local_block_broadcast: bool,

    /// Maximum concurrent elections.
    #[serde(default = "default_max_elections")]
    pub max_elections: usize,

    #[serde(default)]
    pub bootstrap_ascending: BootstrapAscendingConfig,
}

/// `[bootstrap_ascending]` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapAscendingConfig {
    /// Maximum outstanding requests to a peer. 0 = unlimited, not
    /// recommended.
    #[serde(default = "default_requests_limit")]
    pub requests_limit: u32,

    /// Rate limit on random sampling accounts from the ledger (per
    /// second). 0 = unlimited, not recommended.
    #[serde(default = "default_database_rate_limit")]
    pub database_rate_limit: u64,

    /// Outstanding-request cap for database-sampled accounts.
    #[serde(default = "default_database_requests_limit")]
    pub database_requests_limit: u32,

    /// Number of blocks requested per pull.
    #[serde(default = "default_pull_count")]
    pub pull_count: u8,

    /// Milliseconds before an outstanding request tag is dropped.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    /// Scales the number of samples tracked for bootstrap throttling.
    #[serde(default = "default_throttle_coefficient")]
    pub throttle_coefficient: usize,

    /// Milliseconds to wait between requests when throttled.
    #[serde(default = "default_throttle_wait_ms")]
    pub throttle_wait: u64,

    /// Whether the ledger-scan strategy fills coverage gaps.
    #[serde(default)]
    pub enable_ledger_scan: bool,

    #[serde(default)]
    pub account_sets: AccountSetsConfig,
}

/// `[bootstrap_ascending.account_sets]` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountSetsConfig {
    /// Number of account candidates to consider per selection.
    #[serde(default = "default_consideration_count")]
    pub consideration_count: usize,

    /// Cutoff size for the priority set.
    #[serde(default = "default_priorities_max")]
    pub priorities_max: usize,

    /// Cutoff size for the blocked set.
    #[serde(default = "default_blocking_max")]
    pub blocking_max: usize,

    /// Milliseconds an account rests after being selected.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown: u64,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_elections() -> usize {
    5000
}

fn default_requests_limit() -> u32 {
    64
}

fn default_database_rate_limit() -> u64 {
    256
}

fn default_database_requests_limit() -> u32 {
    1024
}

fn default_pull_count() -> u8 {
    128
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_throttle_coefficient() -> usize {
    16
}

fn default_throttle_wait_ms() -> u64 {
    100
}

fn default_consideration_count() -> usize {
    4
}

fn default_priorities_max() -> usize {
    256 * 1024
}

fn default_blocking_max() -> usize {
    256 * 1024
}

fn default_cooldown_ms() -> u64 {
    3000
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }

    pub fn peering_port(&self) -> u16 {
        if self.port != 0 {
            self.port
        } else {
            self.network.default_port()
        }
    }

    /// I/O pool size: explicit config, then the
    /// `QUILL_HARDWARE_CONCURRENCY` override, then the CPU count.
    pub fn io_thread_count(&self) -> usize {
        if self.io_threads != 0 {
            return self.io_threads;
        }
        if let Ok(value) = std::env::var("QUILL_HARDWARE_CONCURRENCY") {
            if let Ok(count) = value.parse::<usize>() {
                if count > 0 {
                    return count;
                }
            }
        }
        std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(4)
    }
}

impl BootstrapAscendingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn throttle_wait_duration(&self) -> Duration {
        Duration::from_millis(self.throttle_wait)
    }
}

impl AccountSetsConfig {
    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.cooldown)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            port: 0,
            io_threads: 0,
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_local_block_broadcast: default_true(),
            max_elections: default_max_elections(),
            bootstrap_ascending: BootstrapAscendingConfig::default(),
        }
    }
}

impl Default for BootstrapAscendingConfig {
    fn default() -> Self {
        Self {
            requests_limit: default_requests_limit(),
            database_rate_limit: default_database_rate_limit(),
            database_requests_limit: default_database_requests_limit(),
            pull_count: default_pull_count(),
            timeout: default_timeout_ms(),
            throttle_coefficient: default_throttle_coefficient(),
            throttle_wait: default_throttle_wait_ms(),
            enable_ledger_scan: false,
            account_sets: AccountSetsConfig::default(),
        }
    }
}

impl Default for AccountSetsConfig {
    fn default() -> Self {
        Self {
            consideration_count: default_consideration_count(),
            priorities_max: default_priorities_max(),
            blocking_max: default_blocking_max(),
            cooldown: default_cooldown_ms(),
        }
    }
}
