// src/config.rs

//! Manages server configuration: loading, layering environment overrides,
//! and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The default region a server identifies as when none is configured.
pub const DEFAULT_REGION: &str = "global";

/// Configuration for the ACL subsystem.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AclConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Bound on cached token resolutions for federated regions.
    #[serde(default = "default_acl_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,
    #[serde(default = "default_acl_ttl", with = "humantime_serde")]
    pub policy_ttl: Duration,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_ttl: default_acl_ttl(),
            policy_ttl: default_acl_ttl(),
        }
    }
}

fn default_acl_ttl() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for the event broker.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EventBrokerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-subscriber buffered frames before the subscriber is dropped.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for EventBrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_event_buffer_size() -> usize {
    100
}

/// A default workload-identity shape injected by admission.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IdentityConfig {
    #[serde(default)]
    pub audience: Vec<String>,
    #[serde(default)]
    pub env: bool,
    #[serde(default)]
    pub file: bool,
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// Consul integration knobs consumed by the admission pipeline.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConsulConfig {
    /// When set, Consul-provider services must carry a workload identity.
    #[serde(default)]
    pub use_identity: bool,
    #[serde(default)]
    pub service_identity: Option<IdentityConfig>,
    #[serde(default)]
    pub task_identity: Option<IdentityConfig>,
    #[serde(default = "default_consul_cluster")]
    pub default_cluster: String,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            use_identity: false,
            service_identity: None,
            task_identity: None,
            default_cluster: default_consul_cluster(),
        }
    }
}

fn default_consul_cluster() -> String {
    "default".to_string()
}

/// Vault integration knobs consumed by the admission pipeline.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VaultConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub use_identity: bool,
    #[serde(default)]
    pub default_identity: Option<IdentityConfig>,
    #[serde(default = "default_vault_cluster")]
    pub default_cluster: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            use_identity: false,
            default_identity: None,
            default_cluster: default_vault_cluster(),
        }
    }
}

fn default_vault_cluster() -> String {
    "default".to_string()
}

/// Job submission limits.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobConfig {
    #[serde(default = "default_job_max_priority")]
    pub max_priority: u8,
    #[serde(default = "default_job_default_priority")]
    pub default_priority: u8,
    /// Cap on the encoded size of submitted job source text, in bytes.
    #[serde(default = "default_job_max_source_size")]
    pub max_source_size: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_priority: default_job_max_priority(),
            default_priority: default_job_default_priority(),
            max_source_size: default_job_max_source_size(),
        }
    }
}

fn default_job_max_priority() -> u8 {
    100
}
fn default_job_default_priority() -> u8 {
    50
}
fn default_job_max_source_size() -> usize {
    1024 * 1024
}

/// RPC limits.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LimitsConfig {
    /// Default wait window for blocking queries.
    #[serde(default = "default_blocking_query_window", with = "humantime_serde")]
    pub blocking_query_window: Duration,
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub rpc_handshake_timeout: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            blocking_query_window: default_blocking_query_window(),
            rpc_handshake_timeout: default_handshake_timeout(),
        }
    }
}

fn default_blocking_query_window() -> Duration {
    Duration::from_secs(300)
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Garbage-collection thresholds. An object must be terminal and older
/// than its threshold before GC removes it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GcConfig {
    #[serde(default = "default_gc_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_gc_threshold", with = "humantime_serde")]
    pub eval_threshold: Duration,
    #[serde(default = "default_gc_threshold", with = "humantime_serde")]
    pub deployment_threshold: Duration,
    #[serde(default = "default_gc_threshold", with = "humantime_serde")]
    pub job_threshold: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: default_gc_interval(),
            eval_threshold: default_gc_threshold(),
            deployment_threshold: default_gc_threshold(),
            job_threshold: default_gc_threshold(),
        }
    }
}

fn default_gc_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_gc_threshold() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Federated replication of ACL objects and namespaces from the
/// authoritative region.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicationConfig {
    #[serde(default = "default_replication_backoff", with = "humantime_serde")]
    pub backoff: Duration,
    /// Management token presented to the authoritative region.
    #[serde(default)]
    pub token: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            backoff: default_replication_backoff(),
            token: String::new(),
        }
    }
}

fn default_replication_backoff() -> Duration {
    Duration::from_secs(30)
}

/// The top-level server configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_region")]
    pub region: String,
    /// The region federated regions replicate from. Defaults to `region`.
    #[serde(default)]
    pub authoritative_region: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Dev mode: single server, immediate leadership, in-memory only.
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// With ACLs off, enables `Agent.Profile`.
    #[serde(default)]
    pub enable_debug: bool,
    /// Known server addresses per region, for cross-region forwarding.
    #[serde(default)]
    pub regions: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub acl: AclConfig,
    #[serde(default)]
    pub event_broker: EventBrokerConfig,
    #[serde(default)]
    pub consul: ConsulConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4747
}
fn default_region() -> String {
    DEFAULT_REGION.to_string()
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        // An empty document deserializes to all defaults.
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl Config {
    /// Loads configuration from a TOML file layered with `FLOTILLA_*`
    /// environment overrides (e.g. `FLOTILLA_ACL__ENABLED=true`).
    pub fn from_file(path: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("FLOTILLA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from '{path}'"))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse config from '{path}'"))?;

        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.region.is_empty() {
            return Err(anyhow!("region must not be empty"));
        }
        if self.job.default_priority > self.job.max_priority {
            return Err(anyhow!(
                "job.default_priority ({}) exceeds job.max_priority ({})",
                self.job.default_priority,
                self.job.max_priority
            ));
        }
        if self.job.max_priority == 0 {
            return Err(anyhow!("job.max_priority must be positive"));
        }
        if self.event_broker.event_buffer_size == 0 {
            return Err(anyhow!("event_broker.event_buffer_size must be positive"));
        }
        Ok(())
    }

    /// The region this server replicates from; itself when standalone.
    pub fn authoritative_region(&self) -> &str {
        if self.authoritative_region.is_empty() {
            &self.region
        } else {
            &self.authoritative_region
        }
    }

    /// Whether this server is in the authoritative region.
    pub fn is_authoritative(&self) -> bool {
        self.authoritative_region() == self.region
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
