// src/config.rs

//! Manages monitor configuration: loading, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// The monitor's tunables. The struct is an immutable snapshot: the running
/// monitor holds it behind an `Arc` and hot-reloads by swapping the whole
/// snapshot, so individual fields never change under a reader.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MonitorConfig {
    /// The address the protocol listener binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// The port the protocol listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Initial log filter, overridable with `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often the health-check worker probes every registered node.
    #[serde(with = "humantime_serde", default = "default_health_check_period")]
    pub health_check_period: Duration,

    /// Per-probe connection timeout.
    #[serde(with = "humantime_serde", default = "default_health_check_timeout")]
    pub health_check_timeout: Duration,

    /// Extra probe attempts before a round counts as failed.
    #[serde(default = "default_health_check_retries")]
    pub health_check_retries: u32,

    /// Fixed delay between probe attempts within a round.
    #[serde(with = "humantime_serde", default = "default_health_check_retry_delay")]
    pub health_check_retry_delay: Duration,

    /// How long a node must stay unhealthy, with no heartbeat, before an
    /// automatic failover may begin.
    #[serde(with = "humantime_serde", default = "default_unhealthy_timeout")]
    pub node_considered_unhealthy_timeout: Duration,

    /// Failovers are suppressed for this long after monitor boot, so a
    /// restarting monitor does not demote nodes it has not heard from yet.
    #[serde(with = "humantime_serde", default = "default_startup_grace_period")]
    pub startup_grace_period: Duration,

    /// How long a failover election waits for report-lsn heartbeats before
    /// proceeding with the candidates that did report, or aborting.
    #[serde(with = "humantime_serde", default = "default_election_timeout")]
    pub election_timeout: Duration,

    /// Maximum number of bytes a targeted promotion candidate may lag behind
    /// the current primary.
    #[serde(default = "default_promotion_max_lag")]
    pub promotion_max_lag: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6043
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_check_period() -> Duration {
    Duration::from_secs(5)
}

fn default_health_check_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_health_check_retries() -> u32 {
    2
}

fn default_health_check_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_unhealthy_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_startup_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_election_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_promotion_max_lag() -> u64 {
    16 * 1024 * 1024
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            health_check_period: default_health_check_period(),
            health_check_timeout: default_health_check_timeout(),
            health_check_retries: default_health_check_retries(),
            health_check_retry_delay: default_health_check_retry_delay(),
            node_considered_unhealthy_timeout: default_unhealthy_timeout(),
            startup_grace_period: default_startup_grace_period(),
            election_timeout: default_election_timeout(),
            promotion_max_lag: default_promotion_max_lag(),
        }
    }
}

impl MonitorConfig {
    /// Loads the configuration from a TOML file, applying defaults for any
    /// missing field.
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
        let config: MonitorConfig =
            toml::from_str(&content).with_context(|| format!("parsing config file {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("listener port must be non-zero"));
        }
        if self.health_check_period.is_zero() {
            return Err(anyhow!("health_check_period must be non-zero"));
        }
        if self.health_check_timeout.is_zero() {
            return Err(anyhow!("health_check_timeout must be non-zero"));
        }
        if self.election_timeout.is_zero() {
            return Err(anyhow!("election_timeout must be non-zero"));
        }
        Ok(())
    }
}
