use std::fs;

use anyhow::{Context, Result, bail};
use libplacement::algorithms::Policy;
use serde::Deserialize;

/// Daemon configuration, loaded from a YAML file. Every knob has a
/// default so a minimal file (or an empty one) yields a working cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// ip:port the command surface listens on.
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default)]
    pub auto_scale: bool,
    #[serde(default = "default_algo")]
    pub scheduling_algo: String,
    #[serde(default = "default_node_capacity")]
    pub default_node_capacity: u32,
    /// Percent of aggregate capacity above which a node is added.
    #[serde(default = "default_high_threshold")]
    pub auto_scale_high_threshold: u32,
    /// Percent below which the least loaded node is removed.
    #[serde(default = "default_low_threshold")]
    pub auto_scale_low_threshold: u32,
    /// Forwarded to workers at provision time; the control plane itself
    /// never acts on it.
    #[serde(default)]
    pub heavenly_restriction: bool,
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Host the port-map provisioner derives worker endpoints from.
    #[serde(default = "default_worker_host")]
    pub worker_host: String,
    /// Worker N listens on worker_base_port + N.
    #[serde(default = "default_worker_base_port")]
    pub worker_base_port: u16,
}

fn default_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_algo() -> String {
    "first-fit".to_string()
}

fn default_node_capacity() -> u32 {
    4
}

fn default_high_threshold() -> u32 {
    80
}

fn default_low_threshold() -> u32 {
    20
}

fn default_node_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    15
}

fn default_worker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_worker_base_port() -> u16 {
    5100
}

impl Config {
    pub fn policy(&self) -> Result<Policy> {
        self.scheduling_algo
            .parse()
            .context("invalid scheduling_algo in config")
    }

    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        if self.default_node_capacity == 0 {
            bail!("default_node_capacity must be a positive integer");
        }
        if self.auto_scale_high_threshold > 100 || self.auto_scale_low_threshold > 100 {
            bail!("auto-scale thresholds are percentages and must be within 0-100");
        }
        if self.auto_scale_high_threshold <= self.auto_scale_low_threshold {
            bail!("auto_scale_high_threshold must be greater than auto_scale_low_threshold");
        }
        if self.node_timeout_secs == 0 || self.poll_interval_secs == 0 {
            bail!("node_timeout_secs and poll_interval_secs must be positive");
        }
        Ok(())
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    cfg.validate()?;
    Ok(cfg)
}
