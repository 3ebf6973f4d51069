use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Coordinator configuration. Read once at startup; a JSON file given on the
/// command line overrides the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listening_port: u16,
    pub max_bind_attempts: u32,
    pub bind_retry_delay_secs: u64,
    /// How long a session may stay silent before the dispatch nudge fires.
    pub idle_interval_secs: u64,
    pub quotas: QuotaTable,
    /// How many dummy units the coordinator seeds its own queue with.
    pub demo_jobs: usize,
    /// Every nth demo unit errors out; 0 disables failures.
    pub demo_fail_every: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listening_port: 9876,
            max_bind_attempts: 5,
            bind_retry_delay_secs: 5,
            idle_interval_secs: 10,
            quotas: QuotaTable::default(),
            demo_jobs: 16,
            demo_fail_every: 0,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading settings from {path}"))?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Per-host concurrency budgets. Rules are case-insensitive substring
/// matches against the worker's registered name, tried in order; the first
/// hit wins, unknown hosts get the default.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaTable {
    #[serde(default)]
    pub rules: Vec<QuotaRule>,
    #[serde(default = "default_quota")]
    pub default: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaRule {
    pub host: String,
    pub slots: usize,
}

fn default_quota() -> usize {
    4
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default: default_quota(),
        }
    }
}

impl QuotaTable {
    pub fn quota(&self, hostname: &str) -> usize {
        let hostname = hostname.to_ascii_lowercase();
        for rule in &self.rules {
            if hostname.contains(&rule.host.to_ascii_lowercase()) {
                return rule.slots;
            }
        }
        self.default
    }
}
