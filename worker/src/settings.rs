use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub coordinator_addr: String,
    pub max_connection_attempts: u32,
    pub connection_retry_delay_secs: u64,
    /// Size of the local thread pool; 0 means one thread per core.
    pub local_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            coordinator_addr: "127.0.0.1:9876".to_string(),
            max_connection_attempts: 5,
            connection_retry_delay_secs: 5,
            local_threads: 0,
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

    pub fn threads(&self) -> usize {
        if self.local_threads > 0 {
            return self.local_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}
