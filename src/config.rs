//! Server configuration.
//!
//! Every option can be given on the command line or through an `EMBERKV_*`
//! environment variable; the command line wins.

use crate::storage::{ReaperConfig, DEFAULT_REAPER_INTERVAL};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::time::Duration;

const DEFAULT_REAPER_INTERVAL_MS: u64 = DEFAULT_REAPER_INTERVAL.as_millis() as u64;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "emberkv",
    version,
    about = "In-memory key-value server speaking a Redis-style protocol"
)]
pub struct Config {
    /// Host to bind to
    #[arg(short = 'H', long, env = "EMBERKV_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "EMBERKV_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Milliseconds between expired-key sweeps
    #[arg(
        long,
        env = "EMBERKV_REAPER_INTERVAL_MS",
        default_value_t = DEFAULT_REAPER_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub reaper_interval_ms: u64,

    /// Default log filter; RUST_LOG takes precedence when set
    #[arg(long, env = "EMBERKV_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reaper_interval_ms: DEFAULT_REAPER_INTERVAL_MS,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reaper(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_millis(self.reaper_interval_ms),
        }
    }
}
