//! Configuration parsing for the `weir` demo binary.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Parser;
use std::time::Duration;

use crate::flow::ChannelOptions;

/// Weir: merge several live sources into one stream.
#[derive(Parser, Debug, Clone)]
#[command(name = "weir")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Number of generator sources to merge
    #[arg(short, long, env = "WEIR_SOURCES", default_value_t = 3)]
    pub sources: usize,

    /// Readings published by each source before it completes (0 = run until interrupted)
    #[arg(short, long, env = "WEIR_ITEMS", default_value_t = 10)]
    pub items: usize,

    /// Per-subscription channel capacity (0 = unbounded)
    #[arg(short, long, env = "WEIR_CAPACITY", default_value_t = 16)]
    pub capacity: usize,

    /// Interval between readings of one source, in milliseconds
    #[arg(long, env = "WEIR_INTERVAL_MS", default_value_t = 100)]
    pub interval_ms: u64,

    /// Interval between progress reports, in milliseconds
    #[arg(long, env = "WEIR_REPORT_MS", default_value_t = 1000)]
    pub report_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions::from_capacity(self.capacity)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_ms.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: 3,
            items: 10,
            capacity: 16,
            interval_ms: 100,
            report_ms: 1000,
            log_level: "info".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sources, 3);
        assert_eq!(config.channel_options(), ChannelOptions::Bounded(16));
    }

    #[test]
    fn test_parse_overrides() {
        let config = Config::try_parse_from(["weir", "--sources", "5", "--capacity", "0", "--interval-ms", "0"]).unwrap();
        assert_eq!(config.sources, 5);
        assert_eq!(config.channel_options(), ChannelOptions::Unbounded);
        assert_eq!(config.interval(), Duration::from_millis(1));
    }
}
