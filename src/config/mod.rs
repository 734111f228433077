pub mod settings;

pub use settings::{
    ApiSettings, AuditSettings, BreakerSettings, ConfigError, DeadLetterSettings, FileSinkSettings,
    PolicySettings, RetrySettings, Settings, ShadowSettings, TelemetrySettings, ENV_PREFIX,
};

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::observability::LogFormat;

/// Process-level options. Everything else lives in `Settings`.
#[derive(Debug, Clone, Parser)]
#[command(name = "policygate")]
#[command(about = "Request-time policy gateway with shadow mode and a hash-chained audit trail")]
pub struct Cli {
    /// Configuration file (YAML or TOML); `POLICYGATE__*` variables override it
    #[arg(long, env = "POLICYGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP server listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "POLICYGATE_LISTEN_ADDR")]
    pub listen_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "POLICYGATE_LOG_LEVEL")]
    pub log_level: String,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "POLICYGATE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Upper bound on draining telemetry at shutdown, in seconds
    #[arg(long, default_value = "30", env = "POLICYGATE_SHUTDOWN_TIMEOUT_SECS")]
    pub shutdown_timeout_secs: u64,
}

impl Cli {
    /// Get shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for Cli {
    fn default() -> Self {
        Cli {
            config: None,
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            shutdown_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cli() {
        let cli = Cli::default();

        assert_eq!(cli.listen_addr, "0.0.0.0:8080");
        assert_eq!(cli.shutdown_timeout(), Duration::from_secs(30));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "policygate",
            "--config",
            "/etc/policygate.yaml",
            "--log-format",
            "json",
            "--shutdown-timeout-secs",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/policygate.yaml")));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.shutdown_timeout(), Duration::from_secs(5));
    }
}
