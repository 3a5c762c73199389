//! Server configuration.
//!
//! Flags fall back to environment variables and then to defaults. Parsing
//! happens once at startup; the resulting [`ServerConfig`] is passed to
//! [`crate::ModelServer::serve`] and never re-read.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;

/// Default request body limit. Large enough for an uploaded image.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
/// Canonical configuration for one server process.
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Number of actix worker threads.
    pub workers: usize,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
    /// Logging and instrumentation options.
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug)]
/// Knobs for logging, tracing and metrics.
pub struct TelemetryOptions {
    /// Level directive used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub enable_metrics: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            chrome_trace_path: None,
            enable_metrics: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            workers: 1,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            telemetry: TelemetryOptions::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Command line arguments shared by every command that starts a server.
#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Interface to bind.
    #[arg(long = "host", env = "SERVEIT_HOST", default_value = "127.0.0.1")]
    pub host: String,
    /// Port to bind.
    #[arg(long = "port", env = "SERVEIT_PORT", default_value_t = 5000)]
    pub port: u16,
    /// Number of worker threads.
    #[arg(long = "workers", env = "SERVEIT_WORKERS", default_value_t = 1)]
    pub workers: usize,
    /// Largest accepted request body in bytes.
    #[arg(
        long = "max-body-bytes",
        env = "SERVEIT_MAX_BODY_BYTES",
        default_value_t = DEFAULT_MAX_BODY_BYTES
    )]
    pub max_body_bytes: usize,
    /// Log level used when RUST_LOG is unset.
    #[arg(long = "log-level", env = "LOGLEVEL", default_value = "info")]
    pub log_level: String,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Serve Prometheus metrics at /metrics.
    #[arg(long = "metrics", env = "SERVEIT_METRICS", action = clap::ArgAction::SetTrue)]
    pub metrics: bool,
}

impl TryFrom<ServerArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServerArgs) -> Result<Self> {
        let host = args.host.trim().to_owned();
        if host.is_empty() {
            bail!("--host must not be empty");
        }
        if args.workers == 0 {
            bail!("--workers must be at least 1");
        }
        if args.max_body_bytes == 0 {
            bail!("--max-body-bytes must be at least 1");
        }
        let log_level = args.log_level.trim().to_ascii_lowercase();
        if log_level.is_empty() {
            bail!("--log-level must not be empty");
        }

        Ok(Self {
            host,
            port: args.port,
            workers: args.workers,
            max_body_bytes: args.max_body_bytes,
            telemetry: TelemetryOptions {
                log_level,
                chrome_trace_path: args.chrome_trace,
                enable_metrics: args.metrics,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        server: ServerArgs,
    }

    fn parse(args: &[&str]) -> Result<ServerConfig> {
        let harness = Harness::try_parse_from(std::iter::once("serveit").chain(args.iter().copied()))?;
        ServerConfig::try_from(harness.server)
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--workers",
            "4",
            "--log-level",
            "DEBUG",
            "--metrics",
        ])
        .unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.workers, 4);
        assert_eq!(config.telemetry.log_level, "debug");
        assert!(config.telemetry.enable_metrics);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = parse(&["--workers", "0"]).unwrap_err();
        assert!(err.to_string().contains("--workers"));
    }

    #[test]
    fn zero_body_limit_is_rejected() {
        assert!(parse(&["--max-body-bytes", "0"]).is_err());
    }

    #[test]
    fn blank_host_is_rejected() {
        assert!(parse(&["--host", "  "]).is_err());
    }
}
