//! HTTP boundary for serveit: routes, configuration and telemetry wiring.

pub mod config;
pub mod server;
pub mod telemetry;

pub use config::{DEFAULT_MAX_BODY_BYTES, ServerArgs, ServerConfig, TelemetryOptions};
pub use server::{ModelServer, ModelServerBuilder};
pub use telemetry::{TelemetryGuard, init_metrics_recorder, init_tracing};
