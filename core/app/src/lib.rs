//! Request-layer glue for Strongroom.
//!
//! Configuration loading, tracing setup, service wiring and the mapping of
//! core errors to status codes. Front ends (the CLI, a future HTTP server)
//! depend on this crate rather than wiring the core themselves.

pub mod config;
pub mod services;
pub mod status;
pub mod telemetry;

pub use config::{AppConfig, ConfigError, LogFormat, LoggingConfig};
pub use services::Services;
pub use status::{is_client_error, status_code};
