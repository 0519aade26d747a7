//! # insteon-server
//!
//! Daemon glue for insteon-plm.
//!
//! This crate provides:
//! - YAML configuration with environment overrides
//! - Serial and TCP transports to the PLM
//! - One polling loop per gateway with periodic snapshot saves
//! - A read-only HTTP status endpoint with Prometheus metrics

pub mod config;
pub mod error;
pub mod metrics;
pub mod runner;
pub mod status;
pub mod transport;

pub use config::{Config, ConfigError, GatewayConfig, StatusConfig, StorageConfig};
pub use error::ServerError;
pub use metrics::Metrics;
pub use runner::{restore, GatewayRegistry, GatewayRunner, SharedPlm};
pub use status::run_status_server;
