//! # steward-core
//!
//! Shared types and configuration for the steward service supervisor.
//!
//! Services are declared in a YAML config file and run out of a working
//! directory with three subdirectories: `service/` (executables and packed
//! folders), `log/` (rotated output logs) and `binary/` (upload staging).

pub mod clock;
pub mod config;
pub mod service;

pub use config::{BasicAuth, Config, ConfigError, Limits};
pub use service::{LogFile, Mode, Service, ServiceView};
