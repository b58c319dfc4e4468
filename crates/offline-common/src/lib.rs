//! # Offline Common
//!
//! Shared pieces of the offline-shell workspace.
//!
//! ## Features
//!
//! - Worker configuration (origin, cache generation, precache manifest)
//! - Configuration errors
//! - Logging configuration and setup

pub mod config;
pub mod error;
pub mod logging;

pub use config::{AssetStrategy, WorkerConfig};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, LogConfig, LogFormat};
