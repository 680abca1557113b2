//! KDL configuration parsing for runq.
//!
//! This crate handles parsing of the system configuration file
//! (`runq.kdl`): database connection and queue strategy settings.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{DatabaseConfig, QueueConfig, SystemConfig, load_system_config, parse_system_config};
