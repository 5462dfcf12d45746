//! Domain types for the server: the on-disk configuration and the errors
//! every layer reports through.

pub mod config;
pub mod error;

pub use config::{
    load_config, resolve_config_path, ConfigError, SchedulingMode, ServerConfig, ServerSection,
};
pub use error::{BridgeError, Resource, TransportOp};
