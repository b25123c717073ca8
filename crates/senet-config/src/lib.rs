//! Configuration for the Senet server.
//!
//! Settings persist to disk as a RON file, every field falls back to its
//! default when missing, and command-line flags override whatever the file
//! says.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE_NAME, Config, DEFAULT_PORT, LoggingConfig, MatchConfig, NetworkConfig, PORT_RANGE,
    RulesConfig, TimingConfig,
};
pub use error::ConfigError;
