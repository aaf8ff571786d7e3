//! Configuration management
//!
//! Node settings (data directory, node ID, mining difficulty, relay peers)
//! resolved from defaults, an optional TOML file and the environment.

pub mod settings;

pub use settings::{Config, DEFAULT_CONFIG_FILE, DEFAULT_NODE_ADDR};
