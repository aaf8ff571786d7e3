use crate::core::{ChainParams, DEFAULT_DIFFICULTY};
use crate::error::{BlockchainError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "ledger.toml";
pub const DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";
const DEFAULT_DATA_DIR: &str = "data";

const CONFIG_PATH_KEY: &str = "LEDGER_CONFIG";
const NODE_ID_KEY: &str = "NODE_ID";
const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";
const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";

/// Node settings, built once at startup and passed to whatever needs them.
///
/// Layering: built-in defaults, then the TOML file, then environment
/// variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Falls back to the port of `node_address` when unset.
    pub node_id: Option<String>,
    pub difficulty: u32,
    pub node_address: String,
    pub known_peers: Vec<String>,
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            node_id: None,
            difficulty: DEFAULT_DIFFICULTY,
            node_address: DEFAULT_NODE_ADDR.to_string(),
            known_peers: vec![],
            log_level: None,
        }
    }
}

impl Config {
    /// Reads `path`, else `$LEDGER_CONFIG`, else `ledger.toml` if present,
    /// then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match (path, env::var(CONFIG_PATH_KEY)) {
            (Some(path), _) => Config::from_file(path)?,
            (None, Ok(path)) => Config::from_file(path)?,
            (None, Err(_)) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Config::from_file(DEFAULT_CONFIG_FILE)?
            }
            (None, Err(_)) => Config::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Config::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `NODE_ID`, `LEDGER_DATA_DIR`, `LEDGER_DIFFICULTY` and
    /// `NODE_ADDRESS` as returned by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(node_id) = lookup(NODE_ID_KEY) {
            self.node_id = Some(node_id);
        }
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(difficulty) = lookup(DIFFICULTY_KEY) {
            self.difficulty = difficulty.trim().parse().map_err(|e| {
                BlockchainError::Config(format!("{DIFFICULTY_KEY}={difficulty}: {e}"))
            })?;
        }
        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            self.node_address = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ChainParams::new(self.difficulty)?;
        if self.node_address.trim().is_empty() {
            return Err(BlockchainError::Config(
                "node_address must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn chain_params(&self) -> Result<ChainParams> {
        ChainParams::new(self.difficulty)
    }

    /// Configured node ID, or the port of `node_address`
    /// (e.g. "127.0.0.1:2001" -> "2001").
    pub fn get_node_id(&self) -> String {
        if let Some(node_id) = &self.node_id {
            return node_id.clone();
        }
        match self.node_address.rsplit_once(':') {
            Some((_, port)) if !port.is_empty() => port.to_string(),
            _ => "default".to_string(),
        }
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join(format!("blocks_{}", self.get_node_id()))
    }

    pub fn wallets_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallets_{}.dat", self.get_node_id()))
    }
}
