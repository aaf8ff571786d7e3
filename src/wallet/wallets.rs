use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::info;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Wallet file keyed by address. The ledger only ever reads key material out
/// of it; persistence is confined to this type.
pub struct Wallets {
    path: PathBuf,
    wallets: BTreeMap<String, Wallet>,
}

impl Wallets {
    /// Loads the wallet file at `path`, starting empty if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Wallets> {
        let path = path.as_ref().to_path_buf();
        let mut wallets = Wallets {
            path,
            wallets: BTreeMap::new(),
        };
        wallets.load_from_file()?;
        Ok(wallets)
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        info!("Created wallet {address}");
        Ok(address)
    }

    /// Addresses in ascending order.
    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    /// Like [`Wallets::get_wallet`] but reports a missing address as an error.
    pub fn require_wallet(&self, address: &str) -> Result<&Wallet> {
        self.get_wallet(address)
            .ok_or_else(|| BlockchainError::Wallet(format!("No wallet for address {address}")))
    }

    fn load_from_file(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut file = File::open(&self.path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        self.wallets = deserialize(&buf)
            .map_err(|e| BlockchainError::Wallet(format!("Corrupt wallet file: {e}")))?;
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&serialize(&self.wallets)?)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wallets_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallets_test.dat");

        let (first, second) = {
            let mut wallets = Wallets::load(&path).unwrap();
            (
                wallets.create_wallet().unwrap(),
                wallets.create_wallet().unwrap(),
            )
        };

        let reloaded = Wallets::load(&path).unwrap();
        let mut expected = vec![first.clone(), second];
        expected.sort();
        assert_eq!(reloaded.get_addresses(), expected);
        assert_eq!(
            reloaded.require_wallet(&first).unwrap().get_address(),
            first
        );
    }

    #[test]
    fn test_missing_wallet_is_an_error() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::load(dir.path().join("none.dat")).unwrap();
        assert!(wallets.get_addresses().is_empty());
        assert!(matches!(
            wallets.require_wallet("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            Err(BlockchainError::Wallet(_))
        ));
    }

    #[test]
    fn test_corrupt_wallet_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.dat");
        fs::write(&path, [0xFF, 0xFF, 0xFF]).unwrap();
        assert!(matches!(
            Wallets::load(&path),
            Err(BlockchainError::Wallet(_))
        ));
    }
}
