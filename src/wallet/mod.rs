//! Wallet management
//!
//! Key pairs, address derivation and validation, and the wallet file the CLI
//! keeps them in.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{convert_address, decode_address, hash_pub_key, validate_address, Wallet};
pub use wallets::Wallets;
