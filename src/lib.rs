//! # Ledger Chain
//!
//! A minimal UTXO ledger: signed transfers between Base58Check addresses,
//! blocks sealed by proof of work over a Merkle root, an append-only chain
//! in a key-value store, and a persistent index of unspent outputs.
//!
//! ## How the code is organized
//! - `core/`: transactions, Merkle tree, proof of work, blocks, the chain and
//!   its iterator
//! - `storage/`: the key-value collaborator (sled or in-memory) and the UTXO
//!   index
//! - `wallet/`: key pairs, addresses and the wallet file
//! - `network/`: relaying signed transactions to known peers
//! - `config/`: node configuration passed explicitly to whoever needs it
//! - `utils/`: hashing, signatures, Base58 and the binary codec
//! - `cli/`: command-line surface used by `main.rs`
//!
//! ## Flow
//! A wallet builds a transfer from outputs the [`UTXOSet`] reports as
//! spendable, signs it against the referenced transactions found on the
//! [`Blockchain`], and either relays it or mines it into a block together with
//! a coinbase reward. Each committed block is then applied to the index with
//! [`UTXOSet::update`].

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, Blockchain, BlockchainIterator, ChainParams, MerkleProof, MerkleTree, ProofOfWork,
    TXInput, TXOutput, Transaction, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use network::{TcpRelay, TransactionRelay};
pub use storage::{KeyValueStore, MemoryStore, SledStore, UTXOSet, UnspentOutput, WriteBatch};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    convert_address, decode_address, hash_pub_key, validate_address, Wallet, Wallets,
};
