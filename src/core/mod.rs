//! Core blockchain functionality
//!
//! This module contains the fundamental ledger components: transactions,
//! the Merkle tree, proof-of-work sealing, blocks and the persistent chain.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator, ChainParams, DEFAULT_DIFFICULTY};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use proof_of_work::ProofOfWork;
pub use transaction::{TXInput, TXOutput, Transaction, COINBASE_VOUT, SUBSIDY};
