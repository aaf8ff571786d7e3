//! Data storage and persistence
//!
//! The key-value collaborator the ledger writes through, its sled and
//! in-memory backends, and the UTXO index derived from the chain.

pub mod kv;
pub mod memory_store;
pub mod sled_store;
pub mod utxo_set;

pub use kv::{KeyValueStore, WriteBatch, WriteOp};
pub use memory_store::MemoryStore;
pub use sled_store::SledStore;
pub use utxo_set::{UTXOSet, UnspentOutput};
