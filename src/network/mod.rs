//! Transaction relay
//!
//! When a node does not mine a transfer itself it hands the signed
//! transaction to its peers. This module is only the sending half; listening,
//! gossip and block sync are not part of this crate.

pub mod relay;

pub use relay::{Package, TcpRelay, TransactionRelay, TCP_WRITE_TIMEOUT};
