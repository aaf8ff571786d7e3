use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Connect and write timeout for a single peer, in milliseconds.
pub const TCP_WRITE_TIMEOUT: u64 = 5000;

/// Wire message written to a peer as one JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Package {
    Tx {
        addr_from: String,
        transaction: Vec<u8>,
    },
}

/// Hands signed transactions to other nodes.
pub trait TransactionRelay {
    fn known_peers(&self) -> Vec<String>;

    fn broadcast_transaction(&self, tx: &Transaction) -> Result<()>;
}

/// Sends each transaction to every known peer over a fresh TCP connection.
pub struct TcpRelay {
    node_address: String,
    peers: Vec<String>,
    timeout: Duration,
}

impl TcpRelay {
    pub fn new(node_address: impl Into<String>, peers: Vec<String>) -> TcpRelay {
        TcpRelay {
            node_address: node_address.into(),
            peers,
            timeout: Duration::from_millis(TCP_WRITE_TIMEOUT),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> TcpRelay {
        self.timeout = timeout;
        self
    }

    fn send_tx(&self, addr: &str, tx: &Transaction) -> Result<()> {
        let socket_addr = addr
            .parse::<SocketAddr>()
            .map_err(|e| BlockchainError::Network(format!("Invalid address {addr}: {e}")))?;

        let pkg = Package::Tx {
            addr_from: self.node_address.clone(),
            transaction: tx.serialize()?,
        };
        self.send_data(socket_addr, &pkg)
    }

    fn send_data(&self, addr: SocketAddr, pkg: &Package) -> Result<()> {
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| BlockchainError::Network(format!("Failed to connect to {addr}: {e}")))?;

        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;

        serde_json::to_writer(&stream, pkg)
            .map_err(|e| BlockchainError::Network(format!("Failed to send data: {e}")))?;
        stream.flush()?;
        Ok(())
    }
}

impl TransactionRelay for TcpRelay {
    fn known_peers(&self) -> Vec<String> {
        self.peers.clone()
    }

    /// Succeeds if at least one peer accepted the transaction.
    fn broadcast_transaction(&self, tx: &Transaction) -> Result<()> {
        if self.peers.is_empty() {
            return Err(BlockchainError::Network("No known peers".to_string()));
        }

        let mut delivered = 0;
        let mut last_error = None;
        for peer in &self.peers {
            match self.send_tx(peer, tx) {
                Ok(()) => {
                    info!("Sent transaction {} to {peer}", tx.get_id_hex());
                    delivered += 1;
                }
                Err(e) => {
                    warn!("Failed to send transaction to {peer}: {e}");
                    last_error = Some(e);
                }
            }
        }

        match (delivered, last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use std::net::TcpListener;
    use std::thread;

    fn sample_tx() -> Transaction {
        let address = Wallet::new().unwrap().get_address();
        Transaction::new_coinbase_tx(&address, "relay").unwrap()
    }

    #[test]
    fn test_package_serialization() {
        let pkg = Package::Tx {
            addr_from: "127.0.0.1:2001".to_string(),
            transaction: vec![1, 2, 3],
        };

        let serialized = serde_json::to_string(&pkg).unwrap();
        let deserialized: Package = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, pkg);
    }

    #[test]
    fn test_broadcast_delivers_package() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = listener.local_addr().unwrap().to_string();
        let receiver = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let pkg: Package = serde_json::Deserializer::from_reader(stream)
                .into_iter::<Package>()
                .next()
                .unwrap()
                .unwrap();
            pkg
        });

        let tx = sample_tx();
        let relay = TcpRelay::new("127.0.0.1:3000", vec![peer.clone()]);
        assert_eq!(relay.known_peers(), vec![peer]);
        relay.broadcast_transaction(&tx).unwrap();

        let Package::Tx {
            addr_from,
            transaction,
        } = receiver.join().unwrap();
        assert_eq!(addr_from, "127.0.0.1:3000");
        assert_eq!(Transaction::deserialize(&transaction).unwrap(), tx);
    }

    #[test]
    fn test_broadcast_without_peers_fails() {
        let relay = TcpRelay::new("127.0.0.1:3000", vec![]);
        assert!(matches!(
            relay.broadcast_transaction(&sample_tx()),
            Err(BlockchainError::Network(_))
        ));
    }

    #[test]
    fn test_broadcast_to_unreachable_peer_fails() {
        // Bind then drop to get a port nobody is listening on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let relay = TcpRelay::new("127.0.0.1:3000", vec![format!("127.0.0.1:{port}")])
            .with_timeout(Duration::from_millis(200));

        assert!(relay.broadcast_transaction(&sample_tx()).is_err());
    }

    #[test]
    fn test_invalid_peer_address() {
        let relay = TcpRelay::new("127.0.0.1:3000", vec!["not-an-address".to_string()]);
        assert!(matches!(
            relay.broadcast_transaction(&sample_tx()),
            Err(BlockchainError::Network(_))
        ));
    }
}
