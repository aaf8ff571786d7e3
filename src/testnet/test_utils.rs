//! Test utilities for blockchain testing

use crate::core::{Blockchain, ChainParams, TXInput, TXOutput, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{KeyValueStore, MemoryStore};
use crate::wallet::Wallet;
use data_encoding::HEXLOWER;
use std::sync::Arc;

/// Low enough that a block seals in a few hundred hashes.
pub const TEST_DIFFICULTY: u32 = 8;

pub fn test_params() -> ChainParams {
    ChainParams {
        difficulty: TEST_DIFFICULTY,
    }
}

/// Fresh in-memory chain whose genesis reward belongs to the returned wallet.
pub fn create_test_blockchain() -> Result<(Blockchain, Wallet)> {
    let miner = Wallet::new()?;
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let blockchain = Blockchain::create_blockchain(store, &miner.get_address(), test_params())?;
    Ok((blockchain, miner))
}

/// Signed transfer of `amount` from `from` to `to`, selecting inputs from a
/// full chain scan so no UTXO index is needed.
pub fn transfer(
    blockchain: &Blockchain,
    from: &Wallet,
    to: &Wallet,
    amount: u64,
) -> Result<Transaction> {
    let owner = from.pub_key_hash();
    let mut inputs = vec![];
    let mut accumulated = 0;

    'select: for (txid_hex, outs) in blockchain.find_utxo()? {
        let txid = HEXLOWER
            .decode(txid_hex.as_bytes())
            .map_err(|e| BlockchainError::Serialization(e.to_string()))?;
        for out in outs {
            if accumulated >= amount {
                break 'select;
            }
            if out.output.is_locked_with_key(&owner) {
                accumulated += out.output.get_value();
                inputs.push(TXInput::new(&txid, out.vout));
            }
        }
    }

    if accumulated < amount {
        return Err(BlockchainError::InsufficientFunds {
            required: amount,
            available: accumulated,
        });
    }

    let mut outputs = vec![TXOutput::locked_to(amount, &to.pub_key_hash())];
    if accumulated > amount {
        outputs.push(TXOutput::locked_to(accumulated - amount, &owner));
    }

    let mut tx = Transaction::from_parts(inputs, outputs)?;
    blockchain.sign_transaction(&mut tx, from.get_pkcs8())?;
    Ok(tx)
}

/// Walks the chain checking linkage, heights, proof of work and Merkle roots.
pub fn validate_blockchain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let mut expected_hash = blockchain.tip_hash()?;
    let mut expected_height = blockchain.get_best_height()?;

    for block in blockchain.iterator()? {
        let block = block?;
        if block.get_hash() != expected_hash.as_slice()
            || block.get_height() != expected_height
            || !crate::core::ProofOfWork::validate(&block)
            || !block.verify_merkle_root()?
        {
            return Ok(false);
        }
        if block.is_genesis() {
            return Ok(expected_height == 0);
        }
        expected_hash = block.get_pre_block_hash().to_vec();
        expected_height -= 1;
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SUBSIDY;

    #[test]
    fn test_create_test_blockchain() {
        let (blockchain, _) = create_test_blockchain().unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert!(validate_blockchain_integrity(&blockchain).unwrap());
    }

    #[test]
    fn test_transfer_rejects_overspend() {
        let (blockchain, miner) = create_test_blockchain().unwrap();
        let bob = Wallet::new().unwrap();
        assert!(matches!(
            transfer(&blockchain, &miner, &bob, SUBSIDY + 1),
            Err(BlockchainError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_integrity_after_mining() {
        let (blockchain, miner) = create_test_blockchain().unwrap();
        let bob = Wallet::new().unwrap();
        for amount in [10, 20] {
            let tx = transfer(&blockchain, &miner, &bob, amount).unwrap();
            blockchain.mine_block(&[tx]).unwrap();
        }
        assert_eq!(blockchain.get_best_height().unwrap(), 2);
        assert!(validate_blockchain_integrity(&blockchain).unwrap());
    }
}
