use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::storage::{KeyValueStore, WriteBatch};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// Every index entry lives under this prefix so reindex can find and drop the
// whole index without touching block records.
const UTXO_KEY_PREFIX: &[u8] = b"utxo-";

/// An output still available for spending, with its position in the
/// transaction that created it.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct UnspentOutput {
    pub vout: usize,
    pub output: TXOutput,
}

impl UnspentOutput {
    pub fn new(vout: usize, output: TXOutput) -> UnspentOutput {
        UnspentOutput { vout, output }
    }
}

/// Index of unspent outputs keyed by the transaction that created them.
///
/// The index is derived from the chain. [`UTXOSet::update`] must see every
/// committed block exactly once and in commit order; anything else leaves it
/// out of step with the chain until the next [`UTXOSet::reindex`].
pub struct UTXOSet {
    blockchain: Blockchain,
}

fn utxo_key(txid: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(UTXO_KEY_PREFIX.len() + txid.len());
    key.extend_from_slice(UTXO_KEY_PREFIX);
    key.extend_from_slice(txid);
    key
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn store(&self) -> std::sync::Arc<dyn KeyValueStore> {
        self.blockchain.get_store()
    }

    // (txid, outputs) for every index entry, in ascending txid order.
    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<UnspentOutput>)>> {
        self.store()
            .scan_prefix(UTXO_KEY_PREFIX)?
            .into_iter()
            .map(|(key, value)| {
                let txid = key[UTXO_KEY_PREFIX.len()..].to_vec();
                let outs: Vec<UnspentOutput> = deserialize(&value)?;
                Ok((txid, outs))
            })
            .collect()
    }

    /// Picks outputs owned by `pub_key_hash` until they cover `amount`.
    ///
    /// Entries are visited in ascending transaction ID order, so the same
    /// index always yields the same selection. The total may fall short of
    /// `amount`; callers decide what that means.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
        let mut unspent_outputs: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut accumulated = 0u64;

        'scan: for (txid, outs) in self.entries()? {
            let txid_hex = HEXLOWER.encode(&txid);
            for out in outs {
                if accumulated >= amount {
                    break 'scan;
                }
                if out.output.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(out.output.get_value());
                    unspent_outputs
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(out.vout);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        for (_, outs) in self.entries()? {
            utxos.extend(
                outs.into_iter()
                    .map(|out| out.output)
                    .filter(|out| out.is_locked_with_key(pub_key_hash)),
            );
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    /// Every `(txid hex, unspent outputs)` pair currently indexed.
    pub fn get_all(&self) -> Result<BTreeMap<String, Vec<UnspentOutput>>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|(txid, outs)| (HEXLOWER.encode(&txid), outs))
            .collect())
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<u64> {
        Ok(self.store().scan_prefix(UTXO_KEY_PREFIX)?.len() as u64)
    }

    /// Drops the whole index and rebuilds it from a full chain scan, in one
    /// atomic batch.
    pub fn reindex(&self) -> Result<()> {
        let store = self.store();
        let mut batch = WriteBatch::new();
        for (key, _) in store.scan_prefix(UTXO_KEY_PREFIX)? {
            batch.delete(key);
        }

        let utxo_map = self.blockchain.find_utxo()?;
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Serialization(format!("Failed to decode transaction ID: {e}"))
            })?;
            batch.put(utxo_key(&txid), serialize(outs)?);
        }
        store.write_batch(batch)?;

        info!("Reindexed UTXO set: {} transactions", utxo_map.len());
        Ok(())
    }

    /// Applies one newly committed block: retires the outputs its inputs
    /// consume and indexes the outputs it creates, coinbase included.
    pub fn update(&self, block: &Block) -> Result<()> {
        let store = self.store();
        // Staged view of the entries this block touches. `None` marks an
        // entry to delete.
        let mut staged: HashMap<Vec<u8>, Option<Vec<UnspentOutput>>> = HashMap::new();

        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let key = utxo_key(vin.get_txid());
                    let outs = match staged.remove(&key) {
                        Some(Some(outs)) => outs,
                        Some(None) => vec![],
                        None => match store.get(&key)? {
                            Some(bytes) => deserialize(&bytes)?,
                            None => vec![],
                        },
                    };

                    let spent = vin.output_index();
                    if !outs.iter().any(|out| Some(out.vout) == spent) {
                        return Err(BlockchainError::NotFound(format!(
                            "Unspent output {}:{}",
                            HEXLOWER.encode(vin.get_txid()),
                            vin.get_vout()
                        )));
                    }

                    let remaining: Vec<UnspentOutput> = outs
                        .into_iter()
                        .filter(|out| Some(out.vout) != spent)
                        .collect();
                    staged.insert(key, (!remaining.is_empty()).then_some(remaining));
                }
            }

            let new_outputs: Vec<UnspentOutput> = tx
                .get_vout()
                .iter()
                .enumerate()
                .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                .collect();
            staged.insert(
                utxo_key(tx.get_id()),
                (!new_outputs.is_empty()).then_some(new_outputs),
            );
        }

        let mut batch = WriteBatch::new();
        for (key, outs) in staged {
            match outs {
                Some(outs) => batch.put(key, serialize(&outs)?),
                None => batch.delete(key),
            }
        }
        store.write_batch(batch)?;

        debug!("Updated UTXO set with block {}", block.get_hash_hex());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, SUBSIDY};
    use crate::testnet::{create_test_blockchain, transfer};
    use crate::wallet::Wallet;

    #[test]
    fn test_reindex_genesis() {
        let (chain, miner) = create_test_blockchain().unwrap();
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();

        assert_eq!(utxo_set.count_transactions().unwrap(), 1);
        let outs = utxo_set.find_utxo(&miner.pub_key_hash()).unwrap();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].get_value(), SUBSIDY);
    }

    #[test]
    fn test_reindex_is_repeatable() {
        let (chain, _) = create_test_blockchain().unwrap();
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();
        let first = utxo_set.get_all().unwrap();
        utxo_set.reindex().unwrap();
        assert_eq!(utxo_set.get_all().unwrap(), first);
    }

    #[test]
    fn test_update_retires_spent_and_keeps_indices() {
        let (chain, miner) = create_test_blockchain().unwrap();
        let bob = Wallet::new().unwrap();
        let utxo_set = UTXOSet::new(chain.clone());
        utxo_set.reindex().unwrap();

        let tx = transfer(&chain, &miner, &bob, 40).unwrap();
        let block = chain.mine_block(&[tx.clone()]).unwrap();
        utxo_set.update(&block).unwrap();

        let bob_tx = transfer(&chain, &bob, &miner, 40).unwrap();
        let block = chain.mine_block(&[bob_tx]).unwrap();
        utxo_set.update(&block).unwrap();

        // Only the change output (index 1) of the first transfer is left.
        let all = utxo_set.get_all().unwrap();
        assert_eq!(
            all[&tx.get_id_hex()],
            vec![UnspentOutput::new(1, tx.get_vout()[1].clone())]
        );
        assert_eq!(utxo_set.get_balance(&bob.pub_key_hash()).unwrap(), 0);
        assert_eq!(utxo_set.get_balance(&miner.pub_key_hash()).unwrap(), SUBSIDY);

        let (found, selection) = utxo_set
            .find_spendable_outputs(&miner.pub_key_hash(), SUBSIDY)
            .unwrap();
        assert_eq!(found, SUBSIDY);
        assert_eq!(selection[&tx.get_id_hex()], vec![1]);
    }

    #[test]
    fn test_update_matches_reindex() {
        let (chain, miner) = create_test_blockchain().unwrap();
        let bob = Wallet::new().unwrap();
        let utxo_set = UTXOSet::new(chain.clone());
        utxo_set.reindex().unwrap();

        let reward = Transaction::new_coinbase_tx(&miner.get_address(), "").unwrap();
        let tx = transfer(&chain, &miner, &bob, 25).unwrap();
        let block = chain.mine_block(&[reward, tx]).unwrap();
        utxo_set.update(&block).unwrap();
        let incremental = utxo_set.get_all().unwrap();

        utxo_set.reindex().unwrap();
        assert_eq!(utxo_set.get_all().unwrap(), incremental);
    }

    #[test]
    fn test_update_with_unknown_input_fails_without_writing() {
        let (chain, miner) = create_test_blockchain().unwrap();
        let bob = Wallet::new().unwrap();
        let utxo_set = UTXOSet::new(chain.clone());

        // Index never built, so the spent output is missing.
        let tx = transfer(&chain, &miner, &bob, 40).unwrap();
        let block = chain.mine_block(&[tx]).unwrap();

        assert!(matches!(
            utxo_set.update(&block),
            Err(BlockchainError::NotFound(_))
        ));
        assert_eq!(utxo_set.count_transactions().unwrap(), 0);
    }

    #[test]
    fn test_spendable_outputs_may_fall_short() {
        let (chain, miner) = create_test_blockchain().unwrap();
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();

        let (found, selection) = utxo_set
            .find_spendable_outputs(&miner.pub_key_hash(), SUBSIDY + 1)
            .unwrap();
        assert_eq!(found, SUBSIDY);
        assert_eq!(selection.len(), 1);

        let stranger = Wallet::new().unwrap();
        let (found, selection) = utxo_set
            .find_spendable_outputs(&stranger.pub_key_hash(), 1)
            .unwrap();
        assert_eq!(found, 0);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_new_utxo_transaction_selects_and_returns_change() {
        let (chain, miner) = create_test_blockchain().unwrap();
        let bob = Wallet::new().unwrap();
        let utxo_set = UTXOSet::new(chain.clone());
        utxo_set.reindex().unwrap();

        let tx =
            Transaction::new_utxo_transaction(&miner, &bob.get_address(), 40, &utxo_set).unwrap();
        assert!(chain.verify_transaction(&tx).unwrap());
        assert_eq!(tx.get_vout()[0].get_value(), 40);
        assert_eq!(tx.get_vout()[1].get_value(), SUBSIDY - 40);

        assert!(matches!(
            Transaction::new_utxo_transaction(&miner, &bob.get_address(), SUBSIDY + 1, &utxo_set),
            Err(BlockchainError::InsufficientFunds {
                required: 101,
                available: 100
            })
        ));
    }
}
