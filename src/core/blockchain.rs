// The chain is an append-only set of blocks keyed by hash, plus one pointer to
// the tip. Everything lives in whatever KeyValueStore I'm handed; every
// mutation goes through a single WriteBatch so a block and the tip pointer
// that names it always land together.

use crate::core::proof_of_work::{MAX_DIFFICULTY, MIN_DIFFICULTY};
use crate::core::{Block, ProofOfWork, Transaction, SUBSIDY};
use crate::error::{BlockchainError, Result};
use crate::storage::{KeyValueStore, UnspentOutput, WriteBatch};
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Two-byte sentinel holding the tip hash.
const TIP_BLOCK_HASH_KEY: &[u8] = b"lh";

// Block records sit under their own prefix, apart from the tip pointer and the
// `utxo-` index entries.
const BLOCK_KEY_PREFIX: &[u8] = b"b";

const GENESIS_COINBASE_DATA: &str = "First Transaction from Genesis";

pub const DEFAULT_DIFFICULTY: u32 = 16;

/// The part of the node configuration the chain itself needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    /// Leading zero bits every new block hash must have.
    pub difficulty: u32,
}

impl ChainParams {
    pub fn new(difficulty: u32) -> Result<ChainParams> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
            return Err(BlockchainError::Config(format!(
                "Difficulty must be within {MIN_DIFFICULTY}..={MAX_DIFFICULTY}, got {difficulty}"
            )));
        }
        Ok(ChainParams { difficulty })
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

#[derive(Clone)]
pub struct Blockchain {
    // The write guard doubles as the chain's mutex: mining and appending hold
    // it from reading the tip until the new tip is committed.
    tip_hash: Arc<RwLock<Vec<u8>>>,
    store: Arc<dyn KeyValueStore>,
    params: ChainParams,
}

impl Blockchain {
    /// Creates a fresh chain whose genesis reward goes to `genesis_address`.
    /// Fails with `AlreadyExists` if `store` already holds a chain.
    pub fn create_blockchain(
        store: Arc<dyn KeyValueStore>,
        genesis_address: &str,
        params: ChainParams,
    ) -> Result<Blockchain> {
        if store.contains_key(TIP_BLOCK_HASH_KEY)? {
            return Err(BlockchainError::AlreadyExists(
                "Blockchain already exists".to_string(),
            ));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_COINBASE_DATA)?;
        let genesis = Block::genesis(&coinbase_tx, params.difficulty)?;

        let mut batch = WriteBatch::new();
        batch.put(block_key(genesis.get_hash()), genesis.serialize()?);
        batch.put(TIP_BLOCK_HASH_KEY, genesis.get_hash());
        store.write_batch(batch)?;
        info!("Genesis block {} committed", genesis.get_hash_hex());

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            store,
            params,
        })
    }

    /// Opens the chain already persisted in `store`.
    pub fn continue_blockchain(
        store: Arc<dyn KeyValueStore>,
        params: ChainParams,
    ) -> Result<Blockchain> {
        let tip_hash = store.get(TIP_BLOCK_HASH_KEY)?.ok_or_else(|| {
            BlockchainError::NotFound("No existing blockchain found. Create one first.".to_string())
        })?;
        debug!("Continuing blockchain at tip {}", HEXLOWER.encode(&tip_hash));

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            store,
            params,
        })
    }

    pub fn get_store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    pub fn get_params(&self) -> ChainParams {
        self.params
    }

    fn read_tip(&self) -> Result<RwLockReadGuard<'_, Vec<u8>>> {
        self.tip_hash
            .read()
            .map_err(|_| BlockchainError::Storage("Tip lock poisoned".to_string()))
    }

    fn write_tip(&self) -> Result<RwLockWriteGuard<'_, Vec<u8>>> {
        self.tip_hash
            .write()
            .map_err(|_| BlockchainError::Storage("Tip lock poisoned".to_string()))
    }

    pub fn tip_hash(&self) -> Result<Vec<u8>> {
        Ok(self.read_tip()?.clone())
    }

    pub fn iterator(&self) -> Result<BlockchainIterator> {
        let tip = self.tip_hash()?;
        Ok(self.iterator_from(tip))
    }

    fn iterator_from(&self, tip: Vec<u8>) -> BlockchainIterator {
        BlockchainIterator::new(tip, Arc::clone(&self.store))
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Block> {
        load_block(self.store.as_ref(), block_hash)
    }

    pub fn block_exists(&self, block_hash: &[u8]) -> Result<bool> {
        self.store.contains_key(&block_key(block_hash))
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let tip = self.tip_hash()?;
        Ok(self.get_block(&tip)?.get_height())
    }

    /// Hashes of every block from the tip back to genesis.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()?
            .map(|block| block.map(|b| b.get_hash().to_vec()))
            .collect()
    }

    /// Seals `transactions` into a new block on top of the current tip.
    ///
    /// Rejects the whole set if a coinbase appears anywhere but first, if two
    /// inputs spend the same output, if an input spends an output the chain
    /// has already consumed, or if a transfer fails signature or balance
    /// checks. Nothing is written unless the block is committed.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut tip = self.write_tip()?;
        self.check_block_transactions(&tip, transactions)?;

        let next_height = self.get_block(&tip)?.get_height() + 1;
        info!(
            "Mining block at height {next_height} with {} transactions (difficulty: {})",
            transactions.len(),
            self.params.difficulty
        );
        let block = Block::new_block(&tip, transactions, next_height, self.params.difficulty)?;

        let mut batch = WriteBatch::new();
        batch.put(block_key(block.get_hash()), block.serialize()?);
        batch.put(TIP_BLOCK_HASH_KEY, block.get_hash());
        self.store.write_batch(batch)?;
        *tip = block.get_hash().to_vec();

        info!("Successfully mined block: {}", block.get_hash_hex());
        Ok(block)
    }

    fn check_block_transactions(&self, tip: &[u8], transactions: &[Transaction]) -> Result<()> {
        for (i, tx) in transactions.iter().enumerate() {
            if tx.is_coinbase() && i > 0 {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Coinbase transaction at index {i}; only the first transaction may be one"
                )));
            }
            if tx.is_coinbase() && !pays_subsidy(tx)? {
                warn!("Rejecting coinbase {}: reward is not {SUBSIDY}", tx.get_id_hex());
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Coinbase {} must pay exactly {SUBSIDY}",
                    tx.get_id_hex()
                )));
            }
        }

        // I need to catch the same output being spent twice in this block,
        // and outputs that something already on chain has consumed.
        let already_spent = self.spent_outputs_from(tip)?;
        let mut spent_in_block = HashSet::new();
        for (i, tx) in transactions.iter().enumerate() {
            if tx.is_coinbase() {
                continue;
            }

            for input in tx.get_vin() {
                let outpoint = (input.get_txid().to_vec(), input.get_vout());
                let label = format!("{}:{}", HEXLOWER.encode(input.get_txid()), input.get_vout());
                if already_spent.contains(&outpoint) {
                    warn!("Rejecting transaction {i}: output {label} is already spent");
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Input already spent: {label}"
                    )));
                }
                if !spent_in_block.insert(outpoint) {
                    warn!("Rejecting transaction {i}: output {label} spent twice in block");
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Double-spending detected in transaction {i}: output {label} already spent in this block"
                    )));
                }
            }

            let prev_txs = match self.referenced_transactions_from(tip, tx)? {
                Some(prev_txs) => prev_txs,
                None => {
                    warn!("Rejecting transaction {i}: it spends an unknown transaction");
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Transaction {} references an unknown transaction",
                        tx.get_id_hex()
                    )));
                }
            };
            if !tx.verify(&prev_txs) {
                warn!("Rejecting transaction {i}: verification failed");
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Invalid transaction at index {i}"
                )));
            }
            tx.verify_balance(&prev_txs)?;
        }
        Ok(())
    }

    /// Stores a block received from elsewhere. A block already present is a
    /// no-op; the tip moves only if the block is higher than the current tip.
    ///
    /// Only the seal is checked here, plus the height when the parent is
    /// stored. Run [`Blockchain::validate_block`] first for the full check.
    pub fn append_external_block(&self, block: &Block) -> Result<()> {
        let mut tip = self.write_tip()?;
        if self.block_exists(block.get_hash())? {
            debug!("Block {} already stored", block.get_hash_hex());
            return Ok(());
        }

        if !self.seal_is_valid(block) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} is not sealed at difficulty {}",
                block.get_hash_hex(),
                self.params.difficulty
            )));
        }
        if let Some(expected) = self.expected_height(block)? {
            if block.get_height() != expected {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {} claims height {} but its parent implies {expected}",
                    block.get_hash_hex(),
                    block.get_height()
                )));
            }
        }

        let tip_height = self.get_block(&tip)?.get_height();
        let advances_tip = block.get_height() > tip_height;

        let mut batch = WriteBatch::new();
        batch.put(block_key(block.get_hash()), block.serialize()?);
        if advances_tip {
            batch.put(TIP_BLOCK_HASH_KEY, block.get_hash());
        }
        self.store.write_batch(batch)?;

        if advances_tip {
            *tip = block.get_hash().to_vec();
            info!(
                "Appended block {} at height {}; new tip",
                block.get_hash_hex(),
                block.get_height()
            );
        } else {
            info!(
                "Stored block {} at height {} (tip stays at height {tip_height})",
                block.get_hash_hex(),
                block.get_height()
            );
        }
        Ok(())
    }

    /// Checks a block before [`Blockchain::append_external_block`]: its parent
    /// is stored and its height is one above the parent's, it is sealed at
    /// this chain's difficulty, its Merkle root holds, only its first
    /// transaction may be a coinbase and it pays exactly [`SUBSIDY`], and
    /// every transfer verifies.
    pub fn validate_block(&self, block: &Block) -> Result<bool> {
        match self.expected_height(block)? {
            None => {
                debug!("Block {} has an unknown parent", block.get_hash_hex());
                return Ok(false);
            }
            Some(expected) if block.get_height() != expected => {
                debug!(
                    "Block {} claims height {}, expected {expected}",
                    block.get_hash_hex(),
                    block.get_height()
                );
                return Ok(false);
            }
            Some(_) => {}
        }

        if !self.seal_is_valid(block) {
            return Ok(false);
        }

        if !block.verify_merkle_root()? {
            debug!("Block {} has a wrong Merkle root", block.get_hash_hex());
            return Ok(false);
        }

        for (i, tx) in block.get_transactions().iter().enumerate() {
            if tx.is_coinbase() && (i > 0 || !pays_subsidy(tx)?) {
                return Ok(false);
            }
            if !self.verify_transaction(tx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // Proof of work against this chain's difficulty, never the one the block
    // declares for itself.
    fn seal_is_valid(&self, block: &Block) -> bool {
        if block.get_difficulty() != self.params.difficulty {
            debug!(
                "Block {} declares difficulty {}, chain requires {}",
                block.get_hash_hex(),
                block.get_difficulty(),
                self.params.difficulty
            );
            return false;
        }
        if !ProofOfWork::validate(block) {
            debug!("Block {} fails proof of work", block.get_hash_hex());
            return false;
        }
        true
    }

    // Height the block must carry: zero for genesis, parent + 1 otherwise.
    // `None` when the parent is not stored.
    fn expected_height(&self, block: &Block) -> Result<Option<usize>> {
        if block.is_genesis() {
            return Ok(Some(0));
        }
        match self.get_block(block.get_pre_block_hash()) {
            Ok(parent) => Ok(Some(parent.get_height() + 1)),
            Err(BlockchainError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        let tip = self.tip_hash()?;
        self.find_transaction_from(tip, txid)
    }

    fn find_transaction_from(&self, tip: Vec<u8>, txid: &[u8]) -> Result<Transaction> {
        for block in self.iterator_from(tip) {
            let block = block?;
            if let Some(tx) = block.get_transactions().iter().find(|tx| tx.get_id() == txid) {
                return Ok(tx.clone());
            }
        }
        Err(BlockchainError::NotFound(format!(
            "Transaction {}",
            HEXLOWER.encode(txid)
        )))
    }

    // Every transaction `tx` spends from, keyed by hex ID. `None` if one of
    // them is not on the chain.
    fn referenced_transactions_from(
        &self,
        tip: &[u8],
        tx: &Transaction,
    ) -> Result<Option<HashMap<String, Transaction>>> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if prev_txs.contains_key(&txid_hex) {
                continue;
            }
            match self.find_transaction_from(tip.to_vec(), vin.get_txid()) {
                Ok(prev_tx) => {
                    prev_txs.insert(txid_hex, prev_tx);
                }
                Err(BlockchainError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Ok(Some(prev_txs))
    }

    /// Signs `tx` with `pkcs8` after looking up every transaction it spends.
    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let tip = self.tip_hash()?;
        let prev_txs = self
            .referenced_transactions_from(&tip, tx)?
            .ok_or_else(|| {
                BlockchainError::NotFound(format!(
                    "Transactions spent by {}",
                    tx.get_id_hex()
                ))
            })?;
        tx.sign(pkcs8, &prev_txs)
    }

    /// `Ok(false)` for a bad signature or a reference the chain doesn't know.
    /// Storage failures still surface as errors.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let tip = self.tip_hash()?;
        Ok(match self.referenced_transactions_from(&tip, tx)? {
            Some(prev_txs) => tx.verify(&prev_txs),
            None => false,
        })
    }

    fn spent_outputs_from(&self, tip: &[u8]) -> Result<HashSet<(Vec<u8>, i64)>> {
        let mut spent = HashSet::new();
        for block in self.iterator_from(tip.to_vec()) {
            for tx in block?.get_transactions() {
                if tx.is_coinbase() {
                    continue;
                }
                for input in tx.get_vin() {
                    spent.insert((input.get_txid().to_vec(), input.get_vout()));
                }
            }
        }
        Ok(spent)
    }

    /// Every output not consumed by a later input, keyed by hex transaction ID.
    ///
    /// Blocks are walked tip to genesis and each block's transactions last to
    /// first, so a spend is always seen before the output it consumes.
    pub fn find_utxo(&self) -> Result<BTreeMap<String, Vec<UnspentOutput>>> {
        let mut utxo: BTreeMap<String, Vec<UnspentOutput>> = BTreeMap::new();
        let mut spent_txos: HashSet<(String, usize)> = HashSet::new();

        for block in self.iterator()? {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                let txid_hex = tx.get_id_hex();
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    if spent_txos.contains(&(txid_hex.clone(), idx)) {
                        continue;
                    }
                    utxo.entry(txid_hex.clone())
                        .or_default()
                        .push(UnspentOutput::new(idx, out.clone()));
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if let Some(idx) = txin.output_index() {
                        spent_txos.insert((HEXLOWER.encode(txin.get_txid()), idx));
                    }
                }
            }
        }
        Ok(utxo)
    }
}

fn pays_subsidy(coinbase: &Transaction) -> Result<bool> {
    Ok(coinbase.get_output_value()? == SUBSIDY)
}

fn block_key(block_hash: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(BLOCK_KEY_PREFIX.len() + block_hash.len());
    key.extend_from_slice(BLOCK_KEY_PREFIX);
    key.extend_from_slice(block_hash);
    key
}

fn load_block(store: &dyn KeyValueStore, block_hash: &[u8]) -> Result<Block> {
    let bytes = store.get(&block_key(block_hash))?.ok_or_else(|| {
        BlockchainError::NotFound(format!("Block {}", HEXLOWER.encode(block_hash)))
    })?;
    Block::deserialize(&bytes)
}

/// Walks from a starting block back to genesis, one block per step.
///
/// Yields `Err` once and stops if a block cannot be loaded. A fresh iterator
/// is needed to scan again.
pub struct BlockchainIterator {
    store: Arc<dyn KeyValueStore>,
    current_hash: Option<Vec<u8>>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, store: Arc<dyn KeyValueStore>) -> BlockchainIterator {
        BlockchainIterator {
            store,
            current_hash: Some(tip_hash),
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        match load_block(self.store.as_ref(), &hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.get_pre_block_hash().to_vec());
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
