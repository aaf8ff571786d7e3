use crate::core::{MerkleProof, MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: Vec<u8>, // empty for genesis
    hash: Vec<u8>,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
    difficulty: u32,
    merkle_root: Vec<u8>,
}

impl Block {
    /// Seals `transactions` on top of `pre_block_hash`: computes the Merkle
    /// root, stamps the current time and runs proof of work.
    pub fn new_block(
        pre_block_hash: &[u8],
        transactions: &[Transaction],
        height: usize,
        difficulty: u32,
    ) -> Result<Block> {
        let timestamp = current_timestamp()?;
        Block::seal_at(timestamp, pre_block_hash, transactions, height, difficulty)
    }

    pub fn genesis(coinbase: &Transaction, difficulty: u32) -> Result<Block> {
        Block::new_block(&[], std::slice::from_ref(coinbase), 0, difficulty)
    }

    fn seal_at(
        timestamp: i64,
        pre_block_hash: &[u8],
        transactions: &[Transaction],
        height: usize,
        difficulty: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let merkle_root = MerkleTree::from_transactions(transactions)?.root_hash();

        let mut block = Block {
            timestamp,
            pre_block_hash: pre_block_hash.to_vec(),
            hash: vec![],
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
            difficulty,
            merkle_root,
        };

        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block)?.run()?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Sealed block {} at height {height} (difficulty {difficulty}, nonce {nonce})",
            block.get_hash_hex()
        );

        Ok(block)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_merkle_root(&self) -> &[u8] {
        &self.merkle_root
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    /// Verify that the block's Merkle root matches its transactions
    pub fn verify_merkle_root(&self) -> Result<bool> {
        let calculated_root = MerkleTree::from_transactions(&self.transactions)?.root_hash();
        Ok(calculated_root == self.merkle_root)
    }

    /// Generate a Merkle proof for a transaction in this block
    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::from_transactions(&self.transactions)?.generate_proof(transaction_index)
    }

    /// Verify a Merkle proof against this block's Merkle root
    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> bool {
        proof.merkle_root == self.merkle_root && MerkleTree::verify_proof(proof)
    }
}

// Header, a fresh proof-of-work and Merkle check, then every transaction.
impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============ Block {} ============", self.get_hash_hex())?;
        writeln!(f, "Height:      {}", self.height)?;
        writeln!(f, "Prev. hash:  {}", HEXLOWER.encode(&self.pre_block_hash))?;
        writeln!(f, "Timestamp:   {}", self.timestamp)?;
        writeln!(f, "Nonce:       {}", self.nonce)?;
        writeln!(f, "Difficulty:  {}", self.difficulty)?;
        writeln!(f, "PoW:         {}", ProofOfWork::validate(self))?;
        writeln!(
            f,
            "Merkle root: {}",
            self.verify_merkle_root().unwrap_or(false)
        )?;
        for tx in &self.transactions {
            write!(f, "{tx}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    const DIFFICULTY: u32 = 8;

    fn coinbase(memo: &str) -> Transaction {
        let address = Wallet::new().unwrap().get_address();
        Transaction::new_coinbase_tx(&address, memo).unwrap()
    }

    #[test]
    fn test_genesis_block() {
        let block = Block::genesis(&coinbase("genesis"), DIFFICULTY).unwrap();

        assert!(block.is_genesis());
        assert_eq!(block.get_height(), 0);
        assert_eq!(block.get_transactions().len(), 1);
        assert!(ProofOfWork::validate(&block));
        assert!(block.verify_merkle_root().unwrap());
    }

    #[test]
    fn test_empty_block_is_rejected() {
        assert!(matches!(
            Block::new_block(b"parent", &[], 1, DIFFICULTY),
            Err(BlockchainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_serialization_round_trip_keeps_hash() {
        let block = Block::new_block(b"parent", &[coinbase("a"), coinbase("b")], 3, DIFFICULTY)
            .unwrap();

        let restored = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(restored, block);
        assert_eq!(restored.get_hash(), block.get_hash());
        assert!(ProofOfWork::validate(&restored));
    }

    #[test]
    fn test_validate_ignores_forged_hash() {
        let block = Block::genesis(&coinbase("genesis"), DIFFICULTY).unwrap();

        let mut forged = block.clone();
        forged.nonce += 1;
        assert!(!ProofOfWork::validate(&forged));

        let mut forged = block.clone();
        forged.timestamp += 1;
        assert!(!ProofOfWork::validate(&forged));

        let mut forged = block;
        forged.hash = vec![0; 32];
        assert!(!ProofOfWork::validate(&forged));
    }

    #[test]
    fn test_tampered_transactions_break_merkle_root() {
        let mut block =
            Block::new_block(b"parent", &[coinbase("a"), coinbase("b")], 1, DIFFICULTY).unwrap();
        block.transactions.swap(0, 1);
        assert!(!block.verify_merkle_root().unwrap());
    }

    #[test]
    fn test_merkle_proof_for_each_transaction() {
        let txs = vec![coinbase("a"), coinbase("b"), coinbase("c")];
        let block = Block::new_block(b"parent", &txs, 1, DIFFICULTY).unwrap();

        for index in 0..txs.len() {
            let proof = block.generate_merkle_proof(index).unwrap();
            assert!(block.verify_merkle_proof(&proof));
        }
        assert!(block.generate_merkle_proof(txs.len()).is_err());
    }

    #[test]
    fn test_display_rechecks_proof_of_work() {
        let block = Block::genesis(&coinbase("genesis"), DIFFICULTY).unwrap();
        let printed = block.to_string();
        assert!(printed.contains("PoW:         true"));
        assert!(printed.contains("Merkle root: true"));
        assert!(printed.contains("Memo:      genesis"));

        let mut forged = block;
        forged.nonce += 1;
        assert!(forged.to_string().contains("PoW:         false"));
    }

    #[test]
    fn test_seal_is_reproducible_for_fixed_timestamp() {
        let txs = vec![coinbase("fixed")];
        let first = Block::seal_at(42, b"parent", &txs, 1, DIFFICULTY).unwrap();
        let second = Block::seal_at(42, b"parent", &txs, 1, DIFFICULTY).unwrap();
        assert_eq!(first.get_hash(), second.get_hash());
        assert_eq!(first.get_nonce(), second.get_nonce());
    }
}
