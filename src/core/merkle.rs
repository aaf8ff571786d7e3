use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use serde::{Deserialize, Serialize};

/// Binary hash tree over an ordered list of leaves.
///
/// Every leaf is hashed once; each parent is `sha256(left ‖ right)`; a level
/// with an odd number of nodes pairs its last node with itself. An empty leaf
/// list has the hash of the empty string as its root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    // levels[0] holds the leaf hashes, the last level holds the root
    levels: Vec<Vec<Vec<u8>>>,
    leaf_count: usize,
}

/// Merkle proof for transaction verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Hash of the leaf being proven
    pub leaf_hash: Vec<u8>,
    /// Merkle root hash
    pub merkle_root: Vec<u8>,
    /// Sibling hashes from the leaf level upwards
    pub proof_path: Vec<ProofElement>,
    /// Index of the transaction in the block
    pub transaction_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofElement {
    /// Sibling hash
    pub hash: Vec<u8>,
    /// Direction: true if sibling is on the right, false if on the left
    pub is_right: bool,
}

impl MerkleTree {
    /// Builds the tree over raw leaf data (one entry per leaf, in order).
    pub fn new(leaves: &[Vec<u8>]) -> MerkleTree {
        let leaf_hashes: Vec<Vec<u8>> = leaves.iter().map(|leaf| sha256_digest(leaf)).collect();
        let leaf_count = leaf_hashes.len();

        if leaf_hashes.is_empty() {
            return MerkleTree {
                levels: vec![vec![sha256_digest(&[])]],
                leaf_count,
            };
        }

        let mut levels = vec![leaf_hashes];
        while let Some(current) = levels.last() {
            if current.len() == 1 {
                break;
            }
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => Self::hash_pair(left, right),
                    [single] => Self::hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        MerkleTree { levels, leaf_count }
    }

    /// Builds the tree over the serialized form of each transaction.
    pub fn from_transactions(transactions: &[Transaction]) -> Result<MerkleTree> {
        let leaves = transactions
            .iter()
            .map(Transaction::serialize)
            .collect::<Result<Vec<_>>>()?;
        Ok(MerkleTree::new(&leaves))
    }

    /// Calculate the Merkle root without keeping the tree around
    pub fn calculate_merkle_root(leaves: &[Vec<u8>]) -> Vec<u8> {
        MerkleTree::new(leaves).root_hash()
    }

    pub fn root_hash(&self) -> Vec<u8> {
        self.levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_else(|| sha256_digest(&[]))
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Generate a Merkle proof for the leaf at the given index
    pub fn generate_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        if transaction_index >= self.leaf_count {
            return Err(BlockchainError::InvalidBlock(format!(
                "Transaction index {transaction_index} out of bounds ({} leaves)",
                self.leaf_count
            )));
        }

        let mut proof_path = Vec::new();
        let mut index = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
            // An unpaired last node is its own sibling.
            let sibling = level.get(sibling_index).unwrap_or(&level[index]);
            proof_path.push(ProofElement {
                hash: sibling.clone(),
                is_right: index % 2 == 0,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: self.levels[0][transaction_index].clone(),
            merkle_root: self.root_hash(),
            proof_path,
            transaction_index,
        })
    }

    /// Verify a Merkle proof
    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let mut current_hash = proof.leaf_hash.clone();

        for element in &proof.proof_path {
            current_hash = if element.is_right {
                Self::hash_pair(&current_hash, &element.hash)
            } else {
                Self::hash_pair(&element.hash, &current_hash)
            };
        }

        current_hash == proof.merkle_root
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}
