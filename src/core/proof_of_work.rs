use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::debug;
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Inclusive bounds for the number of leading zero bits a block hash needs.
pub const MIN_DIFFICULTY: u32 = 1;
pub const MAX_DIFFICULTY: u32 = 255;

const MAX_NONCE: i64 = i64::MAX;

/// Brute-force nonce search over a block header.
///
/// The digest is `sha256(prev_hash ‖ merkle_root ‖ timestamp ‖ nonce ‖ difficulty)`
/// with every integer in big-endian; it is valid when, read as a big-endian
/// unsigned integer, it is strictly below `1 << (256 - difficulty)`.
pub struct ProofOfWork<'a> {
    pre_block_hash: &'a [u8],
    merkle_root: &'a [u8],
    timestamp: i64,
    difficulty: u32,
    target: BigInt,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(
        pre_block_hash: &'a [u8],
        merkle_root: &'a [u8],
        timestamp: i64,
        difficulty: u32,
    ) -> Result<ProofOfWork<'a>> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
            return Err(BlockchainError::Mining(format!(
                "Difficulty {difficulty} outside {MIN_DIFFICULTY}..={MAX_DIFFICULTY}"
            )));
        }

        let mut target = BigInt::from(1);
        target.shl_assign(256 - difficulty);
        Ok(ProofOfWork {
            pre_block_hash,
            merkle_root,
            timestamp,
            difficulty,
            target,
        })
    }

    pub fn new_proof_of_work(block: &'a Block) -> Result<ProofOfWork<'a>> {
        ProofOfWork::new(
            block.get_pre_block_hash(),
            block.get_merkle_root(),
            block.get_timestamp(),
            block.get_difficulty(),
        )
    }

    /// Recomputes the digest from the block's own header and nonce. The stored
    /// hash must equal it and must meet the target.
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block) {
            Ok(pow) => pow,
            Err(_) => return false,
        };
        let hash = sha256_digest(&pow.prepare_data(block.get_nonce()));
        hash.as_slice() == block.get_hash() && pow.meets_target(&hash)
    }

    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes =
            Vec::with_capacity(self.pre_block_hash.len() + self.merkle_root.len() + 24);
        data_bytes.extend_from_slice(self.pre_block_hash);
        data_bytes.extend_from_slice(self.merkle_root);
        data_bytes.extend(self.timestamp.to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes.extend(i64::from(self.difficulty).to_be_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    /// Searches nonces from zero upwards and returns the first `(nonce, hash)`
    /// whose hash meets the target.
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        debug!("Mining with difficulty {}", self.difficulty);
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            let hash = sha256_digest(&self.prepare_data(nonce));
            if self.meets_target(&hash) {
                debug!(
                    "Found nonce {nonce} after {} attempts: {}",
                    nonce + 1,
                    HEXLOWER.encode(&hash)
                );
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::Mining(format!(
            "No nonce below {MAX_NONCE} satisfies difficulty {}",
            self.difficulty
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREV: &[u8] = b"previous-block-hash";
    const ROOT: &[u8] = b"merkle-root-digest";

    #[test]
    fn test_run_finds_hash_below_target() {
        let pow = ProofOfWork::new(PREV, ROOT, 1_700_000_000_000, 8).unwrap();
        let (nonce, hash) = pow.run().unwrap();

        assert!(nonce >= 0);
        assert_eq!(hash.len(), 32);
        assert_eq!(hash[0], 0, "eight leading zero bits");
        assert_eq!(hash, sha256_digest(&pow.prepare_data(nonce)));
    }

    #[test]
    fn test_higher_difficulty_has_smaller_target() {
        let easy = ProofOfWork::new(PREV, ROOT, 0, 4).unwrap();
        let hard = ProofOfWork::new(PREV, ROOT, 0, 12).unwrap();
        assert!(hard.target < easy.target);
    }

    #[test]
    fn test_difficulty_out_of_range() {
        assert!(matches!(
            ProofOfWork::new(PREV, ROOT, 0, 0),
            Err(BlockchainError::Mining(_))
        ));
        assert!(ProofOfWork::new(PREV, ROOT, 0, 256).is_err());
        assert!(ProofOfWork::new(PREV, ROOT, 0, MAX_DIFFICULTY).is_ok());
    }

    #[test]
    fn test_prepare_data_layout() {
        let pow = ProofOfWork::new(PREV, ROOT, 7, 9).unwrap();
        let data = pow.prepare_data(3);

        assert_eq!(data.len(), PREV.len() + ROOT.len() + 24);
        assert!(data.starts_with(PREV));
        let tail = &data[PREV.len() + ROOT.len()..];
        assert_eq!(&tail[..8], &7i64.to_be_bytes());
        assert_eq!(&tail[8..16], &3i64.to_be_bytes());
        assert_eq!(&tail[16..], &9i64.to_be_bytes());

        assert_ne!(data, pow.prepare_data(4));
    }

    #[test]
    fn test_empty_previous_hash_is_allowed() {
        let pow = ProofOfWork::new(&[], ROOT, 0, 4).unwrap();
        assert!(pow.run().is_ok());
    }
}
