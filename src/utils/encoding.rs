//! Byte encodings used for hashing and addresses.

use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;

/// Length of the Base58Check checksum suffix.
pub const CHECKSUM_LEN: usize = 4;

/// Big-endian encoding of a signed 64-bit integer.
pub fn int_to_be_bytes(num: i64) -> [u8; 8] {
    num.to_be_bytes()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// First four bytes of `sha256(sha256(payload))`.
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    let first = sha256_digest(payload);
    let second = sha256_digest(&first);
    second[..CHECKSUM_LEN].to_vec()
}

/// `base58(version ‖ payload ‖ checksum(version ‖ payload))`
pub fn base58check_encode(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len() + CHECKSUM_LEN);
    data.push(version);
    data.extend_from_slice(payload);
    let check = checksum(&data);
    data.extend(check);
    base58_encode(&data)
}

/// Splits a Base58Check string into its version byte and payload.
pub fn base58check_decode(encoded: &str) -> Result<(u8, Vec<u8>)> {
    let data = base58_decode(encoded)?;
    if data.len() < CHECKSUM_LEN + 1 {
        return Err(BlockchainError::InvalidAddress(format!(
            "{encoded}: too short"
        )));
    }

    let (body, actual) = data.split_at(data.len() - CHECKSUM_LEN);
    if checksum(body) != actual {
        return Err(BlockchainError::InvalidAddress(format!(
            "{encoded}: checksum mismatch"
        )));
    }

    Ok((body[0], body[1..].to_vec()))
}
