//! Utility functions and helpers
//!
//! Hashing, signing, the deterministic encodings that feed them, and the
//! bincode wrapper used for everything persisted.

pub mod crypto;
pub mod encoding;
pub mod serialization;

pub use crypto::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, public_key_from_pkcs8, ripemd160_digest, sha256_digest,
};
pub use encoding::{
    base58_decode, base58_encode, base58check_decode, base58check_encode, checksum,
    int_to_be_bytes, CHECKSUM_LEN,
};
pub use serialization::{deserialize, serialize};
