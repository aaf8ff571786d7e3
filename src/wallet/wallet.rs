use crate::error::{BlockchainError, Result};
use crate::utils::{
    base58check_decode, base58check_encode, new_key_pair, public_key_from_pkcs8,
    ripemd160_digest, sha256_digest,
};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION: u8 = 0x00;
const PUB_KEY_HASH_LEN: usize = 20;

/// Key pair owned by a single participant. The PKCS#8 document is wiped from
/// memory when the wallet is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        Self::from_pkcs8(pkcs8)
    }

    /// Rebuilds a wallet from stored key material, re-deriving the public key.
    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Wallet> {
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    /// `base58check(version ‖ ripemd160(sha256(public_key)))`
    pub fn get_address(&self) -> String {
        convert_address(&self.pub_key_hash())
    }

    pub fn pub_key_hash(&self) -> Vec<u8> {
        hash_pub_key(&self.public_key)
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.get_address())
            .finish_non_exhaustive()
    }
}

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    ripemd160_digest(&sha256_digest(pub_key))
}

pub fn convert_address(pub_key_hash: &[u8]) -> String {
    base58check_encode(VERSION, pub_key_hash)
}

/// Extracts the public key hash an address locks to.
pub fn decode_address(address: &str) -> Result<Vec<u8>> {
    let (version, pub_key_hash) = base58check_decode(address)?;
    if version != VERSION {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: unknown version byte {version:#04x}"
        )));
    }
    if pub_key_hash.len() != PUB_KEY_HASH_LEN {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: payload is {} bytes",
            pub_key_hash.len()
        )));
    }
    Ok(pub_key_hash)
}

pub fn validate_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_has_valid_address() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();

        assert!(validate_address(&address));
        assert_eq!(decode_address(&address).unwrap(), wallet.pub_key_hash());
    }

    #[test]
    fn test_address_is_deterministic() {
        let wallet = Wallet::new().unwrap();
        let restored = Wallet::from_pkcs8(wallet.get_pkcs8().to_vec()).unwrap();

        assert_eq!(wallet.get_public_key(), restored.get_public_key());
        assert_eq!(wallet.get_address(), restored.get_address());
    }

    #[test]
    fn test_well_known_address_validates() {
        assert!(validate_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
    }

    #[test]
    fn test_tampered_address_is_rejected() {
        let address = Wallet::new().unwrap().get_address();
        let mut chars: Vec<char> = address.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered: String = chars.into_iter().collect();

        assert!(!validate_address(&tampered));
        assert!(matches!(
            decode_address(&tampered),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let wallet = Wallet::new().unwrap();
        let rendered = format!("{wallet:?}");
        assert!(rendered.contains(&wallet.get_address()));
        assert!(!rendered.contains("pkcs8"));
    }
}
