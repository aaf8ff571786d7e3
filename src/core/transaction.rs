// Transactions follow the UTXO model: each one consumes earlier outputs and
// creates new ones. Ownership of an output is proven by an ECDSA signature over
// a canonical copy of the spending transaction.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    public_key_from_pkcs8, serialize, sha256_digest,
};
use crate::wallet::{convert_address, decode_address, hash_pub_key, Wallet};
use data_encoding::HEXLOWER;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Reward paid by every coinbase transaction.
pub const SUBSIDY: u64 = 100;

/// Output index carried by the single input of a coinbase transaction.
pub const COINBASE_VOUT: i64 = -1;

// A reference to an earlier output plus the proof that the spender owns it.
// For a coinbase input the reference is empty and `signature` carries the memo.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    /// Unsigned input spending output `vout` of transaction `txid`.
    pub fn new(txid: &[u8], vout: usize) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout: vout as i64,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// Output index as a position, `None` for the coinbase marker.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

// Value locked to the hash of a public key.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// Output paying `value` to `address`. Fails with `InvalidAddress` when the
    /// address does not decode.
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let pub_key_hash = decode_address(address)?;
        Ok(TXOutput::locked_to(value, &pub_key_hash))
    }

    pub fn locked_to(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Reward transaction paying [`SUBSIDY`] to `to`. An empty memo is replaced
    /// by a random one so that two rewards to the same address get distinct IDs.
    pub fn new_coinbase_tx(to: &str, memo: &str) -> Result<Transaction> {
        let txout = TXOutput::new(SUBSIDY, to)?;
        let memo = if memo.is_empty() {
            format!("Reward to {to} ({})", Uuid::new_v4())
        } else {
            memo.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: memo.into_bytes(),
            pub_key: vec![],
        };

        Transaction::from_parts(vec![tx_input], vec![txout])
    }

    /// Assembles a transaction and assigns its ID. Inputs are left unsigned.
    pub fn from_parts(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.trimmed_copy().hash()?;
        Ok(tx)
    }

    /// Pays `amount` from `wallet` to `to`, drawing on outputs reported by
    /// `utxo_set` and returning any surplus to the sender. The result is signed.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }

        let recipient = TXOutput::new(amount, to)?;
        let pub_key_hash = wallet.pub_key_hash();

        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(pub_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Serialization(format!("Invalid transaction ID {txid_hex}: {e}"))
            })?;
            for out in outs {
                let mut input = TXInput::new(&txid, out);
                input.pub_key = wallet.get_public_key().to_vec();
                inputs.push(input);
            }
        }

        let mut outputs = vec![recipient];
        if accumulated > amount {
            outputs.push(TXOutput::locked_to(
                accumulated - amount,
                pub_key_hash.as_slice(),
            ));
        }

        let mut tx = Transaction::from_parts(inputs, outputs)?;
        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    // Copy with every unlocking field cleared. The coinbase memo is content,
    // not a proof, so it stays.
    fn trimmed_copy(&self) -> Transaction {
        if self.is_coinbase() {
            return Transaction {
                id: vec![],
                vin: self.vin.clone(),
                vout: self.vout.clone(),
            };
        }

        let vin = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();
        Transaction {
            id: vec![],
            vin,
            vout: self.vout.clone(),
        }
    }

    fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    // Digest signed for input `idx`: the trimmed copy with that input's key
    // slot holding the locking hash of the output it spends.
    fn signing_digest(trimmed: &mut Transaction, idx: usize, locking: &[u8]) -> Result<Vec<u8>> {
        trimmed.vin[idx].pub_key = locking.to_vec();
        let digest = trimmed.hash();
        trimmed.vin[idx].pub_key = vec![];
        digest
    }

    fn referenced_output<'a>(
        input: &TXInput,
        prev_txs: &'a HashMap<String, Transaction>,
    ) -> Option<&'a TXOutput> {
        let prev_tx = prev_txs.get(&HEXLOWER.encode(input.get_txid()))?;
        prev_tx.vout.get(input.output_index()?)
    }

    /// Signs every input with `pkcs8`. `prev_txs` maps hex transaction IDs to
    /// the transactions the inputs spend from. Coinbase transactions are left
    /// untouched.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let public_key = public_key_from_pkcs8(pkcs8)?;
        let signer_hash = hash_pub_key(&public_key);
        let mut tx_copy = self.trimmed_copy();

        for (idx, vin) in self.vin.iter_mut().enumerate() {
            let prev_out = Self::referenced_output(vin, prev_txs).ok_or_else(|| {
                BlockchainError::NotFound(format!(
                    "Output {}:{} referenced by input {idx}",
                    HEXLOWER.encode(vin.get_txid()),
                    vin.vout
                ))
            })?;

            if !prev_out.is_locked_with_key(&signer_hash) {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Input {idx} spends an output the signing key does not own"
                )));
            }

            let digest = Self::signing_digest(&mut tx_copy, idx, prev_out.get_pub_key_hash())?;
            vin.signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
            vin.pub_key = public_key.clone();
        }
        debug!("Signed transaction {}", HEXLOWER.encode(&self.id));
        Ok(())
    }

    /// Checks every input's signature against the key that owns the output it
    /// spends. Any missing reference, foreign key or bad signature yields false.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> bool {
        if self.is_coinbase() {
            return true;
        }

        if self.vin.is_empty() {
            warn!("Transaction {} has no inputs", HEXLOWER.encode(&self.id));
            return false;
        }

        let mut tx_copy = self.trimmed_copy();
        match tx_copy.hash() {
            Ok(id) if id == self.id => {}
            _ => {
                warn!(
                    "Transaction {} does not match its content",
                    HEXLOWER.encode(&self.id)
                );
                return false;
            }
        }

        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_out = match Self::referenced_output(vin, prev_txs) {
                Some(out) => out,
                None => {
                    warn!("Input {idx} references an unknown output");
                    return false;
                }
            };

            if !vin.uses_key(prev_out.get_pub_key_hash()) {
                warn!("Input {idx} is not signed by the output owner");
                return false;
            }

            let digest = match Self::signing_digest(&mut tx_copy, idx, prev_out.get_pub_key_hash())
            {
                Ok(digest) => digest,
                Err(_) => return false,
            };

            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                digest.as_slice(),
            ) {
                warn!("Input {idx} carries an invalid signature");
                return false;
            }
        }
        true
    }

    /// Without fees, the value consumed must equal the value created.
    pub fn verify_balance(&self, prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut input_value = 0u64;
        for vin in &self.vin {
            let prev_out = Self::referenced_output(vin, prev_txs).ok_or_else(|| {
                BlockchainError::InvalidTransaction(format!(
                    "Unknown output {}:{}",
                    HEXLOWER.encode(vin.get_txid()),
                    vin.vout
                ))
            })?;
            input_value = input_value
                .checked_add(prev_out.get_value())
                .ok_or_else(|| {
                    BlockchainError::InvalidTransaction("Input value overflow".to_string())
                })?;
        }

        let output_value = self.get_output_value()?;
        if input_value != output_value {
            return Err(BlockchainError::InvalidTransaction(format!(
                "Inputs worth {input_value} but outputs worth {output_value}"
            )));
        }
        Ok(())
    }

    pub fn get_output_value(&self) -> Result<u64> {
        self.vout.iter().try_fold(0u64, |total, out| {
            total.checked_add(out.get_value()).ok_or_else(|| {
                BlockchainError::InvalidTransaction("Output value overflow".to_string())
            })
        })
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_hex(&self) -> String {
        HEXLOWER.encode(&self.id)
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.get_id_hex())?;
        for (idx, input) in self.vin.iter().enumerate() {
            writeln!(f, "     Input {idx}:")?;
            writeln!(f, "       TXID:      {}", HEXLOWER.encode(&input.txid))?;
            writeln!(f, "       Out:       {}", input.vout)?;
            if self.is_coinbase() {
                writeln!(
                    f,
                    "       Memo:      {}",
                    String::from_utf8_lossy(&input.signature)
                )?;
            } else {
                writeln!(f, "       Signature: {}", HEXLOWER.encode(&input.signature))?;
                writeln!(f, "       PubKey:    {}", HEXLOWER.encode(&input.pub_key))?;
            }
        }
        for (idx, output) in self.vout.iter().enumerate() {
            writeln!(f, "     Output {idx}:")?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       To:     {}", convert_address(&output.pub_key_hash))?;
        }
        Ok(())
    }
}
