//! Transactions: input/output records, spend construction, and the
//! trimmed-copy signing and verification protocol.
//!
//! A transaction id is the SHA-256 of the record serialized with its id
//! field zeroed. Signing reproduces, per input, the exact preimage a
//! verifier will rebuild: every input's signature and public key are
//! cleared, the one input being signed temporarily carries the public-key
//! hash of the output it spends, and the id of that trimmed copy is what
//! ECDSA signs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::{self, signatures, Hash};
use crate::database::UtxoSet;
use crate::error::{Error, Result};
use crate::wallet::{self, Wallet};

/// Units minted by a coinbase transaction.
pub const INIT_REWARD: u64 = 50;

/// Output index carried by a coinbase input.
pub const COINBASE_VOUT: i32 = -1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxInput {
    /// Id of the transaction whose output is being spent; zero for coinbase.
    pub txid: Hash,
    /// Index of that output; `COINBASE_VOUT` for coinbase.
    pub vout: i32,
    /// r||s signature over the trimmed-copy id; empty until signed.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    /// X||Y public key of the spender, or arbitrary coinbase data.
    #[serde(with = "serde_bytes")]
    pub pub_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxOutput {
    pub value: u64,
    /// RIPEMD160(SHA256(pubkey)) the output is locked to.
    #[serde(with = "serde_bytes")]
    pub pub_key_hash: Vec<u8>,
}

impl TxOutput {
    /// Creates an output of `value` locked to `address`.
    pub fn new(value: u64, address: &str) -> Result<Self> {
        Ok(TxOutput {
            value,
            pub_key_hash: wallet::pub_key_hash_from_address(address)?,
        })
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Hash,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

impl Transaction {
    /// Builds and signs a spend of `amount` from the wallet's address to
    /// `to`, selecting unspent outputs through the UTXO index. A change
    /// output returns any surplus to the sender.
    pub fn new_utxo(wallet: &Wallet, to: &str, amount: u64, utxo_set: &UtxoSet) -> Result<Self> {
        let pub_key_hash = crypto::hash_pub_key(&wallet.public_key);
        let (accumulated, spendable) = utxo_set.find_spendable_outputs(&pub_key_hash, amount)?;
        if accumulated < amount {
            return Err(Error::InsufficientFunds {
                available: accumulated,
                required: amount,
            });
        }

        let mut vin = Vec::new();
        for (txid, outs) in spendable {
            for out_idx in outs {
                vin.push(TxInput {
                    txid,
                    vout: out_idx as i32,
                    signature: Vec::new(),
                    pub_key: wallet.public_key.clone(),
                });
            }
        }

        let mut vout = vec![TxOutput::new(amount, to)?];
        if accumulated > amount {
            vout.push(TxOutput {
                value: accumulated - amount,
                pub_key_hash: pub_key_hash.clone(),
            });
        }

        let mut tx = Transaction {
            id: Hash::zero(),
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        utxo_set.chain().sign_transaction(&mut tx, wallet)?;
        Ok(tx)
    }

    /// Builds a coinbase minting `INIT_REWARD` to `to`. `data` rides in the
    /// input's public-key field; empty defaults to a reward note.
    pub fn new_coinbase(to: &str, data: &str) -> Result<Self> {
        let data = if data.is_empty() {
            format!("Reward to '{}'", to)
        } else {
            data.to_string()
        };

        let mut tx = Transaction {
            id: Hash::zero(),
            vin: vec![TxInput {
                txid: Hash::zero(),
                vout: COINBASE_VOUT,
                signature: Vec::new(),
                pub_key: data.into_bytes(),
            }],
            vout: vec![TxOutput::new(INIT_REWARD, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_zero() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the transaction serialized with its id zeroed.
    pub fn hash(&self) -> Result<Hash> {
        let mut copy = self.clone();
        copy.id = Hash::zero();
        Ok(crypto::sha256(&copy.serialize()?))
    }

    /// Copy with every input's signature and public key cleared; the shared
    /// skeleton both signer and verifier hash.
    fn trimmed_copy(&self) -> Transaction {
        let vin = self
            .vin
            .iter()
            .map(|input| TxInput {
                txid: input.txid,
                vout: input.vout,
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();

        Transaction {
            id: self.id,
            vin,
            vout: self.vout.clone(),
        }
    }

    /// Signs every input against the outputs it spends. `prev_txs` must
    /// contain each referenced transaction, keyed by id.
    pub fn sign(&mut self, secret_key: &[u8], prev_txs: &HashMap<Hash, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for input in &self.vin {
            if !prev_txs.contains_key(&input.txid) {
                return Err(Error::DanglingInput(input.txid));
            }
        }

        let mut tx_copy = self.trimmed_copy();
        for i in 0..self.vin.len() {
            let prev_tx = &prev_txs[&tx_copy.vin[i].txid];
            let ref_out = prev_tx
                .vout
                .get(tx_copy.vin[i].vout as usize)
                .ok_or_else(|| Error::DanglingInput(tx_copy.vin[i].txid))?;

            tx_copy.vin[i].signature = Vec::new();
            tx_copy.vin[i].pub_key = ref_out.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[i].pub_key = Vec::new();

            self.vin[i].signature = signatures::sign(secret_key, tx_copy.id.as_bytes())?;
        }
        Ok(())
    }

    /// Re-derives each input's signed preimage and checks its ECDSA
    /// signature. Coinbases verify trivially.
    pub fn verify(&self, prev_txs: &HashMap<Hash, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for input in &self.vin {
            if !prev_txs.contains_key(&input.txid) {
                return Err(Error::DanglingInput(input.txid));
            }
        }

        let mut tx_copy = self.trimmed_copy();
        for (i, input) in self.vin.iter().enumerate() {
            let prev_tx = &prev_txs[&input.txid];
            let ref_out = prev_tx
                .vout
                .get(input.vout as usize)
                .ok_or_else(|| Error::DanglingInput(input.txid))?;

            tx_copy.vin[i].signature = Vec::new();
            tx_copy.vin[i].pub_key = ref_out.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[i].pub_key = Vec::new();

            if !signatures::verify(&input.pub_key, tx_copy.id.as_bytes(), &input.signature)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
