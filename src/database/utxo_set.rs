//! The UTXO index: a secondary `chainstate` tree mapping transaction id to
//! that transaction's surviving outputs.
//!
//! Entries keep their original output indices (a BTreeMap keyed by index),
//! so spending output 1 of a three-output transaction leaves outputs 0 and 2
//! addressable under their original numbers, and the encoding stays
//! canonical for byte-level comparison against a fresh reindex.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;

use crate::blockchain::{Block, Blockchain, TxOutput};
use crate::crypto::Hash;
use crate::database::CHAINSTATE_TREE;
use crate::error::{Error, Result};

/// Surviving outputs of one transaction, keyed by original output index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TxOutputs {
    pub outputs: BTreeMap<u32, TxOutput>,
}

impl TxOutputs {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Read/write access to the persistent UTXO index of one chain.
#[derive(Clone)]
pub struct UtxoSet {
    chain: Arc<Blockchain>,
    tree: sled::Tree,
}

impl UtxoSet {
    pub fn new(chain: Arc<Blockchain>) -> Result<Self> {
        let tree = chain.database().open_tree(CHAINSTATE_TREE)?;
        Ok(UtxoSet { chain, tree })
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    /// Drops the index and rebuilds it from a full chain scan. The rebuilt
    /// entries land in one atomic batch.
    pub fn reindex(&self) -> Result<()> {
        self.tree.clear()?;

        let utxo = self.chain.find_utxo_map()?;
        let mut batch = sled::Batch::default();
        for (txid, outs) in &utxo {
            batch.insert(&txid.0[..], outs.serialize()?);
        }
        self.tree.apply_batch(batch)?;
        self.chain.database().flush()?;

        info!("reindexed UTXO set: {} transactions with unspent outputs", utxo.len());
        Ok(())
    }

    /// Applies one block's spends and new outputs in a single transaction;
    /// the index is never observable half-updated.
    pub fn update(&self, block: &Block) -> Result<()> {
        self.tree
            .transaction(
                |t| -> sled::transaction::ConflictableTransactionResult<(), Error> {
                    for tx in &block.transactions {
                        if !tx.is_coinbase() {
                            for input in &tx.vin {
                                let raw = t.get(&input.txid.0[..])?.ok_or_else(|| {
                                    ConflictableTransactionError::Abort(Error::DanglingInput(
                                        input.txid,
                                    ))
                                })?;
                                let mut outs = TxOutputs::deserialize(&raw)
                                    .map_err(ConflictableTransactionError::Abort)?;

                                outs.outputs.remove(&(input.vout as u32));
                                if outs.outputs.is_empty() {
                                    t.remove(&input.txid.0[..])?;
                                } else {
                                    t.insert(
                                        &input.txid.0[..],
                                        outs.serialize()
                                            .map_err(ConflictableTransactionError::Abort)?,
                                    )?;
                                }
                            }
                        }

                        let mut fresh = TxOutputs::default();
                        for (idx, out) in tx.vout.iter().enumerate() {
                            fresh.outputs.insert(idx as u32, out.clone());
                        }
                        t.insert(
                            &tx.id.0[..],
                            fresh.serialize().map_err(ConflictableTransactionError::Abort)?,
                        )?;
                    }
                    Ok(())
                },
            )
            .map_err(Error::from)?;
        self.chain.database().flush()?;
        Ok(())
    }

    /// Accumulates outputs locked to `pub_key_hash` until their sum reaches
    /// `amount`. Returns the total gathered and the selected output indices
    /// per transaction.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<Hash, Vec<u32>>)> {
        let mut unspent: HashMap<Hash, Vec<u32>> = HashMap::new();
        let mut accumulated = 0u64;

        for item in self.tree.iter() {
            let (key, value) = item?;
            let Some(txid) = Hash::from_slice(&key) else {
                continue;
            };
            let outs = TxOutputs::deserialize(&value)?;

            for (&out_idx, out) in &outs.outputs {
                if out.is_locked_with_key(pub_key_hash) && accumulated < amount {
                    accumulated += out.value;
                    unspent.entry(txid).or_default().push(out_idx);
                }
            }
        }

        Ok((accumulated, unspent))
    }

    /// Every unspent output locked to `pub_key_hash`.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut utxos = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item?;
            let outs = TxOutputs::deserialize(&value)?;
            for out in outs.outputs.values() {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.push(out.clone());
                }
            }
        }
        Ok(utxos)
    }

    /// Snapshot of the raw index contents, in key order.
    pub fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Transaction, INIT_REWARD};
    use crate::config::NodeConfig;
    use crate::crypto::hash_pub_key;
    use crate::wallet::Wallet;
    use tempfile::TempDir;

    const EASY_BITS: u32 = 8;

    struct Fixture {
        _dir: TempDir,
        utxo: UtxoSet,
        w1: Wallet,
        w2: Wallet,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let cfg = NodeConfig::new("7100")
            .with_data_dir(dir.path())
            .with_target_bits(EASY_BITS);
        let w1 = Wallet::new();
        let w2 = Wallet::new();
        let chain = Arc::new(Blockchain::create(&cfg, &w1.address()).unwrap());
        let utxo = UtxoSet::new(chain).unwrap();
        utxo.reindex().unwrap();
        Fixture {
            _dir: dir,
            utxo,
            w1,
            w2,
        }
    }

    fn balance(utxo: &UtxoSet, wallet: &Wallet) -> u64 {
        utxo.find_utxo(&hash_pub_key(&wallet.public_key))
            .unwrap()
            .iter()
            .map(|o| o.value)
            .sum()
    }

    /// Mines a signed spend of `amount` from w1 to w2 and updates the index.
    fn spend(f: &Fixture, amount: u64) -> Block {
        let tx = Transaction::new_utxo(&f.w1, &f.w2.address(), amount, &f.utxo).unwrap();
        let coinbase = Transaction::new_coinbase(&f.w1.address(), "").unwrap();
        let block = f.utxo.chain().mine_block(vec![tx, coinbase]).unwrap();
        f.utxo.update(&block).unwrap();
        block
    }

    #[test]
    fn test_genesis_reindex_mints_initial_reward() {
        let f = fixture();
        let outputs = f.utxo.find_utxo(&hash_pub_key(&f.w1.public_key)).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].value, INIT_REWARD);
        assert_eq!(balance(&f.utxo, &f.w2), 0);
    }

    #[test]
    fn test_spend_updates_balances() {
        let f = fixture();
        spend(&f, 10);

        // 50 - 10 change + 50 fresh coinbase for the miner.
        assert_eq!(balance(&f.utxo, &f.w1), 40 + INIT_REWARD);
        assert_eq!(balance(&f.utxo, &f.w2), 10);
        assert_eq!(f.utxo.chain().get_best_height().unwrap(), 1);
    }

    #[test]
    fn test_insufficient_funds_leaves_state_alone() {
        let f = fixture();
        spend(&f, 10);

        let before = f.utxo.dump().unwrap();
        let height_before = f.utxo.chain().get_best_height().unwrap();

        let result = Transaction::new_utxo(&f.w2, &f.w1.address(), 11, &f.utxo);
        assert!(matches!(
            result,
            Err(Error::InsufficientFunds {
                available: 10,
                required: 11
            })
        ));
        assert_eq!(f.utxo.dump().unwrap(), before);
        assert_eq!(f.utxo.chain().get_best_height().unwrap(), height_before);
    }

    #[test]
    fn test_update_matches_fresh_reindex() {
        let f = fixture();
        spend(&f, 10);
        spend(&f, 25);

        let incremental = f.utxo.dump().unwrap();
        f.utxo.reindex().unwrap();
        assert_eq!(f.utxo.dump().unwrap(), incremental);
    }

    #[test]
    fn test_reindex_is_idempotent_bytewise() {
        let f = fixture();
        spend(&f, 10);

        f.utxo.reindex().unwrap();
        let first = f.utxo.dump().unwrap();
        f.utxo.reindex().unwrap();
        assert_eq!(f.utxo.dump().unwrap(), first);
    }

    #[test]
    fn test_partial_spend_preserves_output_indices() {
        let f = fixture();
        let block = spend(&f, 10);

        // The spend transaction has two outputs: 0 -> recipient, 1 -> change.
        let spend_tx = block
            .transactions
            .iter()
            .find(|tx| !tx.is_coinbase())
            .unwrap();

        // Spend the recipient output (index 0) onward; the change entry must
        // keep index 1.
        let tx = Transaction::new_utxo(&f.w2, &f.w1.address(), 10, &f.utxo).unwrap();
        let coinbase = Transaction::new_coinbase(&f.w2.address(), "").unwrap();
        let block2 = f.utxo.chain().mine_block(vec![tx, coinbase]).unwrap();
        f.utxo.update(&block2).unwrap();

        let raw = f
            .utxo
            .tree
            .get(&spend_tx.id.0[..])
            .unwrap()
            .expect("change output entry");
        let outs = TxOutputs::deserialize(&raw).unwrap();
        assert_eq!(outs.outputs.len(), 1);
        assert!(outs.outputs.contains_key(&1));
        assert_eq!(outs.outputs[&1].value, 40);
    }

    #[test]
    fn test_find_spendable_outputs_stops_at_amount() {
        let f = fixture();
        let pkh = hash_pub_key(&f.w1.public_key);

        let (acc, unspent) = f.utxo.find_spendable_outputs(&pkh, 1).unwrap();
        assert_eq!(acc, INIT_REWARD);
        assert_eq!(unspent.len(), 1);

        let (acc, _) = f.utxo.find_spendable_outputs(&pkh, INIT_REWARD + 1).unwrap();
        assert_eq!(acc, INIT_REWARD);
    }
}
