//! The persistent chain store: append, receive, iterate.
//!
//! Blocks live in the `blocks` tree keyed by header hash, with the
//! distinguished key `"l"` holding the current best tip. The store owns the
//! sled database handle; the UTXO index opens its own tree against the same
//! handle.

use std::collections::{HashMap, HashSet};

use log::info;
use parking_lot::RwLock;
use sled::transaction::ConflictableTransactionError;

use crate::blockchain::{Block, Transaction};
use crate::config::NodeConfig;
use crate::consensus::pow::ProofOfWork;
use crate::crypto::Hash;
use crate::database::{self, TxOutputs, TIP_KEY};
use crate::error::{Error, Result};
use crate::wallet::Wallet;

/// Input-side data of the height-0 coinbase; fixed so independently created
/// chains of one network share a genesis.
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Outcome of receiving a block from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAdded {
    /// New best tip, building directly on the previous one.
    Extended,
    /// New best tip by height, reached from a side branch; the UTXO index
    /// must be rebuilt.
    Promoted,
    /// Kept, but the tip did not move (lower height, or unknown parent).
    Stored,
    /// Duplicate receipt; nothing changed.
    AlreadyKnown,
}

pub struct Blockchain {
    db: sled::Db,
    blocks: sled::Tree,
    tip: RwLock<Hash>,
    target_bits: u32,
}

impl Blockchain {
    /// Mines the genesis block paying `address` and initializes the store.
    /// Fails with `ChainExists` if the database directory is already there.
    pub fn create(cfg: &NodeConfig, address: &str) -> Result<Self> {
        let path = cfg.db_path();
        if path.exists() {
            return Err(Error::ChainExists(path));
        }

        let db = database::open(&path)?;
        let blocks = db.open_tree(database::BLOCKS_TREE)?;

        let coinbase = Transaction::new_coinbase(address, GENESIS_COINBASE_DATA)?;
        let genesis = Block::genesis(coinbase, cfg.target_bits)?;

        blocks.insert(genesis.hash.as_bytes(), genesis.serialize()?)?;
        blocks.insert(TIP_KEY, &genesis.hash.0[..])?;
        db.flush()?;
        info!("created chain with genesis {}", genesis.hash);

        Ok(Blockchain {
            db,
            blocks,
            tip: RwLock::new(genesis.hash),
            target_bits: cfg.target_bits,
        })
    }

    /// Opens an existing store and caches its tip. Fails with `NotFound` if
    /// no chain has been created for this node yet.
    pub fn open(cfg: &NodeConfig) -> Result<Self> {
        let path = cfg.db_path();
        if !path.exists() {
            return Err(Error::NotFound(format!("chain database at {}", path.display())));
        }

        let db = database::open(&path)?;
        let blocks = db.open_tree(database::BLOCKS_TREE)?;
        let tip_raw = blocks
            .get(TIP_KEY)?
            .ok_or_else(|| Error::NotFound("chain tip".to_string()))?;
        let tip = Hash::from_slice(&tip_raw)
            .ok_or_else(|| Error::InvalidBlock("corrupt tip record".to_string()))?;

        Ok(Blockchain {
            db,
            blocks,
            tip: RwLock::new(tip),
            target_bits: cfg.target_bits,
        })
    }

    pub fn database(&self) -> &sled::Db {
        &self.db
    }

    pub fn target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn tip(&self) -> Hash {
        *self.tip.read()
    }

    pub fn get_block(&self, hash: Hash) -> Result<Block> {
        let raw = self
            .blocks
            .get(hash.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("block {}", hash)))?;
        Block::deserialize(&raw)
    }

    pub fn get_best_height(&self) -> Result<u64> {
        Ok(self.get_block(self.tip())?.height)
    }

    /// Block hashes from the tip back to genesis.
    pub fn get_block_hashes(&self) -> Result<Vec<Hash>> {
        let mut hashes = Vec::new();
        for block in self.iter() {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Verifies every non-coinbase transaction, mines a block on the current
    /// tip, and atomically persists it as the new best block.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        for tx in &transactions {
            if !tx.is_coinbase() && !self.verify_transaction(tx)? {
                return Err(Error::InvalidTransaction(tx.id));
            }
        }

        let (parent_hash, parent_height) = {
            let tip = self.tip();
            (tip, self.get_block(tip)?.height)
        };

        let block = Block::new(
            transactions,
            parent_hash,
            parent_height + 1,
            self.target_bits,
        )?;
        let raw = block.serialize()?;

        self.blocks
            .transaction(
                |t| -> sled::transaction::ConflictableTransactionResult<(), Error> {
                    t.insert(&block.hash.0[..], raw.clone())?;
                    t.insert(TIP_KEY, &block.hash.0[..])?;
                    Ok(())
                },
            )
            .map_err(Error::from)?;
        *self.tip.write() = block.hash;
        self.db.flush()?;

        info!("mined block {} at height {}", block.hash, block.height);
        Ok(block)
    }

    /// Idempotent receipt of a network block. Proof-of-work is checked
    /// before anything is written; the tip is only promoted when the parent
    /// is already stored and the new height strictly exceeds the current
    /// best.
    pub fn add_block(&self, block: &Block) -> Result<BlockAdded> {
        if !ProofOfWork::new(block, self.target_bits)?.verify() {
            return Err(Error::InvalidBlock(format!(
                "bad proof of work on {}",
                block.hash
            )));
        }

        let raw = block.serialize()?;
        let added = self
            .blocks
            .transaction(
                |t| -> sled::transaction::ConflictableTransactionResult<BlockAdded, Error> {
                if t.get(&block.hash.0[..])?.is_some() {
                    return Ok(BlockAdded::AlreadyKnown);
                }
                t.insert(&block.hash.0[..], raw.clone())?;

                let parent_known = block.prev_block_hash.is_zero()
                    || t.get(&block.prev_block_hash.0[..])?.is_some();

                let tip_raw = t.get(TIP_KEY)?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(Error::NotFound("chain tip".to_string()))
                })?;
                let tip_hash = Hash::from_slice(&tip_raw).ok_or_else(|| {
                    ConflictableTransactionError::Abort(Error::InvalidBlock(
                        "corrupt tip record".to_string(),
                    ))
                })?;
                let tip_block_raw = t.get(&tip_hash.0[..])?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(Error::NotFound(format!(
                        "block {}",
                        tip_hash
                    )))
                })?;
                let tip_block = Block::deserialize(&tip_block_raw)
                    .map_err(ConflictableTransactionError::Abort)?;

                if parent_known && block.height > tip_block.height {
                    t.insert(TIP_KEY, &block.hash.0[..])?;
                    if block.prev_block_hash == tip_hash {
                        Ok(BlockAdded::Extended)
                    } else {
                        Ok(BlockAdded::Promoted)
                    }
                } else {
                    Ok(BlockAdded::Stored)
                }
                },
            )
            .map_err(Error::from)?;

        if matches!(added, BlockAdded::Extended | BlockAdded::Promoted) {
            *self.tip.write() = block.hash;
        }
        self.db.flush()?;
        Ok(added)
    }

    /// Linear scan for a transaction by id, tip to genesis.
    pub fn find_transaction(&self, id: Hash) -> Result<Transaction> {
        for block in self.iter() {
            for tx in block?.transactions {
                if tx.id == id {
                    return Ok(tx);
                }
            }
        }
        Err(Error::NotFound(format!("transaction {}", id)))
    }

    /// Full-chain scan producing every transaction's surviving outputs. An
    /// output is unspent iff no later input references it.
    pub fn find_utxo_map(&self) -> Result<HashMap<Hash, TxOutputs>> {
        let mut utxo: HashMap<Hash, TxOutputs> = HashMap::new();
        let mut spent: HashMap<Hash, HashSet<i32>> = HashMap::new();

        for block in self.iter() {
            for tx in &block?.transactions {
                for (out_idx, out) in tx.vout.iter().enumerate() {
                    let is_spent = spent
                        .get(&tx.id)
                        .map_or(false, |s| s.contains(&(out_idx as i32)));
                    if !is_spent {
                        utxo.entry(tx.id)
                            .or_default()
                            .outputs
                            .insert(out_idx as u32, out.clone());
                    }
                }
                if !tx.is_coinbase() {
                    for input in &tx.vin {
                        spent.entry(input.txid).or_default().insert(input.vout);
                    }
                }
            }
        }
        Ok(utxo)
    }

    fn prev_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.vin {
            let prev = self
                .find_transaction(input.txid)
                .map_err(|_| Error::DanglingInput(input.txid))?;
            prev_txs.insert(prev.id, prev);
        }
        Ok(prev_txs)
    }

    /// Signs `tx` with the wallet's key against the chain's record of the
    /// outputs it spends.
    pub fn sign_transaction(&self, tx: &mut Transaction, wallet: &Wallet) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.prev_transactions(tx)?;
        tx.sign(&wallet.secret_key, &prev_txs)
    }

    /// Verifies `tx` against the chain's record of the outputs it spends.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prev_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Walks previous-hash pointers from the tip down to genesis.
    pub fn iter(&self) -> ChainIterator {
        ChainIterator {
            current: self.tip(),
            blocks: self.blocks.clone(),
        }
    }
}

pub struct ChainIterator {
    current: Hash,
    blocks: sled::Tree,
}

impl Iterator for ChainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_zero() {
            return None;
        }
        let raw = match self.blocks.get(self.current.as_bytes()) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                let missing = self.current;
                self.current = Hash::zero();
                return Some(Err(Error::NotFound(format!("block {}", missing))));
            }
            Err(e) => {
                self.current = Hash::zero();
                return Some(Err(e.into()));
            }
        };
        match Block::deserialize(&raw) {
            Ok(block) => {
                self.current = block.prev_block_hash;
                Some(Ok(block))
            }
            Err(e) => {
                self.current = Hash::zero();
                Some(Err(e))
            }
        }
    }
}
