use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::blockchain::Transaction;
use crate::consensus::pow::ProofOfWork;
use crate::crypto::merkle::MerkleTree;
use crate::crypto::Hash;
use crate::error::{Error, Result};

/// A mined block. `hash` is the proof-of-work header hash; it commits to the
/// parent, the merkle root of `transactions`, the timestamp and the nonce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub timestamp: i64,
    pub prev_block_hash: Hash,
    pub hash: Hash,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub height: u64,
}

impl Block {
    /// Assembles and mines a block on top of `prev_block_hash`.
    pub fn new(
        transactions: Vec<Transaction>,
        prev_block_hash: Hash,
        height: u64,
        target_bits: u32,
    ) -> Result<Self> {
        let mut block = Block {
            timestamp: Utc::now().timestamp(),
            prev_block_hash,
            hash: Hash::zero(),
            transactions,
            nonce: 0,
            height,
        };

        let pow = ProofOfWork::new(&block, target_bits)?;
        let (nonce, hash) = pow
            .run()
            .ok_or_else(|| Error::InvalidBlock("nonce space exhausted".into()))?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Mines the height-0 block from a single coinbase transaction.
    pub fn genesis(coinbase: Transaction, target_bits: u32) -> Result<Self> {
        Block::new(vec![coinbase], Hash::zero(), 0, target_bits)
    }

    /// Merkle root over the serialized transactions, in block order.
    pub fn hash_transactions(&self) -> Result<Hash> {
        let mut leaves = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            leaves.push(tx.serialize()?);
        }
        Ok(MerkleTree::new(&leaves).root())
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Transaction;
    use crate::wallet::Wallet;

    const EASY_BITS: u32 = 8;

    #[test]
    fn test_genesis_block() {
        let address = Wallet::new().address();
        let coinbase = Transaction::new_coinbase(&address, "genesis data").unwrap();
        let block = Block::genesis(coinbase, EASY_BITS).unwrap();

        assert_eq!(block.height, 0);
        assert!(block.prev_block_hash.is_zero());
        assert!(!block.hash.is_zero());
        assert!(ProofOfWork::new(&block, EASY_BITS).unwrap().verify());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let address = Wallet::new().address();
        let coinbase = Transaction::new_coinbase(&address, "").unwrap();
        let block = Block::genesis(coinbase, EASY_BITS).unwrap();

        let bytes = block.serialize().unwrap();
        let restored = Block::deserialize(&bytes).unwrap();
        assert_eq!(block, restored);
    }

    #[test]
    fn test_merkle_root_changes_with_transactions() {
        let address = Wallet::new().address();
        let cb1 = Transaction::new_coinbase(&address, "one").unwrap();
        let cb2 = Transaction::new_coinbase(&address, "two").unwrap();

        let b1 = Block::genesis(cb1, EASY_BITS).unwrap();
        let b2 = Block::genesis(cb2, EASY_BITS).unwrap();
        assert_ne!(
            b1.hash_transactions().unwrap(),
            b2.hash_transactions().unwrap()
        );
    }
}
