//! Proof-of-work: a sequential nonce search over the block header preimage.
//!
//! The preimage is `prev_hash || merkle_root || be64(timestamp) ||
//! be64(target_bits) || be64(nonce)`; a nonce wins when its SHA-256,
//! read as a big-endian 256-bit integer, is strictly below
//! `1 << (256 - target_bits)`. The difficulty bits are part of the preimage
//! so headers mined against another target are never misrecognized.

use log::debug;
use num_bigint::BigUint;
use num_traits::One;

use crate::blockchain::Block;
use crate::crypto::{self, Hash};
use crate::error::{Error, Result};

/// Network difficulty: leading zero bits required of a header hash.
pub const TARGET_BITS: u32 = 24;

const MAX_NONCE: u64 = u64::MAX;

pub struct ProofOfWork {
    target: BigUint,
    target_bits: u32,
    prev_block_hash: Hash,
    merkle_root: Hash,
    timestamp: i64,
    block_nonce: u64,
}

impl ProofOfWork {
    /// Captures the header fields of `block` and computes its transaction
    /// commitment once, so the nonce loop only rebuilds the short preimage.
    pub fn new(block: &Block, target_bits: u32) -> Result<Self> {
        if target_bits == 0 || target_bits >= 256 {
            return Err(Error::InvalidBlock(format!(
                "target bits out of range: {}",
                target_bits
            )));
        }
        Ok(ProofOfWork {
            target: BigUint::one() << (256 - target_bits),
            target_bits,
            prev_block_hash: block.prev_block_hash,
            merkle_root: block.hash_transactions()?,
            timestamp: block.timestamp,
            block_nonce: block.nonce,
        })
    }

    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 8 + 8);
        data.extend_from_slice(self.prev_block_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&(i64::from(self.target_bits)).to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }

    /// Searches nonces from zero upward; returns the first `(nonce, hash)`
    /// below the target, or `None` if the space is exhausted.
    pub fn run(&self) -> Option<(u64, Hash)> {
        debug!("mining a new block at {} bits", self.target_bits);
        for nonce in 0..MAX_NONCE {
            let hash = crypto::sha256(&self.prepare_data(nonce));
            if BigUint::from_bytes_be(hash.as_bytes()) < self.target {
                debug!("found nonce {} -> {}", nonce, hash);
                return Some((nonce, hash));
            }
        }
        None
    }

    /// Recomputes the hash for the block's stored nonce and checks it
    /// against the target.
    pub fn verify(&self) -> bool {
        let hash = crypto::sha256(&self.prepare_data(self.block_nonce));
        BigUint::from_bytes_be(hash.as_bytes()) < self.target
    }
}
