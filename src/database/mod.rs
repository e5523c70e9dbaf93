//! sled-backed storage layer.
//!
//! One database per node; the `blocks` tree is the chain store and
//! `chainstate` is the UTXO index, mirroring the buckets of the original
//! deployment's files.

pub mod utxo_set;

use std::path::Path;

use crate::error::Result;

pub use utxo_set::{TxOutputs, UtxoSet};

pub const BLOCKS_TREE: &str = "blocks";
pub const CHAINSTATE_TREE: &str = "chainstate";

/// Distinguished key in `blocks` holding the best-tip hash.
pub const TIP_KEY: &[u8] = b"l";

pub fn open(path: &Path) -> Result<sled::Db> {
    Ok(sled::open(path)?)
}
