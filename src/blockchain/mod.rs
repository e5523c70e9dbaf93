//! The ledger core: blocks, transactions, and the persistent chain store.

pub mod block;
pub mod chain;
pub mod transaction;

pub use block::Block;
pub use chain::{BlockAdded, Blockchain, ChainIterator};
pub use transaction::{Transaction, TxInput, TxOutput, COINBASE_VOUT, INIT_REWARD};
