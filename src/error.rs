use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::Hash;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("input references unknown transaction {0}")]
    DanglingInput(Hash),

    #[error("malformed key or signature material: {0}")]
    MalformedCrypto(String),

    #[error("transaction {0} failed signature verification")]
    InvalidTransaction(Hash),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("chain database already exists at {0}")]
    ChainExists(PathBuf),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("wallet file error: {0}")]
    WalletFile(#[from] serde_json::Error),
}

// sled transactions surface aborts through their own wrapper; unwrap it back
// into the crate error.
impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(err: sled::transaction::TransactionError<Error>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => Error::Db(e),
        }
    }
}
