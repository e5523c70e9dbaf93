pub mod pow;

pub use pow::{ProofOfWork, TARGET_BITS};
