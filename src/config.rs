use std::path::{Path, PathBuf};

use crate::consensus::TARGET_BITS;

/// Seed peer every fresh node dials first.
pub const CENTRAL_NODE: &str = "localhost:3000";

/// Per-node configuration. The node id doubles as the listen port and
/// selects the on-disk file names, so several nodes can share a directory.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    /// Directory holding the chain database and wallet file.
    pub data_dir: PathBuf,
    /// Seed peer address; `CENTRAL_NODE` outside of tests.
    pub central_node: String,
    /// Proof-of-work difficulty. All peers of one network must agree, since
    /// the bits are pinned into the header preimage.
    pub target_bits: u32,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        NodeConfig {
            node_id: node_id.into(),
            data_dir: PathBuf::from("."),
            central_node: CENTRAL_NODE.to_string(),
            target_bits: TARGET_BITS,
        }
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_central_node(mut self, addr: impl Into<String>) -> Self {
        self.central_node = addr.into();
        self
    }

    pub fn with_target_bits(mut self, bits: u32) -> Self {
        self.target_bits = bits;
        self
    }

    /// `localhost:<node_id>` — the address this node listens on and
    /// advertises to peers.
    pub fn listen_addr(&self) -> String {
        format!("localhost:{}", self.node_id)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("ozycoin_{}.db", self.node_id))
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.dat", self.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_node_id() {
        let cfg = NodeConfig::new("3000").with_data_dir("/tmp/nodes");
        assert_eq!(cfg.listen_addr(), "localhost:3000");
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/nodes/ozycoin_3000.db"));
        assert_eq!(cfg.wallet_path(), PathBuf::from("/tmp/nodes/wallet_3000.dat"));
    }

    #[test]
    fn test_defaults() {
        let cfg = NodeConfig::new("3001");
        assert_eq!(cfg.central_node, CENTRAL_NODE);
        assert_eq!(cfg.target_bits, TARGET_BITS);
    }
}
