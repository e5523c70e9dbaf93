//! The peer node: TCP listener, message handlers, mempool, and the mining
//! loop.
//!
//! All shared state hangs off the `Node` value so several nodes can run in
//! one process. Each accepted connection carries exactly one message and is
//! handled on its own task; a handler failure is logged and dropped, never
//! propagated to the process. Peers that cannot be dialed are pruned from
//! the known-node list.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::blockchain::{Block, BlockAdded, Blockchain, Transaction};
use crate::config::NodeConfig;
use crate::crypto::Hash;
use crate::database::UtxoSet;
use crate::error::{Error, Result};
use crate::network::protocol::{
    AddrPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message,
    TxPayload, VersionPayload, PROTOCOL_VERSION,
};

pub struct Node {
    /// Our own `localhost:<node_id>` address, as advertised to peers.
    address: String,
    central_node: String,
    mining_address: Option<String>,
    chain: Arc<Blockchain>,
    utxo: UtxoSet,
    mempool: DashMap<Hash, Transaction>,
    known_nodes: Mutex<Vec<String>>,
    blocks_in_transit: Mutex<Vec<Hash>>,
    miner_gate: tokio::sync::Mutex<()>,
}

impl Node {
    /// Opens this node's chain from disk and wires up the UTXO index.
    pub fn new(cfg: &NodeConfig, mining_address: Option<String>) -> Result<Arc<Self>> {
        let chain = Arc::new(Blockchain::open(cfg)?);
        Self::with_chain(cfg, chain, mining_address)
    }

    /// Builds a node around an already-open chain handle.
    pub fn with_chain(
        cfg: &NodeConfig,
        chain: Arc<Blockchain>,
        mining_address: Option<String>,
    ) -> Result<Arc<Self>> {
        let utxo = UtxoSet::new(chain.clone())?;
        Ok(Arc::new(Node {
            address: cfg.listen_addr(),
            central_node: cfg.central_node.clone(),
            mining_address,
            chain,
            utxo,
            mempool: DashMap::new(),
            known_nodes: Mutex::new(vec![cfg.central_node.clone()]),
            blocks_in_transit: Mutex::new(Vec::new()),
            miner_gate: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    /// Binds the listener, announces ourselves to the central node, and
    /// spawns the accept loop. Returns once the port is open.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let listener = TcpListener::bind(&self.address).await?;
        info!("node listening on {}", self.address);

        if self.address != self.central_node {
            self.send_version(&self.central_node.clone()).await?;
        }

        let node = self.clone();
        Ok(tokio::spawn(async move { node.accept_loop(listener).await }))
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let node = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_connection(stream).await {
                            warn!("dropped request from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("accept failed: {}", e),
            }
        }
    }

    /// Reads the single message a connection carries and dispatches it.
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let mut request = Vec::new();
        stream.read_to_end(&mut request).await?;
        let message = Message::from_bytes(&request)?;
        debug!("received command {:?}", message.command());

        match message {
            Message::Version(p) => self.handle_version(p).await,
            Message::GetBlocks(p) => self.handle_get_blocks(p).await,
            Message::Inv(p) => self.handle_inv(p).await,
            Message::GetData(p) => self.handle_get_data(p).await,
            Message::Block(p) => self.handle_block(p).await,
            Message::Tx(p) => self.handle_tx(p).await,
            Message::Addr(p) => self.handle_addr(p).await,
        }
    }

    async fn handle_version(&self, payload: VersionPayload) -> Result<()> {
        let my_best_height = self.chain.get_best_height()?;
        if my_best_height < payload.best_height {
            self.send_get_blocks(&payload.addr_from).await?;
        } else if my_best_height > payload.best_height {
            self.send_version(&payload.addr_from).await?;
        }
        self.add_known_node(&payload.addr_from);
        Ok(())
    }

    async fn handle_get_blocks(&self, payload: GetBlocksPayload) -> Result<()> {
        let hashes = self.chain.get_block_hashes()?;
        self.send_inv(&payload.addr_from, InvKind::Block, hashes)
            .await
    }

    async fn handle_inv(&self, payload: InvPayload) -> Result<()> {
        debug!(
            "inventory of {} {:?} items from {}",
            payload.items.len(),
            payload.kind,
            payload.addr_from
        );

        match payload.kind {
            InvKind::Block => {
                let Some(&first) = payload.items.first() else {
                    return Ok(());
                };
                {
                    let mut transit = self.blocks_in_transit.lock();
                    *transit = payload.items;
                    transit.retain(|h| *h != first);
                }
                self.send_get_data(&payload.addr_from, InvKind::Block, first)
                    .await?;
            }
            InvKind::Tx => {
                let Some(&txid) = payload.items.first() else {
                    return Ok(());
                };
                if !self.mempool.contains_key(&txid) {
                    self.send_get_data(&payload.addr_from, InvKind::Tx, txid)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_get_data(&self, payload: GetDataPayload) -> Result<()> {
        match payload.kind {
            InvKind::Block => {
                let block = self.chain.get_block(payload.id)?;
                self.send_block(&payload.addr_from, &block).await?;
            }
            InvKind::Tx => {
                let Some(tx) = self.mempool.get(&payload.id).map(|e| e.value().clone()) else {
                    warn!("peer asked for unknown mempool transaction {}", payload.id);
                    return Ok(());
                };
                self.send_tx(&payload.addr_from, &tx).await?;
            }
        }
        Ok(())
    }

    async fn handle_block(&self, payload: BlockPayload) -> Result<()> {
        let block = Block::deserialize(&payload.block)?;
        info!("received block {} at height {}", block.hash, block.height);

        let added = self.chain.add_block(&block)?;
        match added {
            BlockAdded::Extended => self.utxo.update(&block)?,
            // A side branch took over the tip; incremental bookkeeping no
            // longer describes it.
            BlockAdded::Promoted => self.utxo.reindex()?,
            BlockAdded::Stored | BlockAdded::AlreadyKnown => {}
        }

        let next = {
            let mut transit = self.blocks_in_transit.lock();
            if transit.is_empty() {
                None
            } else {
                Some(transit.remove(0))
            }
        };
        if let Some(hash) = next {
            self.send_get_data(&payload.addr_from, InvKind::Block, hash)
                .await?;
        }
        Ok(())
    }

    async fn handle_tx(&self, payload: TxPayload) -> Result<()> {
        let tx = Transaction::deserialize(&payload.transaction)?;
        let txid = tx.id;
        self.mempool.insert(txid, tx);
        debug!("mempool now holds {} transactions", self.mempool.len());

        if self.address == self.central_node {
            // The central node relays ids to everyone but the sender.
            for node in self.known_nodes_snapshot() {
                if node != self.address && node != payload.addr_from {
                    self.send_inv(&node, InvKind::Tx, vec![txid]).await?;
                }
            }
        } else if self.mempool.len() >= 2 && self.mining_address.is_some() {
            self.mine_pending().await?;
        }
        Ok(())
    }

    async fn handle_addr(&self, payload: AddrPayload) -> Result<()> {
        for addr in &payload.addr_list {
            self.add_known_node(addr);
        }
        info!("known nodes: {}", self.known_nodes.lock().len());

        for node in self.known_nodes_snapshot() {
            if node != self.address {
                self.send_get_blocks(&node).await?;
            }
        }
        Ok(())
    }

    /// Dequeue-verify-mine cycle: collect every mempool transaction that
    /// verifies against the chain, append a coinbase for the miner, mine,
    /// update the index, announce, and repeat while work remains. The gate
    /// keeps concurrent `tx` arrivals from stacking extra miners; whoever
    /// holds it drains the pool.
    pub async fn mine_pending(&self) -> Result<()> {
        let Some(miner) = self.mining_address.clone() else {
            return Ok(());
        };
        let Ok(_gate) = self.miner_gate.try_lock() else {
            return Ok(());
        };

        loop {
            let mut txs = Vec::new();
            for entry in self.mempool.iter() {
                match self.chain.verify_transaction(entry.value()) {
                    Ok(true) => txs.push(entry.value().clone()),
                    Ok(false) => {
                        warn!("mempool transaction {} is invalid, skipping", entry.key())
                    }
                    Err(e) => warn!("cannot verify mempool transaction {}: {}", entry.key(), e),
                }
            }
            if txs.is_empty() {
                debug!("no verifiable transactions; waiting for more");
                return Ok(());
            }

            txs.push(Transaction::new_coinbase(&miner, "")?);

            let chain = Arc::clone(&self.chain);
            let to_mine = txs.clone();
            let block = tokio::task::spawn_blocking(move || chain.mine_block(to_mine))
                .await
                .map_err(|e| Error::Protocol(format!("mining task died: {}", e)))??;
            info!("mined block {} with {} transactions", block.hash, txs.len());

            self.utxo.update(&block)?;
            for tx in &txs {
                self.mempool.remove(&tx.id);
            }

            for node in self.known_nodes_snapshot() {
                if node != self.address {
                    self.send_inv(&node, InvKind::Block, vec![block.hash]).await?;
                }
            }

            if self.mempool.is_empty() {
                return Ok(());
            }
        }
    }

    fn known_nodes_snapshot(&self) -> Vec<String> {
        self.known_nodes.lock().clone()
    }

    fn add_known_node(&self, addr: &str) {
        let mut nodes = self.known_nodes.lock();
        if !nodes.iter().any(|n| n == addr) {
            nodes.push(addr.to_string());
        }
    }

    /// Dials `addr` and writes one message. A refused dial prunes the peer;
    /// no retry.
    async fn send_data(&self, addr: &str, data: &[u8]) {
        match TcpStream::connect(addr).await {
            Ok(mut stream) => {
                if let Err(e) = stream.write_all(data).await {
                    warn!("failed to send to {}: {}", addr, e);
                }
                let _ = stream.shutdown().await;
            }
            Err(_) => {
                warn!("{} is not available, pruning from known nodes", addr);
                self.known_nodes.lock().retain(|n| n != addr);
            }
        }
    }

    async fn send_message(&self, addr: &str, message: &Message) -> Result<()> {
        let bytes = message.to_bytes()?;
        self.send_data(addr, &bytes).await;
        Ok(())
    }

    async fn send_version(&self, addr: &str) -> Result<()> {
        let message = Message::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            best_height: self.chain.get_best_height()?,
            addr_from: self.address.clone(),
        });
        self.send_message(addr, &message).await
    }

    async fn send_get_blocks(&self, addr: &str) -> Result<()> {
        let message = Message::GetBlocks(GetBlocksPayload {
            addr_from: self.address.clone(),
        });
        self.send_message(addr, &message).await
    }

    async fn send_inv(&self, addr: &str, kind: InvKind, items: Vec<Hash>) -> Result<()> {
        let message = Message::Inv(InvPayload {
            addr_from: self.address.clone(),
            kind,
            items,
        });
        self.send_message(addr, &message).await
    }

    async fn send_get_data(&self, addr: &str, kind: InvKind, id: Hash) -> Result<()> {
        let message = Message::GetData(GetDataPayload {
            addr_from: self.address.clone(),
            kind,
            id,
        });
        self.send_message(addr, &message).await
    }

    async fn send_block(&self, addr: &str, block: &Block) -> Result<()> {
        let message = Message::Block(BlockPayload {
            addr_from: self.address.clone(),
            block: block.serialize()?,
        });
        self.send_message(addr, &message).await
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) -> Result<()> {
        let message = Message::Tx(TxPayload {
            addr_from: self.address.clone(),
            transaction: tx.serialize()?,
        });
        self.send_message(addr, &message).await
    }
}

/// One-shot client send used by the CLI: ships a signed transaction to a
/// node (normally the central one) and closes.
pub async fn send_transaction(addr: &str, addr_from: &str, tx: &Transaction) -> Result<()> {
    let message = Message::Tx(TxPayload {
        addr_from: addr_from.to_string(),
        transaction: tx.serialize()?,
    });
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&message.to_bytes()?).await?;
    stream.shutdown().await?;
    Ok(())
}
