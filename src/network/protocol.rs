//! Wire protocol: one message per TCP connection, framed as a 12-byte
//! ASCII command (NUL-padded) followed by the bincode payload of the
//! command-specific record.

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::error::{Error, Result};

/// Wire protocol version carried in `version` messages.
pub const PROTOCOL_VERSION: u32 = 1;

/// Fixed width of the command prefix.
pub const COMMAND_LENGTH: usize = 12;

pub const CMD_VERSION: &str = "version";
pub const CMD_GET_BLOCKS: &str = "getBlocks";
pub const CMD_INV: &str = "inv";
pub const CMD_GET_DATA: &str = "getdata";
pub const CMD_BLOCK: &str = "block";
pub const CMD_TX: &str = "tx";
pub const CMD_ADDR: &str = "addr";

/// What an `inv` or `getdata` refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionPayload {
    pub version: u32,
    pub best_height: u64,
    pub addr_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Hash>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockPayload {
    pub addr_from: String,
    #[serde(with = "serde_bytes")]
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxPayload {
    pub addr_from: String,
    #[serde(with = "serde_bytes")]
    pub transaction: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddrPayload {
    pub addr_list: Vec<String>,
}

/// Every message the peer state machine exchanges.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Version(VersionPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
    Addr(AddrPayload),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => CMD_VERSION,
            Message::GetBlocks(_) => CMD_GET_BLOCKS,
            Message::Inv(_) => CMD_INV,
            Message::GetData(_) => CMD_GET_DATA,
            Message::Block(_) => CMD_BLOCK,
            Message::Tx(_) => CMD_TX,
            Message::Addr(_) => CMD_ADDR,
        }
    }

    /// `command[12] || bincode(payload)`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Message::Version(p) => bincode::serialize(p)?,
            Message::GetBlocks(p) => bincode::serialize(p)?,
            Message::Inv(p) => bincode::serialize(p)?,
            Message::GetData(p) => bincode::serialize(p)?,
            Message::Block(p) => bincode::serialize(p)?,
            Message::Tx(p) => bincode::serialize(p)?,
            Message::Addr(p) => bincode::serialize(p)?,
        };

        let mut frame = Vec::with_capacity(COMMAND_LENGTH + payload.len());
        frame.extend_from_slice(&command_to_bytes(self.command()));
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < COMMAND_LENGTH {
            return Err(Error::Protocol(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        let (head, payload) = data.split_at(COMMAND_LENGTH);
        let command = bytes_to_command(head);

        match command.as_str() {
            CMD_VERSION => Ok(Message::Version(bincode::deserialize(payload)?)),
            CMD_GET_BLOCKS => Ok(Message::GetBlocks(bincode::deserialize(payload)?)),
            CMD_INV => Ok(Message::Inv(bincode::deserialize(payload)?)),
            CMD_GET_DATA => Ok(Message::GetData(bincode::deserialize(payload)?)),
            CMD_BLOCK => Ok(Message::Block(bincode::deserialize(payload)?)),
            CMD_TX => Ok(Message::Tx(bincode::deserialize(payload)?)),
            CMD_ADDR => Ok(Message::Addr(bincode::deserialize(payload)?)),
            other => Err(Error::Protocol(format!("unknown command {:?}", other))),
        }
    }
}

fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    bytes
}

fn bytes_to_command(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(COMMAND_LENGTH);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
