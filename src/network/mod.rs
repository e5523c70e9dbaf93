//! Peer networking: the wire protocol and the node state machine.

pub mod protocol;
pub mod server;

pub use protocol::{InvKind, Message, COMMAND_LENGTH, PROTOCOL_VERSION};
pub use server::{send_transaction, Node};
