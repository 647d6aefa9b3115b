//! MongoDB wire-protocol framing.
//!
//! Every message on the stream is length-prefixed: the first four bytes
//! (little-endian) carry the total size, followed by the rest of a 16-byte
//! header and an opcode-specific body. The proxy only ever looks inside
//! `OP_MSG` bodies whose first section is a single document; everything else
//! is relayed as opaque bytes.
//!
//! # Module Structure
//!
//! - `framer` - async read/write of whole length-prefixed messages
//! - `op_msg` - decompose/recompose of the one message shape the proxy rewrites

mod framer;
mod op_msg;

pub use framer::{read_message, write_message};
pub use op_msg::{recompose, MsgHeader, OpMsg};

/// Size of the standard message header (length, request id, response to, opcode).
pub const HEADER_LEN: usize = 16;

/// Opcode of the extensible message format (`OP_MSG`).
pub const OP_MSG: i32 = 2013;

/// `OP_MSG` section kind carrying a single BSON document.
pub const SECTION_SINGLE_DOCUMENT: u8 = 0;

/// `OP_MSG` flag bit indicating a trailing CRC-32C checksum.
pub const CHECKSUM_PRESENT: u32 = 1;

/// Largest message the server accepts (`maxMessageSizeBytes`).
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

/// Errors raised while framing messages off a stream.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error while framing message: {0}")]
    Io(#[from] std::io::Error),
    #[error("Declared message length {0} is shorter than the {HEADER_LEN}-byte header")]
    LengthTooSmall(i32),
    #[error("Declared message length {0} exceeds the {MAX_MESSAGE_SIZE}-byte maximum")]
    LengthTooLarge(i32),
}
