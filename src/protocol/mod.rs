//! Protocol layer for the chat server
//!
//! This module provides:
//! - Binary packet encoding/decoding with integrity checking
//! - Stream reassembly into whole packets
//! - JSON reply shaping for the command protocol

pub mod envelope;
pub mod frame;

// Re-export commonly used types
pub use envelope::{make_error_message, make_handler_error, make_success_message};
pub use frame::{
    DataPacket, PacketBuffer, PacketKind, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HASH_SIZE,
    PACKET_HEADER_SIZE,
};
