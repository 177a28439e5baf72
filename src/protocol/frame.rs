//! Binary packet protocol with length-prefixed, checksummed messages
//!
//! Packet format:
//! ```text
//! +----------------+--------+----------------+------------------+---------+------------+
//! | total_length   | type   | sequence       | request_id       | payload | sha256     |
//! | (4 bytes, BE)  | (1 b)  | (4 bytes, BE)  | (8 bytes, BE)    | (var)   | (32 bytes) |
//! +----------------+--------+----------------+------------------+---------+------------+
//! ```
//!
//! `total_length` counts the whole packet including itself and the
//! checksum trailer. All multi-byte integers travel in network byte
//! order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::error::{ChatError, Result};

/// Fixed header size: 4 bytes length + 1 byte type + 4 bytes sequence + 8 bytes request id
pub const PACKET_HEADER_SIZE: usize = 17;

/// SHA-256 checksum trailer size
pub const PACKET_HASH_SIZE: usize = 32;

/// Smallest well-formed packet (empty payload)
pub const MIN_PACKET_SIZE: usize = PACKET_HEADER_SIZE + PACKET_HASH_SIZE;

/// Maximum total packet size (16 MB)
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Packet types for the different payload categories
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Unclassified payload
    Unknown = 0,
    /// JSON request/response text
    Text = 1,
    /// File stream chunk
    FileStream = 2,
    /// Raw binary payload
    Binary = 3,
    /// Keepalive, discarded silently by the server
    HeartBeat = 4,
}

impl PacketKind {
    /// Convert from u8, returns None for unknown type bytes
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketKind::Unknown),
            1 => Some(PacketKind::Text),
            2 => Some(PacketKind::FileStream),
            3 => Some(PacketKind::Binary),
            4 => Some(PacketKind::HeartBeat),
            _ => None,
        }
    }
}

/// A single protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub kind: PacketKind,
    pub sequence: u32,
    pub request_id: u64,
    pub payload: Bytes,
}

impl DataPacket {
    /// Create a new packet with the given type and payload
    pub fn new(kind: PacketKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            sequence: 0,
            request_id: 0,
            payload: payload.into(),
        }
    }

    /// Create a text packet
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(PacketKind::Text, payload)
    }

    /// Create an empty heartbeat packet
    pub fn heartbeat() -> Self {
        Self::new(PacketKind::HeartBeat, Bytes::new())
    }

    /// Tag the packet with a request id echoed back on replies
    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = request_id;
        self
    }

    /// Get the total encoded size of this packet
    pub fn encoded_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len() + PACKET_HASH_SIZE
    }

    /// Encode this packet into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.reserve(self.encoded_size());
        buf.put_u32(self.encoded_size() as u32);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.sequence);
        buf.put_u64(self.request_id);
        buf.put_slice(&self.payload);
        let digest = Sha256::digest(&buf[start..]);
        buf.put_slice(&digest);
    }

    /// Encode this packet into a new Bytes
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a single packet from a byte slice
    ///
    /// The slice must hold at least the declared `total_length` bytes;
    /// trailing bytes beyond the declared length are ignored.
    pub fn decode(data: &[u8]) -> Result<DataPacket> {
        if data.len() < 4 {
            return Err(ChatError::IncompletePackage);
        }

        let mut cursor = &data[..];
        let total_length = cursor.get_u32() as usize;
        if total_length == 0 {
            return Err(ChatError::EmptyLength);
        }
        if total_length < MIN_PACKET_SIZE {
            return Err(ChatError::DataTooSmall);
        }
        if total_length > MAX_PACKET_SIZE {
            return Err(ChatError::DataTooLarge);
        }
        if data.len() < total_length {
            return Err(ChatError::IncompletePackage);
        }

        let hashed_end = total_length - PACKET_HASH_SIZE;
        let expected = &data[hashed_end..total_length];
        let actual = Sha256::digest(&data[..hashed_end]);
        if expected != actual.as_slice() {
            return Err(ChatError::HashMismatched);
        }

        let kind_byte = cursor.get_u8();
        let kind = PacketKind::from_u8(kind_byte).ok_or_else(|| {
            ChatError::invalid_data(format!("unknown packet type: 0x{:02X}", kind_byte))
        })?;
        let sequence = cursor.get_u32();
        let request_id = cursor.get_u64();
        let payload = Bytes::copy_from_slice(&data[PACKET_HEADER_SIZE..hashed_end]);

        Ok(DataPacket {
            kind,
            sequence,
            request_id,
            payload,
        })
    }
}

/// Reassembly buffer turning a byte stream back into packets
///
/// `can_read` returns true iff at least one complete packet is buffered
/// (or the buffered header is already malformed, in which case `read`
/// surfaces the framing error); `read` removes exactly one packet.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buffer: BytesMut,
}

impl PacketBuffer {
    /// Create a new empty reassembly buffer
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Feed received bytes into the buffer
    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Check whether a whole packet is available
    pub fn can_read(&self) -> bool {
        if self.buffer.len() < 4 {
            return false;
        }
        let declared = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        // A malformed length never completes; report readable so that
        // read() can fail the connection with the precise error.
        if declared < MIN_PACKET_SIZE || declared > MAX_PACKET_SIZE {
            return true;
        }
        self.buffer.len() >= declared
    }

    /// Remove and decode exactly one packet
    pub fn read(&mut self) -> Result<DataPacket> {
        if self.buffer.len() < 4 {
            return Err(ChatError::IncompletePackage);
        }
        let declared = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if declared == 0 {
            return Err(ChatError::EmptyLength);
        }
        if declared < MIN_PACKET_SIZE {
            return Err(ChatError::DataTooSmall);
        }
        if declared > MAX_PACKET_SIZE {
            return Err(ChatError::DataTooLarge);
        }
        if self.buffer.len() < declared {
            return Err(ChatError::IncompletePackage);
        }

        let frame = self.buffer.split_to(declared);
        DataPacket::decode(&frame)
    }

    /// Number of buffered, not yet consumed bytes
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
