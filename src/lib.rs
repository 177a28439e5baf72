//! Parley - server-side core of a multi-user chat service
//!
//! This library implements the concurrent connection engine and the
//! in-memory domain registry behind it:
//!
//! - **Transport**: a TLS-terminating listener with dual token-bucket
//!   admission control, framed packets with an integrity checksum, and a
//!   strictly serialized write path per connection.
//! - **Dispatch**: a per-connection JSON command protocol with a typed
//!   parameter schema, a login gate, and handlers executing off the I/O
//!   path under a request watchdog.
//! - **Domain**: users with per-device endpoints, private and group
//!   rooms with time-ordered message logs, background pruning, and a
//!   verification subsystem governing friendships and group membership.
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> parley::Result<()> {
//!     let server = ChatServer::new(ServerConfig::default());
//!     server.run().await
//! }
//! ```

pub mod error;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;
pub mod transport;

// Re-export error types
pub use error::{ChatError, Result};

// Re-export protocol types
pub use protocol::{
    frame::{DataPacket, PacketBuffer, PacketKind},
    make_error_message, make_success_message,
};

// Re-export registry types
pub use registry::{DeviceKind, GroupId, Manager, User, UserId, VerificationManager};

// Re-export room types
pub use room::{GroupRoom, MessageKind, MessageLog, MessageRecord, PrivateRoom};

// Re-export server types
pub use server::{ChatServer, Command, CommandRegistry, MessageProcessor, ServerConfig};

// Re-export transport types
pub use transport::{Connection, ConnectionId, RateLimiter};
