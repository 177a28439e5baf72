//! Server layer: listener, dispatcher and the command vocabulary
//!
//! Data flows listener → rate limiter → TLS handshake → probe → framed
//! read loop → message processor → command handler → registries → room
//! fanout → per-connection write queue.

pub mod chat_server;
pub mod commands;
pub mod processor;

// Re-export commonly used types
pub use chat_server::{ChatServer, ServerConfig};
pub use commands::{Command, CommandRegistry};
pub use processor::MessageProcessor;
