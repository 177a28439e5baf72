//! A live TLS-terminated peer socket with a serialized write path
//!
//! Each connection owns exactly one TLS stream. The write half is drained
//! by a dedicated writer task fed from an unbounded queue, so concurrent
//! senders enqueue and writes to the stream never interleave. The read
//! half stays with the session loop that accepted the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Identity of a connection, used as the key in the manager's tables
pub type ConnectionId = Uuid;

/// Commands accepted by the writer task
#[derive(Debug)]
enum WriteCommand {
    /// Write the bytes to the stream as one uninterrupted unit
    Send(Bytes),
    /// Flush and shut the stream down
    Shutdown,
}

/// Handle to one peer connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    write_tx: mpsc::UnboundedSender<WriteCommand>,
}

impl Connection {
    /// Take ownership of a write half and start the writer task
    pub fn start<W>(addr: SocketAddr, writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write_rx, writer, addr));
        Arc::new(Self {
            id: Uuid::new_v4(),
            addr,
            write_tx,
        })
    }

    /// Get the connection identity
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the remote peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Enqueue bytes on the serialized write path
    ///
    /// Returns immediately; the writer task performs the socket write.
    /// Sends after the peer disconnected are dropped silently.
    pub fn send(&self, data: Bytes) {
        let _ = self.write_tx.send(WriteCommand::Send(data));
    }

    /// Ask the writer task to flush pending data and close the stream
    pub fn close(&self) {
        let _ = self.write_tx.send(WriteCommand::Shutdown);
    }
}

async fn write_loop<W>(
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
    mut writer: W,
    addr: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Send(data) => {
                if let Err(e) = writer.write_all(&data).await {
                    debug!("[{}] write failed: {}", addr, e);
                    break;
                }
            }
            WriteCommand::Shutdown => break,
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:55555".parse().unwrap()
    }

    #[tokio::test]
    async fn test_sends_are_written_in_order() {
        let (server_side, mut client_side) = tokio::io::duplex(4096);
        let conn = Connection::start(test_addr(), server_side);

        conn.send(Bytes::from_static(b"alpha "));
        conn.send(Bytes::from_static(b"beta "));
        conn.send(Bytes::from_static(b"gamma"));
        conn.close();

        let mut received = Vec::new();
        client_side.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"alpha beta gamma");
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (server_side, mut client_side) = tokio::io::duplex(64 * 1024);
        let conn = Connection::start(test_addr(), server_side);

        let mut tasks = Vec::new();
        for marker in 0u8..8 {
            let conn = Arc::clone(&conn);
            tasks.push(tokio::spawn(async move {
                conn.send(Bytes::from(vec![marker; 1024]));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        conn.close();

        let mut received = Vec::new();
        client_side.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 8 * 1024);
        for block in received.chunks(1024) {
            assert!(block.iter().all(|b| *b == block[0]));
        }
    }

    #[tokio::test]
    async fn test_close_shuts_the_stream_down() {
        let (server_side, mut client_side) = tokio::io::duplex(4096);
        let conn = Connection::start(test_addr(), server_side);
        conn.close();

        let mut buf = [0u8; 16];
        let n = client_side.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_ids_are_distinct() {
        let (a_side, _a) = tokio::io::duplex(16);
        let (b_side, _b) = tokio::io::duplex(16);
        let a = Connection::start(test_addr(), a_side);
        let b = Connection::start(test_addr(), b_side);
        assert_ne!(a.id(), b.id());
    }
}
