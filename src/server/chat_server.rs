//! TLS chat server: listener, admission control and session loops
//!
//! The listener applies the rate limiter before the TLS handshake, then
//! hands each connection to a session task: connectivity probe first,
//! then the framed request/reply loop. Every exit path deregisters the
//! connection from the manager (and thereby from its bound user).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, Result};
use crate::protocol::frame::{DataPacket, PacketBuffer, PacketKind};
use crate::registry::manager::Manager;
use crate::server::commands::CommandRegistry;
use crate::server::processor::MessageProcessor;
use crate::transport::connection::Connection;
use crate::transport::rate_limit::RateLimiter;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// PEM certificate chain; paired with `key_path`
    pub cert_path: Option<PathBuf>,
    /// PEM private key; paired with `cert_path`
    pub key_path: Option<PathBuf>,
    /// Watchdog deadline for a single request
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 55555,
            cert_path: None,
            key_path: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// The TLS-terminating connection server
pub struct ChatServer {
    config: ServerConfig,
    manager: Arc<Manager>,
    commands: Arc<CommandRegistry>,
    rate_limiter: Arc<RateLimiter>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            manager: Arc::new(Manager::new()),
            commands: Arc::new(CommandRegistry::new()),
            rate_limiter: Arc::new(RateLimiter::default()),
        }
    }

    /// The central registry backing this server
    pub fn manager(&self) -> Arc<Manager> {
        Arc::clone(&self.manager)
    }

    /// Bind the listening socket with the tuned options applied
    pub async fn bind_listener(&self) -> Result<TcpListener> {
        let ip: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|_| ChatError::network(format!("invalid listen host: {}", self.config.host)))?;
        let addr = SocketAddr::new(ip, self.config.port);

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_recv_buffer_size(1024 * 1024)?;
        socket.bind(addr)?;
        Ok(socket.listen(1024)?)
    }

    /// Bind and serve until the accept loop fails
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind_listener().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let tls_config = self.build_tls_config()?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        info!("Server listening on {}", listener.local_addr()?);
        let sweeper = self.rate_limiter.spawn_sweeper();

        let result = loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => break Err(ChatError::from(e)),
            };

            if !self.rate_limiter.allow_connection(addr.ip()) {
                debug!("[{}] rejected by the rate limiter", addr);
                drop(stream);
                continue;
            }

            let acceptor = acceptor.clone();
            let manager = Arc::clone(&self.manager);
            let commands = Arc::clone(&self.commands);
            let request_timeout = self.config.request_timeout;
            tokio::spawn(async move {
                serve_connection(acceptor, stream, addr, manager, commands, request_timeout)
                    .await;
            });
        };

        sweeper.abort();
        result
    }

    /// Build the rustls configuration from files, or a self-signed
    /// development certificate when no paths are configured
    fn build_tls_config(&self) -> Result<rustls::ServerConfig> {
        let (cert_chain, key) = match (&self.config.cert_path, &self.config.key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!(
                    "loading TLS cert {} / key {}",
                    cert_path.display(),
                    key_path.display()
                );
                (load_cert_chain(cert_path)?, load_private_key(key_path)?)
            }
            (None, None) => {
                warn!("no TLS certificate configured; generating a self-signed one");
                let ck = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
                    .map_err(|e| ChatError::network(format!("generate certificate: {}", e)))?;
                let cert = CertificateDer::from(ck.cert.der().to_vec());
                let key = PrivateKeyDer::try_from(ck.key_pair.serialize_der())
                    .map_err(|e| ChatError::network(format!("parse generated key: {}", e)))?;
                (vec![cert], key)
            }
            _ => return Err(ChatError::MissingTlsConfig),
        };

        rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| ChatError::network(format!("build TLS config: {}", e)))
    }
}

fn load_cert_chain(path: &PathBuf) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path)?;
    let mut reader = std::io::BufReader::new(&pem[..]);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| ChatError::network(format!("parse TLS certs: {}", e)))?;
    if certs.is_empty() {
        return Err(ChatError::MissingTlsConfig);
    }
    Ok(certs)
}

fn load_private_key(path: &PathBuf) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read(path)?;
    let mut reader = std::io::BufReader::new(&pem[..]);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ChatError::network(format!("parse TLS key: {}", e)))?
        .ok_or(ChatError::MissingTlsConfig)
}

/// Handshake, register, run the session, deregister
async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    addr: SocketAddr,
    manager: Arc<Manager>,
    commands: Arc<CommandRegistry>,
    request_timeout: Duration,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("[{}] TLS handshake failed: {}", addr, e);
            return;
        }
    };

    let (read_half, write_half) = tokio::io::split(tls_stream);
    let connection = Connection::start(addr, write_half);
    if let Err(e) = manager.register_connection(&connection) {
        error!("[{}] could not register connection: {}", addr, e);
        return;
    }
    info!("[{}] connected to the server", addr);

    match run_session(&connection, read_half, &manager, &commands, request_timeout).await {
        Ok(()) => info!("[{}] disconnected from the server", addr),
        Err(e) => error!("[{}] {}", addr, e),
    }

    connection.close();
    if let Err(e) = manager.remove_connection(connection.id()) {
        warn!("[{}] deregistration failed: {}", addr, e);
    }
}

/// Probe phase followed by the framed request/reply loop
async fn run_session<R>(
    connection: &Arc<Connection>,
    mut reader: R,
    manager: &Arc<Manager>,
    commands: &Arc<CommandRegistry>,
    request_timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = PacketBuffer::new();
    let mut chunk = [0u8; 8192];

    // The first framed message must be the connectivity probe; heartbeats
    // are discarded silently at any time.
    'probe: loop {
        while buffer.can_read() {
            let packet = buffer.read()?;
            if packet.kind == PacketKind::HeartBeat {
                continue;
            }
            if packet.kind != PacketKind::Text || packet.payload != &b"test"[..] {
                return Err(ChatError::ConnectionTestFailed);
            }
            break 'probe;
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.write(&chunk[..n]);
    }

    let processor = MessageProcessor::new(
        Arc::clone(manager),
        Arc::clone(commands),
        Arc::clone(connection),
    );

    loop {
        while buffer.can_read() {
            let packet = buffer.read()?;
            if packet.kind == PacketKind::HeartBeat {
                continue;
            }

            // Watchdog: a handler running past its deadline tears the
            // whole connection down like any other I/O failure.
            let reply = tokio::time::timeout(request_timeout, processor.process_packet(&packet))
                .await
                .map_err(|_| ChatError::TimedOut)?;

            let reply_packet =
                DataPacket::text(reply.to_string()).with_request_id(packet.request_id);
            connection.send(reply_packet.encode_to_bytes());
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.write(&chunk[..n]);
    }
}
