//! Parley chat server binary
//!
//! Usage:
//!   parley [--bind host:port] [--cert cert.pem --key key.pem]
//!
//! Without a certificate pair the server runs on a self-signed
//! development certificate.

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use parley::{ChatServer, ServerConfig};

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: parley [--bind host:port] [--cert cert.pem --key key.pem]\n\
\n\
Options:\n\
\t--bind    Listen endpoint (default: 0.0.0.0:55555)\n\
\t--cert    PEM certificate chain\n\
\t--key     PEM private key\n\
\t--help    Show this help\n"
    );
    std::process::exit(2)
}

fn parse_args() -> ServerConfig {
    let mut config = ServerConfig::default();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--help" | "-h" => usage_and_exit(),
            "--bind" | "--listen" => {
                let value = it.next().unwrap_or_else(|| usage_and_exit());
                let addr: SocketAddr = value.parse().unwrap_or_else(|_| {
                    eprintln!("--bind must be host:port with an IP literal");
                    usage_and_exit();
                });
                config.host = addr.ip().to_string();
                config.port = addr.port();
            }
            "--cert" => {
                let value = it.next().unwrap_or_else(|| usage_and_exit());
                config.cert_path = Some(PathBuf::from(value));
            }
            "--key" => {
                let value = it.next().unwrap_or_else(|| usage_and_exit());
                config.key_path = Some(PathBuf::from(value));
            }
            other => {
                eprintln!("Unknown argument: {other}");
                usage_and_exit();
            }
        }
    }

    config
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() -> anyhow::Result<()> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(12);

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    init_tracing();

    let config = parse_args();
    let server = ChatServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    Ok(())
}
