//! Quill daemon — entry point for running a Quill node.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, TcpStream};

use quill_crypto::keypair_from_seed;
use quill_messages::ParseError;
use quill_network::{read_frame, Channel, NetworkError, TcpSink};
use quill_node::{Node, NodeConfig};
use quill_store::{Table, Writer};
use quill_types::ProtocolInfo;
use quill_utils::{init_logging, LogFormat, LogPreset};

/// Deterministic genesis seed for the development network.
const DEV_GENESIS_SEED: [u8; 32] = [0u8; 32];

#[derive(Parser)]
#[command(name = "quill-daemon", about = "Quill protocol node daemon")]
struct Cli {
    /// Network to connect to: "live", "beta", "test", or "dev".
    #[arg(long, env = "QUILL_NETWORK")]
    network: Option<String>,

    /// Port for peering connections (defaults to the network default).
    #[arg(long, env = "QUILL_PORT")]
    port: Option<u16>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "QUILL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "QUILL_LOG_FORMAT")]
    log_format: Option<String>,

    /// Path to a TOML configuration file. File settings are the base;
    /// CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<NodeConfig, quill_node::NodeError> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(&path.to_string_lossy())?,
        None => NodeConfig::default(),
    };
    if let Some(network) = &cli.network {
        config.network = match network.as_str() {
            "live" => quill_types::NetworkId::Live,
            "beta" => quill_types::NetworkId::Beta,
            "test" => quill_types::NetworkId::Test,
            "dev" => quill_types::NetworkId::Dev,
            other => {
                return Err(quill_node::NodeError::Config(format!(
                    "unknown network '{other}'"
                )))
            }
        };
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    Ok(config)
}

fn main() -> Result<(), quill_node::NodeError> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let format = match config.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Human,
    };
    init_logging(LogPreset::Daemon, format, &config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.io_thread_count())
        .enable_all()
        .thread_name("io")
        .build()?;

    let node = Node::new(config);

    // A fresh dev store gets the deterministic development genesis; on
    // other networks an empty ledger fills in over bootstrap.
    if node.config.network.is_dev() && node.store.block_count() == 0 {
        let genesis = keypair_from_seed(&DEV_GENESIS_SEED);
        let tx = node.store.tx_begin_write(
            Writer::Generic,
            &[
                Table::Accounts,
                Table::Blocks,
                Table::Pending,
                Table::ConfirmationHeight,
            ],
        );
        node.ledger.initialize(&tx, &genesis);
        tracing::info!(account = %genesis.public, "seeded development genesis");
    }

    node.start();

    runtime.block_on(async {
        let port = node.config.peering_port();
        let listener =
            TcpListener::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))).await?;
        tracing::info!(port, "listening for peers");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => {
                            tracing::debug!(%remote, "peer connected");
                            spawn_peer(Arc::clone(&node), stream, remote);
                        }
                        Err(error) => {
                            tracing::warn!(%error, "accept failed");
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }
        Ok::<(), std::io::Error>(())
    })?;

    node.stop();
    Ok(())
}

/// Wire one peer connection: a writer task behind a [`Channel`] and a
/// read loop feeding parsed messages into the node.
fn spawn_peer(node: Arc<Node>, stream: TcpStream, remote: SocketAddr) {
    let remote = match remote {
        SocketAddr::V6(addr) => addr,
        SocketAddr::V4(addr) => {
            SocketAddrV6::new(addr.ip().to_ipv6_mapped(), addr.port(), 0, 0)
        }
    };
    let (mut read_half, write_half) = stream.into_split();
    let sink = TcpSink::spawn(write_half);
    let channel = Channel::new(
        remote,
        node.config.network,
        ProtocolInfo::default(),
        sink,
        Arc::clone(&node.limiter),
        Arc::clone(&node.stats),
    );
    node.registry.add(Arc::clone(&channel));

    tokio::spawn(async move {
        let network = node.config.network;
        let protocol = ProtocolInfo::default();
        loop {
            match read_frame(&mut read_half, network, protocol).await {
                Ok(message) => node.process_message(message, &channel),
                Err(NetworkError::Parse(error)) => {
                    let detail = match error {
                        ParseError::InvalidNetwork => "invalid_network",
                        ParseError::OutdatedVersion => "outdated_version",
                        ParseError::InvalidMessageType => "invalid_type",
                        ParseError::InvalidHeader => "invalid_header",
                        ParseError::SizeTooLarge => "size_too_large",
                        ParseError::Generic => "malformed",
                    };
                    tracing::debug!(%remote, detail, "closing channel on protocol error");
                    channel.close();
                    break;
                }
                Err(_) => {
                    tracing::debug!(%remote, "peer disconnected");
                    channel.close();
                    break;
                }
            }
        }
    });
}
