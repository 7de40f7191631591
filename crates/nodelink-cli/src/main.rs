#![deny(unsafe_code)]

//! nodelink CLI: talk to a local node's payload API from the shell.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use nodelink_config::NodeLinkConfig;
use nodelink_core::{NodeClient, TransportConfig};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// nodelink: send and receive payloads through a local node over its Unix socket.
#[derive(Parser)]
#[command(name = "nodelink", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "nodelink.toml")]
    config: PathBuf,

    /// Node socket path. Overrides `node.socket_path` from the config.
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that one or more nodes are up.
    Upcheck {
        /// Sockets to check. Defaults to the configured node.
        sockets: Vec<PathBuf>,
    },

    /// Send a payload and print its distribution key (base64).
    Send {
        /// Recipient public key (base64). Repeat for several recipients.
        #[arg(long = "to", required = true)]
        to: Vec<String>,

        /// Sender public key (base64). Defaults to `identity.public_key`.
        #[arg(long)]
        from: Option<String>,

        /// Read the payload from a file.
        #[arg(long, conflicts_with = "data")]
        file: Option<PathBuf>,

        /// Payload text. Read from stdin when neither this nor --file is given.
        data: Option<String>,
    },

    /// Fetch a payload by its distribution key (base64).
    Receive {
        key: String,

        /// Write the payload to a file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Check two nodes, send through the first and read back through the second.
    Relay {
        /// Socket of the sending node.
        #[arg(long)]
        from_socket: PathBuf,

        /// Socket of the receiving node.
        #[arg(long)]
        to_socket: PathBuf,

        /// Recipient public key (base64). Repeat for several recipients.
        #[arg(long = "to", required = true)]
        to: Vec<String>,

        /// Sender public key (base64). Defaults to `identity.public_key`.
        #[arg(long)]
        from: Option<String>,

        /// Payload text.
        data: String,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, from_file) = load_config(&cli.config).await?;

    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if !from_file {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let socket = cli.socket.clone().unwrap_or_else(|| config.socket_path());
    let transport = config.transport_config();

    match cli.command {
        Commands::Upcheck { sockets } => {
            let sockets = if sockets.is_empty() {
                vec![socket]
            } else {
                sockets
            };
            cmd_upcheck(&sockets, transport).await?;
        }
        Commands::Send {
            to,
            from,
            file,
            data,
        } => {
            let payload = read_payload(file.as_deref(), data).await?;
            let sender = from.or_else(|| config.identity.public_key.clone());
            let client = NodeClient::with_config(&socket, transport)?;
            let key = cmd_send(&client, &payload, sender.as_deref(), &to).await?;
            println!("{key}");
        }
        Commands::Receive { key, out } => {
            let client = NodeClient::with_config(&socket, transport)?;
            let payload = cmd_receive(&client, &key).await?;
            write_payload(out.as_deref(), &payload).await?;
        }
        Commands::Relay {
            from_socket,
            to_socket,
            to,
            from,
            data,
        } => {
            let sender = from.or_else(|| config.identity.public_key.clone());
            let source = NodeClient::with_config(&from_socket, transport)?;
            let target = NodeClient::with_config(&to_socket, transport)?;
            let payload =
                cmd_relay(&source, &target, data.as_bytes(), sender.as_deref(), &to).await?;
            println!("{}", String::from_utf8_lossy(&payload));
        }
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

async fn cmd_upcheck(sockets: &[PathBuf], transport: TransportConfig) -> Result<()> {
    for socket in sockets {
        NodeClient::with_config(socket, transport)?
            .upcheck()
            .await
            .with_context(|| format!("node at '{}' failed upcheck", socket.display()))?;
        println!("{}: up", socket.display());
    }
    Ok(())
}

/// Send `payload` and return the distribution key as base64.
async fn cmd_send(
    client: &NodeClient,
    payload: &[u8],
    sender: Option<&str>,
    recipients: &[String],
) -> Result<String> {
    let key = client
        .send_payload(payload, sender, recipients)
        .await
        .context("send failed")?;
    Ok(STANDARD.encode(key))
}

async fn cmd_receive(client: &NodeClient, key: &str) -> Result<Vec<u8>> {
    let key = STANDARD
        .decode(key.trim())
        .context("distribution key is not valid base64")?;
    client.receive_payload(&key).await.context("receive failed")
}

async fn cmd_relay(
    source: &NodeClient,
    target: &NodeClient,
    payload: &[u8],
    sender: Option<&str>,
    recipients: &[String],
) -> Result<Vec<u8>> {
    for node in [source, target] {
        node.upcheck().await.with_context(|| {
            format!("node at '{}' failed upcheck", node.socket_path().display())
        })?;
    }

    let key = source
        .send_payload(payload, sender, recipients)
        .await
        .context("send through source node failed")?;
    info!(key = %STANDARD.encode(&key), "payload distributed");

    target
        .receive_payload(&key)
        .await
        .context("receive through target node failed")
}

fn cmd_config(config_path: &Path, config: &NodeLinkConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Load the config file, falling back to defaults when it does not exist.
/// The flag reports whether the file was found.
async fn load_config(path: &Path) -> Result<(NodeLinkConfig, bool)> {
    if path.exists() {
        let config = NodeLinkConfig::load(path)
            .await
            .with_context(|| format!("invalid config at '{}'", path.display()))?;
        Ok((config, true))
    } else {
        Ok((NodeLinkConfig::default(), false))
    }
}

async fn read_payload(file: Option<&Path>, data: Option<String>) -> Result<Vec<u8>> {
    if let Some(path) = file {
        return tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read payload from '{}'", path.display()));
    }
    if let Some(data) = data {
        return Ok(data.into_bytes());
    }
    let mut buf = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut buf)
        .await
        .context("failed to read payload from stdin")?;
    Ok(buf)
}

async fn write_payload(out: Option<&Path>, payload: &[u8]) -> Result<()> {
    match out {
        Some(path) => tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write payload to '{}'", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(payload)?;
            stdout.flush()?;
            Ok(())
        }
    }
}
