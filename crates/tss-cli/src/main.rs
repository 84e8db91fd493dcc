//! TSS CLI
//!
//! Command-line front for the ceremony coordinator:
//! - Wallet creation (distributed key generation on the cluster)
//! - Signing a 32-byte digest with a wallet's share
//! - Showing a stored wallet

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tss_client::{HttpControlPlane, WsBroker};
use tss_core::{Coordinator, CoordinatorConfig, PartyId, SessionId};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// TSS CLI - MPC custody ceremonies
#[derive(Parser)]
#[command(name = "tss-cli")]
#[command(about = "Create threshold wallets and sign digests through an MPC cluster")]
#[command(version)]
struct Cli {
    /// Cluster control-plane URL
    #[arg(long, env = "TSS_CONTROL_PLANE_URL", default_value = "http://127.0.0.1:50051")]
    control_plane: String,

    /// Result broker URL
    #[arg(long, env = "TSS_BROKER_URL", default_value = "ws://127.0.0.1:8090")]
    broker: String,

    /// Participating party IDs (comma-separated)
    #[arg(long, env = "TSS_PARTIES", value_delimiter = ',', default_value = "1,2,3")]
    parties: Vec<PartyId>,

    /// Threshold (t-of-n)
    #[arg(short, long, env = "TSS_THRESHOLD", default_value = "2")]
    threshold: u32,

    /// Per-ceremony timeout in seconds
    #[arg(long, env = "TSS_TIMEOUT_SECS", default_value = "300")]
    timeout: u64,

    /// Subscribe to the result channel before triggering the ceremony
    #[arg(long)]
    subscribe_first: bool,

    /// Data directory for wallet files
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a wallet through distributed key generation
    Keygen {
        /// Session id (random when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Sign a digest with a stored wallet
    Sign {
        /// Keygen session id of the wallet
        #[arg(short, long)]
        wallet: String,

        /// Digest to sign (hex encoded, 32 bytes)
        #[arg(long)]
        hash: String,

        /// Session id for this signing ceremony (random when omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Chain id used for the EIP-155 `v` value
        #[arg(long)]
        chain_id: Option<u64>,
    },

    /// Show a stored wallet
    Info {
        /// Keygen session id of the wallet
        #[arg(short, long)]
        wallet: String,
    },
}

/// Wallet as stored on disk
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct WalletFile {
    session_id: String,
    address: String,
    /// Base64 key share
    share_data: String,
}

type CliCoordinator = Coordinator<HttpControlPlane, WsBroker>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Ensure data directory exists
    std::fs::create_dir_all(&cli.dest)?;

    match &cli.command {
        Commands::Keygen { session } => {
            let coordinator = build_coordinator(&cli)?;
            run_keygen(&cli, &coordinator, session.as_deref()).await?;
        }
        Commands::Sign {
            wallet,
            hash,
            session,
            chain_id,
        } => {
            let coordinator = build_coordinator(&cli)?;
            run_sign(&cli, &coordinator, wallet, hash, session.as_deref(), *chain_id).await?;
        }
        Commands::Info { wallet } => {
            show_info(&cli, wallet)?;
        }
    }

    Ok(())
}

fn build_coordinator(cli: &Cli) -> Result<CliCoordinator> {
    let config = CoordinatorConfig::new(cli.parties.clone(), cli.threshold)?
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_subscribe_before_trigger(cli.subscribe_first);

    info!(
        control_plane = %cli.control_plane,
        broker = %cli.broker,
        parties = ?config.parties,
        threshold = config.threshold,
        "Coordinator configured"
    );

    Ok(Coordinator::new(
        HttpControlPlane::new(&cli.control_plane),
        WsBroker::new(&cli.broker),
        config,
    )?)
}

fn resolve_session(requested: Option<&str>) -> Result<SessionId> {
    match requested {
        Some(id) => Ok(SessionId::new(id)?),
        None => Ok(SessionId::random()),
    }
}

async fn run_keygen(cli: &Cli, coordinator: &CliCoordinator, session: Option<&str>) -> Result<()> {
    let session_id = resolve_session(session)?;

    let material = coordinator.create_wallet(&session_id).await?;

    let wallet = WalletFile {
        session_id: session_id.to_string(),
        address: material.address().to_string(),
        share_data: STANDARD.encode(material.share()),
    };
    let path = wallet_path(&cli.dest, &session_id);
    write_private(&path, &serde_json::to_vec_pretty(&wallet)?)?;

    info!(address = %wallet.address, path = ?path, "Wallet created, share saved");

    println!("Session: {}", session_id);
    println!("Address: {}", wallet.address);

    Ok(())
}

async fn run_sign(
    cli: &Cli,
    coordinator: &CliCoordinator,
    wallet_id: &str,
    hash: &str,
    session: Option<&str>,
    chain_id: Option<u64>,
) -> Result<()> {
    let wallet = load_wallet(&cli.dest, wallet_id)?;
    let message_hash = parse_hash(hash)?;
    let session_id = resolve_session(session)?;

    let share = zeroize::Zeroizing::new(
        STANDARD
            .decode(&wallet.share_data)
            .context("wallet share is not valid base64")?,
    );

    let signature = coordinator
        .sign(&session_id, &share, &message_hash, &wallet.address)
        .await?;

    let v = signature
        .v(chain_id)
        .ok_or_else(|| anyhow::anyhow!("Chain id too large for a v value"))?;

    // Print signature
    println!("Signature:");
    println!("  r: {}", hex::encode(signature.r));
    println!("  s: {}", hex::encode(signature.s));
    println!("  v: {}", v);
    println!("  bytes: {}", hex::encode(signature.to_bytes()));

    Ok(())
}

fn show_info(cli: &Cli, wallet_id: &str) -> Result<()> {
    let wallet = load_wallet(&cli.dest, wallet_id)?;

    println!("Wallet Info:");
    println!("  Session: {}", wallet.session_id);
    println!("  Address: {}", wallet.address);
    println!("  Share: {} bytes", STANDARD.decode(&wallet.share_data)?.len());

    Ok(())
}

fn parse_hash(hash: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hash.trim_start_matches("0x"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Hash must be 32 bytes"))
}

fn wallet_path(dest: &Path, session_id: &SessionId) -> PathBuf {
    dest.join(format!("share.{}.json", session_id))
}

fn load_wallet(dest: &Path, wallet_id: &str) -> Result<WalletFile> {
    let wallet_id = SessionId::new(wallet_id).context("invalid wallet id")?;
    let path = wallet_path(dest, &wallet_id);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading wallet file {}", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

/// Write a file readable only by the owner where the platform allows it
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    Ok(())
}
