// ============================================
// File: crates/warden-server/src/main.rs
// ============================================
//! # Warden Server Entry Point
//!
//! ## Creation Reason
//! Binary for the Warden control plane. Handles CLI parsing, logging setup
//! and server start-up.
//!
//! ## Usage
//! ```bash
//! warden-server start                       # run the control plane
//! warden-server validate                    # check the config file
//! warden-server pubkey                      # print key + fingerprint
//! warden-server rotate-key                  # offline key rotation
//! ```
//! Registration tokens are issued over the admin HTTP API
//! (`POST /api/v1/admin/tokens`), never from the CLI.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `rotate-key` does not notify agents; use the admin API while the
//!   server is running unless every agent will be re-pinned by hand
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use warden_core::PublicKeyInfo;
use warden_server::services::KeyStore;
use warden_server::{Server, ServerConfig};

const DEFAULT_CONFIG: &str = "/etc/warden/server.toml";

// ============================================
// CLI Definition
// ============================================

/// Warden control plane
#[derive(Parser, Debug)]
#[command(name = "warden-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Show the control-plane public key, generating it if absent
    Pubkey {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Print the `/api/v1/public-key` JSON body instead of text
        #[arg(long)]
        json: bool,
    },

    /// Replace the control-plane key file (agents are NOT notified)
    RotateKey {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Print the default configuration as TOML
    #[command(hide = true)]
    DefaultConfig,
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging("info");

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
        Commands::Pubkey { config, json } => cmd_pubkey(config, json).await,
        Commands::RotateKey { config } => cmd_rotate_key(config).await,
        Commands::DefaultConfig => {
            print!("{}", ServerConfig::default().to_toml());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the server.
async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;

    // Re-initialize logging with config level
    init_logging(&config.logging.level);

    if config.admin.api_token.is_none() {
        warn!("No admin token configured; admin API and observer stream are disabled");
    }

    let server = Server::new(config);
    server.run().await?;
    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Server will use default values.");
        return Ok(());
    }

    let config = ServerConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Listen:             {}", config.listen_addr());
    println!("   Max frame:          {} bytes", config.network.max_frame_size);
    println!();
    println!("Keys:");
    println!("   Key file:           {}", config.keys.key_file);
    println!(
        "   Directory snapshot: {}",
        config.directory.snapshot_file.as_deref().unwrap_or("(memory only)")
    );
    println!();
    println!("Handshake:");
    println!("   Challenge timeout:  {}s", config.handshake.challenge_timeout_secs);
    println!("   Auth deadline:      {}s", config.handshake.auth_deadline_secs);
    println!("   Token TTL:          {}s", config.registration.token_ttl_secs);
    println!();
    let admin = if config.admin.api_token.is_some() {
        "enabled"
    } else {
        "disabled"
    };
    println!("Admin API:            {admin}");
    println!("Max connections:      {}", config.limits.max_connections);
    println!();

    Ok(())
}

/// Shows the control-plane public key.
async fn cmd_pubkey(config_path: PathBuf, as_json: bool) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let store = KeyStore::new(&config.keys.key_file);
    let keys = store.get_or_generate_keys().await?;

    if as_json {
        let info = PublicKeyInfo::for_key(keys.public_key());
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Public key:   {}", keys.public_key().to_base64());
        println!("Fingerprint:  {}", keys.fingerprint());
    }
    Ok(())
}

/// Rotates the key file while the server is stopped.
async fn cmd_rotate_key(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let store = KeyStore::new(&config.keys.key_file);
    let rotation = store.rotate_keys().await?;

    info!(path = %store.path().display(), "Key file rotated");
    println!("✅ Control-plane key rotated");
    println!();
    println!("   Previous:  {}", rotation.previous.fingerprint());
    println!("   Current:   {}", rotation.current.fingerprint());
    println!();
    println!("⚠️  Connected agents were not notified. Re-pin them with:");
    println!("   {}", rotation.current.public_key().to_base64());
    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads config, falling back to defaults if the file does not exist.
async fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    if path.exists() {
        Ok(ServerConfig::load(path).await?)
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Ok(ServerConfig::default())
    }
}
