use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::errors::SessionError;
use solana_sdk::pubkey::Pubkey;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use session::allowance::AllowanceManager;
use session::config::Config;
use session::play_session::{FileStore, PlaySessionCache};
use session::solana_client::SolanaRpcEndpoint;
use session::wallet::{load_wallet_keypair, Wallet};

#[derive(Parser, Debug)]
#[command(name = "session", version, about = "Manage casino vault play sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every address derived for the wallet
    Addresses,
    /// Show the casino and the wallet's vault
    Vault,
    /// Deposit lamports into the vault
    Deposit { lamports: u64 },
    /// Withdraw lamports from the vault
    Withdraw { lamports: u64 },
    /// Approve a new allowance at the next nonce
    Approve {
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        duration: i64,
    },
    /// Create the next allowance with a new duration
    Extend {
        #[arg(long)]
        duration: i64,
        #[arg(long)]
        amount: Option<u64>,
    },
    /// Revoke an allowance by address
    Revoke { allowance: Pubkey },
    /// Find the active allowance
    Active {
        /// Skip the play session cache and scan every nonce
        #[arg(long)]
        no_cache: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "session=info".into());

    // Logs go to stderr so stdout stays machine-readable
    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    tracing::info!(
        service = "session",
        version = env!("CARGO_PKG_VERSION"),
        rpc_url = %config.solana.rpc_url,
        program_id = %config.solana.vault_program_id,
        "Starting session client"
    );

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        tracing::info!("Session metrics listening on {}", addr);
    }

    let keypair_path = config
        .wallet_keypair_path
        .as_deref()
        .context("WALLET_KEYPAIR must be set")?;
    let wallet = Wallet::from_keypair(load_wallet_keypair(keypair_path)?);

    let endpoint = Arc::new(SolanaRpcEndpoint::new(
        config.solana.rpc_url.clone(),
        &config.solana.commitment,
    ));
    let cache = Arc::new(PlaySessionCache::new(Arc::new(FileStore::new(
        &config.play_session_cache_path,
    ))));
    let manager = session::build_allowance_manager(
        endpoint,
        config.solana.vault_program_id,
        config.rpc.retry_strategy(),
        config.tx.clone(),
        config.allowance.clone(),
        cache,
    );
    if let Err(error) = run(cli.command, &manager, &wallet).await {
        let Some(session_error) = error.downcast_ref::<SessionError>() else {
            return Err(error);
        };
        let kind = session_error.kind;
        match kind.log_level() {
            "error" => tracing::error!(kind = %kind, retryable = kind.is_transient(), "{}", session_error),
            "warn" => tracing::warn!(kind = %kind, retryable = kind.is_transient(), "{}", session_error),
            _ => tracing::info!(kind = %kind, retryable = kind.is_transient(), "{}", session_error),
        }
        print_json(&serde_json::json!({ "error": session_error }))?;
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Command, manager: &AllowanceManager, wallet: &Wallet) -> Result<()> {
    let vault = manager.vault();
    let user = wallet.pubkey();

    match command {
        Command::Addresses => print_json(&vault.addresses(&user))?,
        Command::Vault => {
            let casino = vault.fetch_casino().await?;
            let user_vault = vault.fetch_vault(&user).await?;
            print_json(&serde_json::json!({
                "casino": casino,
                "vault": user_vault,
            }))?;
        }
        Command::Deposit { lamports } => print_json(&vault.deposit(wallet, lamports).await?)?,
        Command::Withdraw { lamports } => print_json(&vault.withdraw(wallet, lamports).await?)?,
        Command::Approve { amount, duration } => {
            print_json(&manager.approve(wallet, amount, duration).await?)?
        }
        Command::Extend { duration, amount } => {
            print_json(&manager.extend(wallet, duration, amount).await?)?
        }
        Command::Revoke { allowance } => print_json(&manager.revoke(wallet, &allowance).await?)?,
        Command::Active { no_cache } => {
            let lookup = if no_cache {
                manager.find_active(&user).await?
            } else {
                manager.find_active_cached(&user).await?
            };
            print_json(&lookup)?;
        }
    }

    Ok(())
}
