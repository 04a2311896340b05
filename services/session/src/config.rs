use std::env;
use std::str::FromStr;
use std::time::Duration;

use shared::constants::{
    DEFAULT_EXTEND_AMOUNT_LAMPORTS, RPC_DEFAULT_BASE_DELAY_MS, RPC_DEFAULT_MAX_RETRIES,
    TX_DEFAULT_CONFIRM_TIMEOUT_SECS, TX_DEFAULT_POLL_INTERVAL_MS,
};
use shared::program_ids::NATIVE_SOL_TOKEN;
use solana_sdk::pubkey::Pubkey;

use crate::allowance::AllowanceConfig;
use crate::retry_strategy::RetryStrategy;
use crate::solana_tx::TxConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub solana: SolanaConfig,
    pub rpc: RpcConfig,
    pub tx: TxConfig,
    pub allowance: AllowanceConfig,
    pub play_session_cache_path: String,
    pub wallet_keypair_path: Option<String>,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: String,
    pub vault_program_id: Pubkey,
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RpcConfig {
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_retries: RPC_DEFAULT_MAX_RETRIES,
            base_delay_ms: RPC_DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl Config {
    /// Load from the environment (and `.env` when present)
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any name → value lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));

        let vault_program_id = parse_value::<Pubkey>("VAULT_PROGRAM_ID", required("VAULT_PROGRAM_ID")?)?;

        Ok(Config {
            solana: SolanaConfig {
                rpc_url: required("SOLANA_RPC_URL")?,
                commitment: lookup("SOLANA_COMMITMENT").unwrap_or_else(|| "confirmed".to_string()),
                vault_program_id,
            },
            rpc: RpcConfig {
                max_retries: parse_or(&lookup, "RPC_MAX_RETRIES", RPC_DEFAULT_MAX_RETRIES)?,
                base_delay_ms: parse_or(&lookup, "RPC_BASE_DELAY_MS", RPC_DEFAULT_BASE_DELAY_MS)?,
            },
            tx: TxConfig {
                confirm_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "TX_CONFIRM_TIMEOUT_SECONDS",
                    TX_DEFAULT_CONFIRM_TIMEOUT_SECS,
                )?),
                poll_interval: Duration::from_millis(parse_or(
                    &lookup,
                    "TX_POLL_INTERVAL_MS",
                    TX_DEFAULT_POLL_INTERVAL_MS,
                )?),
                compute_unit_limit: parse_optional(&lookup, "TX_COMPUTE_UNIT_LIMIT")?,
                priority_fee_micro_lamports: parse_optional(
                    &lookup,
                    "TX_PRIORITY_FEE_MICRO_LAMPORTS",
                )?,
            },
            allowance: AllowanceConfig {
                default_extend_amount: parse_or(
                    &lookup,
                    "ALLOWANCE_DEFAULT_EXTEND_LAMPORTS",
                    DEFAULT_EXTEND_AMOUNT_LAMPORTS,
                )?,
                token_mint: parse_or(&lookup, "ALLOWANCE_TOKEN_MINT", NATIVE_SOL_TOKEN)?,
            },
            play_session_cache_path: lookup("PLAY_SESSION_CACHE_PATH")
                .unwrap_or_else(|| ".play-session.json".to_string()),
            wallet_keypair_path: lookup("WALLET_KEYPAIR"),
            metrics_port: parse_optional(&lookup, "METRICS_PORT")?,
        })
    }
}

fn parse_value<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

fn parse_optional<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map(|value| parse_value(name, value)).transpose()
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_optional(lookup, name)?.unwrap_or(default))
}
