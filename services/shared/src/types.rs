/// Plain data types shared by the client crates
///
/// On-chain records mirror the vault program's account layouts field for
/// field; the client never mutates them except through submitted transactions.
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Serialize pubkeys as base58 strings instead of byte arrays
pub mod pubkey_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pubkey::from_str(&raw).map_err(D::Error::custom)
    }
}

/// Casino configuration and authority (singleton)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Casino {
    #[serde(with = "pubkey_string")]
    pub authority: Pubkey,
    #[serde(with = "pubkey_string")]
    pub processor: Pubkey,
    #[serde(with = "pubkey_string")]
    pub treasury: Pubkey,
    pub bump: u8,
    pub vault_authority_bump: u8,
    pub paused: bool,
    pub total_bets: u64,
    pub total_volume: u64,
    pub created_at: i64,
}

impl Casino {
    pub const LEN: usize = 8 + // discriminator
        32 + // authority
        32 + // processor
        32 + // treasury
        1 + // bump
        1 + // vault_authority_bump
        1 + // paused
        8 + // total_bets
        8 + // total_volume
        8; // created_at
}

/// User vault holding the custodial balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    #[serde(with = "pubkey_string")]
    pub owner: Pubkey,
    #[serde(with = "pubkey_string")]
    pub casino: Pubkey,
    pub bump: u8,
    /// Balance in lamports
    pub sol_balance: u64,
    pub created_at: i64,
    pub last_activity: i64,
}

impl Vault {
    pub const LEN: usize = 8 + // discriminator
        32 + // owner
        32 + // casino
        1 + // bump
        8 + // sol_balance
        8 + // created_at
        8; // last_activity
}

/// Per-user-per-spender counter for deterministic allowance addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceNonceRegistry {
    #[serde(with = "pubkey_string")]
    pub user: Pubkey,
    #[serde(with = "pubkey_string")]
    pub casino: Pubkey,
    /// Only ever increases
    pub next_nonce: u64,
    pub bump: u8,
}

impl AllowanceNonceRegistry {
    pub const LEN: usize = 8 + // discriminator
        32 + // user
        32 + // casino
        8 + // next_nonce
        1; // bump
}

/// Capped, time-boxed spending authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    #[serde(with = "pubkey_string")]
    pub user: Pubkey,
    /// Spender
    #[serde(with = "pubkey_string")]
    pub casino: Pubkey,
    #[serde(with = "pubkey_string")]
    pub token_mint: Pubkey,
    pub amount: u64,
    pub spent: u64,
    pub expires_at: i64,
    pub created_at: i64,
    pub nonce: u64,
    pub revoked: bool,
    pub bump: u8,
    pub last_spent_at: i64,
    pub spend_count: u32,
}

impl Allowance {
    pub const LEN: usize = 8 + // discriminator
        32 + // user
        32 + // casino
        32 + // token_mint
        8 + // amount
        8 + // spent
        8 + // expires_at
        8 + // created_at
        8 + // nonce
        1 + // revoked
        1 + // bump
        8 + // last_spent_at
        4; // spend_count

    pub fn remaining(&self) -> u64 {
        self.amount.saturating_sub(self.spent)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Neither revoked nor expired at `now`
    pub fn is_active(&self, now: i64) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// Rate limiter for allowance approvals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiter {
    #[serde(with = "pubkey_string")]
    pub user: Pubkey,
    pub approvals_count: u8,
    pub window_start: i64,
    pub bump: u8,
}

impl RateLimiter {
    pub const LEN: usize = 8 + // discriminator
        32 + // user
        1 + // approvals_count
        8 + // window_start
        1; // bump
}

/// Client-local pointer to the most recent allowance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaySessionEntry {
    #[serde(with = "pubkey_string")]
    pub allowance: Pubkey,
    pub expires_at: i64,
    pub nonce: u64,
}

impl PlaySessionEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Result of a confirmed approve or extend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveOutcome {
    pub signature: String,
    #[serde(with = "pubkey_string")]
    pub allowance_address: Pubkey,
    pub used_nonce: u64,
    pub expires_at: i64,
    /// Whether a vault had to be initialized first
    pub vault_initialized: bool,
}

/// An allowance that currently authorizes debits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAllowance {
    #[serde(with = "pubkey_string")]
    pub address: Pubkey,
    pub record: Allowance,
}

/// Where an active-allowance lookup got its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    /// The cached pointer was still valid (one account read)
    Cache,
    /// Exhaustive nonce scan
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAllowanceLookup {
    pub allowance: Option<ActiveAllowance>,
    pub source: LookupSource,
}
