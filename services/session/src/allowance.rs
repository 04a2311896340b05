//! Allowance lifecycle: approve, extend, revoke, and active-allowance lookup
//!
//! Allowances are never edited in place. Every approve or extend creates a
//! new record at the registry's `next_nonce`; the play session cache points
//! at the newest one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use shared::constants::DEFAULT_EXTEND_AMOUNT_LAMPORTS;
use shared::errors::{Result, SessionError};
use shared::program_ids::NATIVE_SOL_TOKEN;
use shared::types::{
    pubkey_string, ActiveAllowance, ActiveAllowanceLookup, Allowance, ApproveOutcome,
    LookupSource, PlaySessionEntry,
};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::play_session::PlaySessionCache;
use crate::solana_account_parsing::parse_allowance_nonce_registry_next_nonce;
use crate::solana_instructions::{
    build_approve_allowance_v2_instruction, build_revoke_allowance_instruction,
};
use crate::solana_tx::TxOptions;
use crate::vault::VaultClient;
use crate::wallet::Wallet;

#[derive(Debug, Clone)]
pub struct AllowanceConfig {
    /// Funding used by `extend` when no amount is given
    pub default_extend_amount: u64,
    /// Token identity recorded in new allowances
    pub token_mint: Pubkey,
}

impl Default for AllowanceConfig {
    fn default() -> Self {
        Self {
            default_extend_amount: DEFAULT_EXTEND_AMOUNT_LAMPORTS,
            token_mint: NATIVE_SOL_TOKEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevokeOutcome {
    #[serde(with = "pubkey_string")]
    pub allowance_address: Pubkey,
    /// `None` when the allowance was already revoked and nothing was sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub already_revoked: bool,
}

/// Unix seconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct AllowanceManager {
    vault: Arc<VaultClient>,
    cache: Arc<PlaySessionCache>,
    config: AllowanceConfig,
    clock: Clock,
    fallback_scans: AtomicU64,
}

impl AllowanceManager {
    pub fn new(vault: Arc<VaultClient>, cache: Arc<PlaySessionCache>, config: AllowanceConfig) -> Self {
        Self {
            vault,
            cache,
            config,
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
            fallback_scans: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AllowanceConfig {
        &self.config
    }

    pub fn vault(&self) -> &Arc<VaultClient> {
        &self.vault
    }

    /// How many exhaustive nonce scans this manager has run
    pub fn fallback_scans(&self) -> u64 {
        self.fallback_scans.load(Ordering::SeqCst)
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Registry `next_nonce`; a missing registry means no allowance was ever created
    pub async fn next_nonce(&self, user: &Pubkey) -> Result<u64> {
        let addresses = self.vault.addresses(user);
        match self
            .vault
            .transactions()
            .rpc()
            .get_account_data(&addresses.nonce_registry)
            .await?
        {
            Some(data) => parse_allowance_nonce_registry_next_nonce(&data),
            None => Ok(0),
        }
    }

    pub async fn fetch_allowance(&self, address: &Pubkey) -> Result<Option<Allowance>> {
        self.vault
            .transactions()
            .rpc()
            .fetch_account::<Allowance>(address)
            .await
    }

    /// Create a new allowance for the casino at the next nonce
    ///
    /// Initializes the wallet's vault first when it does not exist yet.
    pub async fn approve(
        &self,
        wallet: &Wallet,
        amount: u64,
        duration_seconds: i64,
    ) -> Result<ApproveOutcome> {
        if amount == 0 {
            return Err(SessionError::invalid_input("Allowance amount must be positive"));
        }
        if duration_seconds <= 0 {
            return Err(SessionError::invalid_input("Allowance duration must be positive"));
        }
        if !wallet.can_transact() {
            return Err(SessionError::invalid_input(
                "Wallet can neither sign nor send transactions",
            ));
        }

        let user = wallet.pubkey();
        let vault_initialized = self.vault.ensure_vault(wallet).await?;

        let addresses = self.vault.addresses(&user);
        let nonce = self.next_nonce(&user).await?;
        let allowance_address = addresses.allowance(nonce);
        debug!(user = %user, nonce, allowance = %allowance_address, "Approving allowance");

        let instruction = build_approve_allowance_v2_instruction(
            &addresses,
            amount,
            duration_seconds,
            &self.config.token_mint,
            nonce,
        );
        let receipt = self
            .vault
            .transactions()
            .execute(
                wallet,
                &[instruction],
                TxOptions::simulated(),
                "approve_allowance_v2",
            )
            .await?;

        let expires_at = match self.fetch_allowance(&allowance_address).await {
            Ok(Some(record)) => record.expires_at,
            Ok(None) => self.now().saturating_add(duration_seconds),
            Err(error) => {
                warn!(allowance = %allowance_address, error = %error, "Could not read back new allowance");
                self.now().saturating_add(duration_seconds)
            }
        };

        let entry = PlaySessionEntry {
            allowance: allowance_address,
            expires_at,
            nonce,
        };
        if let Err(error) = self.cache.store(&user, &entry).await {
            warn!(user = %user, error = %error, "Failed to persist play session");
        }

        info!(
            user = %user,
            nonce,
            allowance = %allowance_address,
            amount,
            expires_at,
            signature = %receipt.signature,
            "Allowance approved"
        );

        Ok(ApproveOutcome {
            signature: receipt.signature,
            allowance_address,
            used_nonce: nonce,
            expires_at,
            vault_initialized,
        })
    }

    /// Approve the next nonce with a new duration; the previous allowance is untouched
    pub async fn extend(
        &self,
        wallet: &Wallet,
        additional_duration_seconds: i64,
        amount: Option<u64>,
    ) -> Result<ApproveOutcome> {
        let amount = amount.unwrap_or(self.config.default_extend_amount);
        self.approve(wallet, amount, additional_duration_seconds)
            .await
    }

    /// Mark an allowance non-authorizing and forget it locally
    pub async fn revoke(&self, wallet: &Wallet, allowance_address: &Pubkey) -> Result<RevokeOutcome> {
        let user = wallet.pubkey();
        let record = self
            .fetch_allowance(allowance_address)
            .await?
            .ok_or_else(|| SessionError::account_not_found("Allowance", allowance_address))?;

        if record.user != user {
            return Err(SessionError::invalid_input("Allowance belongs to another user")
                .with_context(allowance_address.to_string()));
        }

        if record.revoked {
            info!(allowance = %allowance_address, "Allowance already revoked");
            self.forget(&user, allowance_address).await;
            return Ok(RevokeOutcome {
                allowance_address: *allowance_address,
                signature: None,
                already_revoked: true,
            });
        }

        let instruction = build_revoke_allowance_instruction(
            &self.vault.program_id(),
            allowance_address,
            &user,
        );
        let receipt = self
            .vault
            .transactions()
            .execute(wallet, &[instruction], TxOptions::simulated(), "revoke_allowance")
            .await?;

        self.forget(&user, allowance_address).await;
        info!(allowance = %allowance_address, signature = %receipt.signature, "Allowance revoked");

        Ok(RevokeOutcome {
            allowance_address: *allowance_address,
            signature: Some(receipt.signature),
            already_revoked: false,
        })
    }

    async fn forget(&self, user: &Pubkey, allowance_address: &Pubkey) {
        if let Err(error) = self.cache.remove_if_points_to(user, allowance_address).await {
            warn!(user = %user, error = %error, "Failed to clear play session");
        }
    }

    /// Exhaustive scan for the highest-nonce active allowance
    ///
    /// One account read per nonce. Refreshes the play session when it finds one.
    pub async fn find_active(&self, user: &Pubkey) -> Result<ActiveAllowanceLookup> {
        self.fallback_scans.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("allowance_scan_total").increment(1);

        let addresses = self.vault.addresses(user);
        let next_nonce = self.next_nonce(user).await?;
        info!(user = %user, next_nonce, "Scanning allowances");

        let now = self.now();
        for nonce in (0..next_nonce).rev() {
            let address = addresses.allowance(nonce);
            let Some(record) = self.fetch_allowance(&address).await? else {
                continue;
            };
            if !record.is_active(now) {
                continue;
            }

            let entry = PlaySessionEntry {
                allowance: address,
                expires_at: record.expires_at,
                nonce,
            };
            if let Err(error) = self.cache.store(user, &entry).await {
                warn!(user = %user, error = %error, "Failed to persist play session");
            }
            return Ok(ActiveAllowanceLookup {
                allowance: Some(ActiveAllowance { address, record }),
                source: LookupSource::Scan,
            });
        }

        Ok(ActiveAllowanceLookup {
            allowance: None,
            source: LookupSource::Scan,
        })
    }

    /// The ledger record must still be this user's active allowance at the cached nonce
    fn matches_entry(
        &self,
        user: &Pubkey,
        entry: &PlaySessionEntry,
        record: &Allowance,
        now: i64,
    ) -> bool {
        record.user == *user
            && record.casino == self.vault.casino()
            && record.nonce == entry.nonce
            && record.is_active(now)
    }

    /// Check the cached pointer first; scan only when it is missing or stale
    pub async fn find_active_cached(&self, user: &Pubkey) -> Result<ActiveAllowanceLookup> {
        let now = self.now();
        if let Some(entry) = self.cache.load(user, now).await {
            match self.fetch_allowance(&entry.allowance).await? {
                Some(record) if self.matches_entry(user, &entry, &record, now) => {
                    return Ok(ActiveAllowanceLookup {
                        allowance: Some(ActiveAllowance {
                            address: entry.allowance,
                            record,
                        }),
                        source: LookupSource::Cache,
                    });
                }
                _ => {
                    debug!(user = %user, allowance = %entry.allowance, "Cached allowance no longer valid");
                    if let Err(error) = self.cache.remove(user).await {
                        warn!(user = %user, error = %error, "Failed to clear play session");
                    }
                }
            }
        }

        self.find_active(user).await
    }
}
