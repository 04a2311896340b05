//! Program Derived Address (PDA) derivation utilities
//!
//! Pure functions: identical inputs always yield identical addresses, so the
//! client and the vault program agree without a round trip.

use serde::Serialize;
use shared::constants::{
    ALLOWANCE_NONCE_SEED, ALLOWANCE_SEED, CASINO_SEED, CASINO_VAULT_SEED, RATE_LIMITER_SEED,
    VAULT_AUTHORITY_SEED, VAULT_SEED,
};
use shared::types::pubkey_string;
use solana_sdk::pubkey::Pubkey;

/// Derive casino PDA
pub fn derive_casino_pda(program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[CASINO_SEED], program_id)
}

/// Derive user vault PDA (requires casino PDA)
pub fn derive_user_vault_pda(
    user_pubkey: &Pubkey,
    casino_pubkey: &Pubkey,
    program_id: &Pubkey,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[VAULT_SEED, casino_pubkey.as_ref(), user_pubkey.as_ref()],
        program_id,
    )
}

/// Derive the casino's signing authority PDA
pub fn derive_vault_authority_pda(casino_pubkey: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[VAULT_AUTHORITY_SEED, casino_pubkey.as_ref()], program_id)
}

/// Derive the program-owned casino vault PDA
pub fn derive_casino_vault_pda(casino_pubkey: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[CASINO_VAULT_SEED, casino_pubkey.as_ref()], program_id)
}

/// Derive the per-user approval rate limiter PDA
pub fn derive_rate_limiter_pda(user_pubkey: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[RATE_LIMITER_SEED, user_pubkey.as_ref()], program_id)
}

/// Derive the nonce registry PDA for a user/spender pair
pub fn derive_nonce_registry_pda(
    user_pubkey: &Pubkey,
    casino_pubkey: &Pubkey,
    program_id: &Pubkey,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[
            ALLOWANCE_NONCE_SEED,
            user_pubkey.as_ref(),
            casino_pubkey.as_ref(),
        ],
        program_id,
    )
}

/// Derive the allowance PDA for a specific nonce
pub fn derive_allowance_pda(
    user_pubkey: &Pubkey,
    casino_pubkey: &Pubkey,
    nonce: u64,
    program_id: &Pubkey,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[
            ALLOWANCE_SEED,
            user_pubkey.as_ref(),
            casino_pubkey.as_ref(),
            &nonce.to_le_bytes(),
        ],
        program_id,
    )
}

/// Every per-user address an allowance transaction touches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionAddresses {
    #[serde(with = "pubkey_string")]
    pub program_id: Pubkey,
    #[serde(with = "pubkey_string")]
    pub user: Pubkey,
    #[serde(with = "pubkey_string")]
    pub casino: Pubkey,
    #[serde(with = "pubkey_string")]
    pub vault: Pubkey,
    #[serde(with = "pubkey_string")]
    pub vault_authority: Pubkey,
    /// House pool credited by allowance spends; not part of any user instruction
    #[serde(with = "pubkey_string")]
    pub casino_vault: Pubkey,
    #[serde(with = "pubkey_string")]
    pub rate_limiter: Pubkey,
    #[serde(with = "pubkey_string")]
    pub nonce_registry: Pubkey,
}

impl SessionAddresses {
    /// Derive all addresses for `user` against `casino` (the spender)
    pub fn derive(program_id: &Pubkey, user: &Pubkey, casino: &Pubkey) -> Self {
        let (vault, _) = derive_user_vault_pda(user, casino, program_id);
        let (vault_authority, _) = derive_vault_authority_pda(casino, program_id);
        let (casino_vault, _) = derive_casino_vault_pda(casino, program_id);
        let (rate_limiter, _) = derive_rate_limiter_pda(user, program_id);
        let (nonce_registry, _) = derive_nonce_registry_pda(user, casino, program_id);

        Self {
            program_id: *program_id,
            user: *user,
            casino: *casino,
            vault,
            vault_authority,
            casino_vault,
            rate_limiter,
            nonce_registry,
        }
    }

    /// Allowance address for `nonce`
    pub fn allowance(&self, nonce: u64) -> Pubkey {
        derive_allowance_pda(&self.user, &self.casino, nonce, &self.program_id).0
    }
}
