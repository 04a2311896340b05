//! Solana program IDs and public keys used across services
//!
//! Centralizes all program ID constants to ensure consistency
//! and make it easier to update when needed.

use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;

/// SPL Memo program, used for transaction uniqueness markers
pub const MEMO_PROGRAM_ID: Pubkey = pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Token identity recorded in allowances for native SOL
pub const NATIVE_SOL_TOKEN: Pubkey = solana_sdk::system_program::ID;
