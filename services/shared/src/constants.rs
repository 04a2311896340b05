/// Shared constants for the play-session client
///
/// This module centralizes PDA seeds, policy defaults and RPC tuning so the
/// derivation code, the transaction layer and the CLI never disagree.

/// PDA seed for the singleton casino record
pub const CASINO_SEED: &[u8] = b"casino";

/// PDA seed for a user's custodial vault (followed by casino, user)
pub const VAULT_SEED: &[u8] = b"vault";

/// PDA seed for the casino's signing authority (followed by casino)
pub const VAULT_AUTHORITY_SEED: &[u8] = b"vault-authority";

/// PDA seed for the program-owned casino vault (followed by casino)
pub const CASINO_VAULT_SEED: &[u8] = b"casino-vault";

/// PDA seed for the per-user approval rate limiter (followed by user)
pub const RATE_LIMITER_SEED: &[u8] = b"rate-limiter";

/// PDA seed for the nonce registry (followed by user, casino)
pub const ALLOWANCE_NONCE_SEED: &[u8] = b"allowance-nonce";

/// PDA seed for an allowance (followed by user, casino, nonce as u64 LE)
pub const ALLOWANCE_SEED: &[u8] = b"allowance";

/// Default amount funded by `extend` when the caller does not pass one (5 SOL)
///
/// Rationale: a policy default, overridable via ALLOWANCE_DEFAULT_EXTEND_LAMPORTS.
pub const DEFAULT_EXTEND_AMOUNT_LAMPORTS: u64 = 5_000_000_000;

/// Default retry budget for rate-limited RPC calls
pub const RPC_DEFAULT_MAX_RETRIES: u32 = 2;

/// Base delay for rate-limit backoff in milliseconds
///
/// The n-th retry waits base * 2^n plus jitter.
pub const RPC_DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Interval between signature status polls in milliseconds
pub const TX_DEFAULT_POLL_INTERVAL_MS: u64 = 2_500;

/// How long a submitted transaction is polled before giving up (seconds)
///
/// Timing out is NOT a failure: the transaction may still land.
pub const TX_DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 90;

/// Key prefix for persisted play sessions (suffixed with the user pubkey)
pub const PLAY_SESSION_KEY_PREFIX: &str = "play-session:";

/// Anchor custom errors start at this offset
pub const ANCHOR_ERROR_OFFSET: u32 = 6_000;
