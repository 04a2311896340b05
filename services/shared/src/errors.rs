/// Shared error types for the play-session client
///
/// Design Philosophy:
/// - One machine-checkable `ErrorKind` per failure class the UI must tell apart
/// - A human-readable message alongside every kind
/// - Program failures carry the numeric custom code and the captured logs
///
/// Usage:
/// - Codec and derivation raise immediately, no retry
/// - The RPC coordinator retries only `RateLimited`
/// - `ConfirmationTimeout` is an ambiguous outcome, never a failure
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::ANCHOR_ERROR_OFFSET;

/// Failure classes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The wallet declined to sign or send
    UserRejected,

    /// The RPC endpoint is throttling us (HTTP 429 or equivalent message)
    RateLimited,

    /// The remote program rejected the transaction logic
    ProgramError { code: u32 },

    /// The ledger refused the transaction without a custom program code
    /// (bad blockhash, insufficient fee funds, non-custom instruction error)
    TransactionRejected,

    /// Polling ran out before the required confirmation depth was observed
    ConfirmationTimeout,

    /// On-chain bytes did not match the expected layout
    DecodeError,

    /// Generic transport failure
    NetworkError,

    /// An account the operation depends on does not exist
    AccountNotFound,

    /// Caller supplied arguments that can never succeed
    InvalidInput,

    /// Unexpected failures and programming errors
    Internal,
}

impl ErrorKind {
    /// Stable string code for logs and JSON payloads
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::UserRejected => "USER_REJECTED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::ProgramError { .. } => "PROGRAM_ERROR",
            ErrorKind::TransactionRejected => "TRANSACTION_REJECTED",
            ErrorKind::ConfirmationTimeout => "CONFIRMATION_TIMEOUT",
            ErrorKind::DecodeError => "DECODE_ERROR",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Whether retrying the same call can help without caller intervention
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::NetworkError)
    }

    /// Map error kind to log level
    pub fn log_level(&self) -> &'static str {
        match self {
            ErrorKind::UserRejected => "info",
            ErrorKind::RateLimited => "warn",
            ErrorKind::ProgramError { .. } => "warn",
            ErrorKind::TransactionRejected => "warn",
            ErrorKind::ConfirmationTimeout => "warn",
            ErrorKind::DecodeError => "error",
            ErrorKind::NetworkError => "error",
            ErrorKind::AccountNotFound => "info",
            ErrorKind::InvalidInput => "warn",
            ErrorKind::Internal => "error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ProgramError { code } => write!(f, "{}({})", self.code(), code),
            other => write!(f, "{}", other.code()),
        }
    }
}

/// Standardized error structure returned by every client operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionError {
    /// Machine-checkable failure class
    pub kind: ErrorKind,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context (addresses, signatures, raw error text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Program logs captured from simulation or preflight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
            logs: Vec::new(),
        }
    }

    /// Add context to an error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Attach program logs
    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserRejected, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn program_error(code: u32) -> Self {
        let message = match vault_error_name(code) {
            Some(name) => format!("Program rejected transaction: {} ({})", name, code),
            None => format!("Program rejected transaction with custom error {}", code),
        };
        Self::new(ErrorKind::ProgramError { code }, message)
    }

    pub fn transaction_rejected(error: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::TransactionRejected,
            "Transaction rejected by the ledger",
        )
        .with_context(error.to_string())
    }

    pub fn confirmation_timeout(signature: impl fmt::Display, waited_secs: u64) -> Self {
        Self::new(
            ErrorKind::ConfirmationTimeout,
            format!(
                "Transaction not confirmed after {}s; it may still land",
                waited_secs
            ),
        )
        .with_context(format!("signature: {}", signature))
    }

    pub fn decode(record: &str, actual: usize, expected: usize) -> Self {
        Self::new(
            ErrorKind::DecodeError,
            format!("Failed to decode {} account", record),
        )
        .with_context(format!(
            "data too short: {} bytes (expected at least {})",
            actual, expected
        ))
    }

    pub fn network(error: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NetworkError, "RPC request failed").with_context(error.to_string())
    }

    pub fn account_not_found(what: &str, address: impl fmt::Display) -> Self {
        Self::new(ErrorKind::AccountNotFound, format!("{} not found", what))
            .with_context(address.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Custom program error code, when this is a program failure
    pub fn program_code(&self) -> Option<u32> {
        match self.kind {
            ErrorKind::ProgramError { code } => Some(code),
            _ => None,
        }
    }

    /// Full text (message and context) for pattern matching
    pub fn full_text(&self) -> String {
        match &self.context {
            Some(context) => format!("{} {}", self.message, context),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "[{}] {}: {}", self.kind, self.message, context)
        } else {
            write!(f, "[{}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for SessionError {}

/// Names of the vault program's custom errors, in declaration order
const VAULT_ERROR_NAMES: &[&str] = &[
    "InsufficientBalance",
    "InvalidBetAmount",
    "AllowanceExpired",
    "AllowanceRevoked",
    "InsufficientAllowance",
    "AllowanceDurationTooLong",
    "AllowanceAmountTooHigh",
    "RateLimitExceeded",
    "InvalidTokenAccountOwner",
    "InvalidTokenMint",
    "TokenAccountFrozen",
    "TokenAccountNotInitialized",
    "ArithmeticOverflow",
    "ArithmeticUnderflow",
    "UnauthorizedProcessor",
    "UnauthorizedAuthority",
    "CasinoPaused",
    "InvalidVaultPDA",
    "InvalidCasinoVaultPDA",
    "DuplicateBetId",
    "InvalidBetId",
    "TokenMintMismatch",
    "InvalidAllowancePDA",
    "MissingTokenDelegation",
    "MissingTokenAccount",
    "InvalidAllowanceNonce",
];

/// Resolve a custom program error code to the vault program's error name
pub fn vault_error_name(code: u32) -> Option<&'static str> {
    let index = code.checked_sub(ANCHOR_ERROR_OFFSET)?;
    VAULT_ERROR_NAMES.get(index as usize).copied()
}

// Convenience type alias
pub type Result<T> = std::result::Result<T, SessionError>;
