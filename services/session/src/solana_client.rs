use async_trait::async_trait;
use serde_json::Value;
use shared::errors::{Result, SessionError};
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};

use crate::program_error::{
    extract_custom_code_from_logs, extract_custom_code_from_message,
    extract_custom_code_from_value,
};
use crate::retry_strategy::is_rate_limit_message;

/// Result of a dry run against current ledger state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutcome {
    /// Transaction error as JSON (`{"InstructionError":[0,{"Custom":17}]}`)
    pub err: Option<Value>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

/// Terminal status of a signature at the configured commitment
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureOutcome {
    Confirmed,
    Failed(Value),
}

/// The ledger operations the client needs
///
/// Every method returns `SessionError` already classified, so callers
/// (and the coordinator) can tell rate limits apart from everything else.
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    /// Raw account bytes, `None` when the account does not exist
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;

    async fn get_latest_blockhash(&self) -> Result<Hash>;

    /// Simulate without signature verification
    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationOutcome>;

    async fn send_transaction(
        &self,
        transaction: &Transaction,
        skip_preflight: bool,
    ) -> Result<Signature>;

    /// `None` while the signature has not reached the configured commitment
    async fn get_signature_status(&self, signature: &Signature)
        -> Result<Option<SignatureOutcome>>;

    fn url(&self) -> String;
}

/// Parse a commitment name; unknown values fall back to `confirmed`
pub fn parse_commitment(commitment: &str) -> CommitmentConfig {
    match commitment {
        "processed" => CommitmentConfig::processed(),
        "confirmed" => CommitmentConfig::confirmed(),
        "finalized" => CommitmentConfig::finalized(),
        _ => CommitmentConfig::confirmed(),
    }
}

/// [`RpcEndpoint`] over the nonblocking JSON-RPC client
pub struct SolanaRpcEndpoint {
    client: RpcClient,
    url: String,
    commitment: CommitmentConfig,
}

impl SolanaRpcEndpoint {
    pub fn new(url: impl Into<String>, commitment: &str) -> Self {
        let url = url.into();
        let commitment = parse_commitment(commitment);
        Self {
            client: RpcClient::new_with_commitment(url.clone(), commitment),
            url,
            commitment,
        }
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }
}

#[async_trait]
impl RpcEndpoint for SolanaRpcEndpoint {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| classify_client_error(&e))?;
        Ok(response.value.map(|account| account.data))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| classify_client_error(&e))
    }

    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationOutcome> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: false,
            commitment: Some(self.commitment),
            ..Default::default()
        };
        let response = self
            .client
            .simulate_transaction_with_config(transaction, config)
            .await
            .map_err(|e| classify_client_error(&e))?;

        let result = response.value;
        let err = match result.err {
            Some(err) => Some(serde_json::to_value(&err).map_err(SessionError::network)?),
            None => None,
        };
        Ok(SimulationOutcome {
            err,
            logs: result.logs.unwrap_or_default(),
            units_consumed: result.units_consumed,
        })
    }

    async fn send_transaction(
        &self,
        transaction: &Transaction,
        skip_preflight: bool,
    ) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            ..Default::default()
        };
        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| classify_client_error(&e))
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureOutcome>> {
        let status = self
            .client
            .get_signature_status_with_commitment(signature, self.commitment)
            .await
            .map_err(|e| classify_client_error(&e))?;

        Ok(status.map(|result| match result {
            Ok(()) => SignatureOutcome::Confirmed,
            Err(err) => SignatureOutcome::Failed(
                serde_json::to_value(&err).unwrap_or_else(|_| Value::String(err.to_string())),
            ),
        }))
    }

    fn url(&self) -> String {
        self.url.clone()
    }
}

/// Map a client error onto the session taxonomy
///
/// HTTP 429 and throttling messages become `RateLimited`, preflight and
/// transaction failures carrying a custom code become `ProgramError` with
/// their logs, and everything else is a `NetworkError`.
pub fn classify_client_error(error: &ClientError) -> SessionError {
    match error.kind() {
        ClientErrorKind::Reqwest(e) if e.status().map(|s| s.as_u16()) == Some(429) => {
            SessionError::rate_limited("RPC endpoint returned 429").with_context(e.to_string())
        }
        ClientErrorKind::RpcError(RpcError::RpcResponseError {
            code,
            message,
            data,
            ..
        }) => {
            if *code == 429 || is_rate_limit_message(message) {
                return SessionError::rate_limited("RPC endpoint is throttling requests")
                    .with_context(message.clone());
            }
            match data {
                RpcResponseErrorData::SendTransactionPreflightFailure(result) => {
                    let logs = result.logs.clone().unwrap_or_default();
                    let structured = result
                        .err
                        .as_ref()
                        .and_then(|err| serde_json::to_value(err).ok());
                    classify_transaction_failure(structured.as_ref(), logs, message)
                }
                _ => SessionError::network(message),
            }
        }
        ClientErrorKind::TransactionError(err) => {
            let structured = serde_json::to_value(err).ok();
            classify_transaction_failure(structured.as_ref(), Vec::new(), &err.to_string())
        }
        ClientErrorKind::SigningError(err) => {
            SessionError::internal("Transaction signing failed").with_context(err.to_string())
        }
        _ => {
            let text = error.to_string();
            if is_rate_limit_message(&text) {
                SessionError::rate_limited("RPC endpoint is throttling requests").with_context(text)
            } else {
                SessionError::network(text)
            }
        }
    }
}

/// `ProgramError` when a custom code can be found, `TransactionRejected` otherwise
pub fn classify_transaction_failure(
    structured: Option<&Value>,
    logs: Vec<String>,
    message: &str,
) -> SessionError {
    let code = structured
        .and_then(extract_custom_code_from_value)
        .or_else(|| extract_custom_code_from_logs(&logs))
        .or_else(|| extract_custom_code_from_message(message));

    let error = match code {
        Some(code) => SessionError::program_error(code).with_context(message.to_string()),
        None => match structured {
            Some(value) => SessionError::transaction_rejected(value),
            None => SessionError::transaction_rejected(message),
        },
    };
    error.with_logs(logs)
}
