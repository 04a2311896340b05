//! Transaction lifecycle: build → (simulate) → sign → submit → confirm
//!
//! Every ledger call goes through the coordinated RPC handle. Signing and
//! delegate sending go to the wallet's capabilities and are not coordinated:
//! they may block on a user prompt.

use std::time::Duration;

use serde::Serialize;
use shared::constants::{TX_DEFAULT_CONFIRM_TIMEOUT_SECS, TX_DEFAULT_POLL_INTERVAL_MS};
use shared::errors::{ErrorKind, Result, SessionError};
use solana_sdk::{
    instruction::Instruction, message::Message, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::program_error::looks_like_program_failure;
use crate::rpc_coordinator::CoordinatedRpc;
use crate::solana_client::{classify_transaction_failure, SignatureOutcome, SimulationOutcome};
use crate::solana_instructions::{
    build_priority_fee_instructions, build_uniqueness_marker_instruction,
};
use crate::wallet::{SendOptions, Wallet};

#[derive(Debug, Clone)]
pub struct TxConfig {
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
    pub compute_unit_limit: Option<u32>,
    pub priority_fee_micro_lamports: Option<u64>,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: Duration::from_secs(TX_DEFAULT_CONFIRM_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(TX_DEFAULT_POLL_INTERVAL_MS),
            compute_unit_limit: None,
            priority_fee_micro_lamports: None,
        }
    }
}

/// Per-call knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Dry-run before asking the wallet to sign
    pub simulate: bool,
    pub skip_preflight: bool,
}

impl TxOptions {
    pub fn simulated() -> Self {
        Self {
            simulate: true,
            skip_preflight: false,
        }
    }
}

/// Pipeline steps this client performed; `Signed` only when it signed locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStage {
    Built,
    Simulated,
    Signed,
    Submitted,
    Confirmed,
}

/// How the transaction reached the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitRoute {
    /// The wallet's sender signed and sent in one step
    Delegate,
    /// Signed through the wallet's signer, sent raw
    SignAndSend,
    /// The delegate failed opaquely, then sign and raw send
    DelegateFallback,
}

impl SubmitRoute {
    pub fn signed_locally(self) -> bool {
        !matches!(self, SubmitRoute::Delegate)
    }
}

/// What a confirmed transaction went through
#[derive(Debug, Clone, Serialize)]
pub struct TxReceipt {
    pub signature: String,
    pub route: SubmitRoute,
    pub stages: Vec<TxStage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub simulation_logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units_consumed: Option<u64>,
    pub confirmation_ms: u64,
}

pub struct TransactionManager {
    rpc: CoordinatedRpc,
    config: TxConfig,
}

impl TransactionManager {
    pub fn new(rpc: CoordinatedRpc, config: TxConfig) -> Self {
        Self { rpc, config }
    }

    pub fn rpc(&self) -> &CoordinatedRpc {
        &self.rpc
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Assemble an unsigned transaction paid by `payer`
    ///
    /// Compute-budget instructions go first when configured; a fresh memo
    /// goes last so a resubmitted action never reuses a signature.
    pub async fn build(&self, payer: &Pubkey, instructions: &[Instruction]) -> Result<Transaction> {
        let mut all = build_priority_fee_instructions(
            self.config.compute_unit_limit,
            self.config.priority_fee_micro_lamports,
        );
        all.extend_from_slice(instructions);
        all.push(build_uniqueness_marker_instruction(&Uuid::new_v4().to_string()));

        let blockhash = self.rpc.get_latest_blockhash().await?;
        let message = Message::new_with_blockhash(&all, Some(payer), &blockhash);
        Ok(Transaction::new_unsigned(message))
    }

    /// Dry-run; a failing simulation raises with the program logs attached
    pub async fn simulate(&self, transaction: &Transaction) -> Result<SimulationOutcome> {
        let outcome = self.rpc.simulate_transaction(transaction).await?;

        if let Some(err) = &outcome.err {
            let error = classify_transaction_failure(
                Some(err),
                outcome.logs.clone(),
                "Transaction simulation failed",
            );
            warn!(
                kind = %error.kind,
                log_lines = outcome.logs.len(),
                "Simulation rejected transaction"
            );
            return Err(error);
        }

        debug!(units_consumed = ?outcome.units_consumed, "Simulation succeeded");
        Ok(outcome)
    }

    pub async fn sign(&self, wallet: &Wallet, transaction: Transaction) -> Result<Transaction> {
        let signer = wallet
            .signer()
            .ok_or_else(|| SessionError::invalid_input("Wallet cannot sign transactions"))?;
        signer.sign_transaction(transaction).await
    }

    /// Submit through the wallet
    ///
    /// A delegate sender is tried first when the wallet has one. An opaque
    /// delegate failure falls back to sign-then-raw-send when a signer is
    /// available; rejections and program failures never do.
    pub async fn submit(
        &self,
        wallet: &Wallet,
        transaction: Transaction,
        options: TxOptions,
    ) -> Result<(Signature, SubmitRoute)> {
        let send_options = SendOptions {
            skip_preflight: options.skip_preflight,
            max_retries: None,
        };

        let (signature, route) = match wallet.sender() {
            Some(sender) => {
                let delegated = sender
                    .send_transaction(transaction.clone(), &self.rpc.url(), send_options)
                    .await;
                match delegated {
                    Ok(signature) => (signature, SubmitRoute::Delegate),
                    Err(error) if wallet.signer().is_some() && allows_fallback(&error) => {
                        metrics::counter!("tx_delegate_send_fallbacks_total").increment(1);
                        warn!(
                            error = %error,
                            "Delegate send failed, falling back to sign and raw send"
                        );
                        let signature = self.sign_and_send(wallet, transaction, options).await?;
                        (signature, SubmitRoute::DelegateFallback)
                    }
                    Err(error) => return Err(error),
                }
            }
            None => (
                self.sign_and_send(wallet, transaction, options).await?,
                SubmitRoute::SignAndSend,
            ),
        };

        metrics::counter!("tx_submitted_total").increment(1);
        info!(signature = %signature, route = ?route, "Transaction submitted");
        Ok((signature, route))
    }

    async fn sign_and_send(
        &self,
        wallet: &Wallet,
        transaction: Transaction,
        options: TxOptions,
    ) -> Result<Signature> {
        let signed = self.sign(wallet, transaction).await?;
        self.rpc
            .send_transaction(&signed, options.skip_preflight)
            .await
    }

    /// Poll until confirmed, failed, or the timeout elapses
    ///
    /// Transient poll errors are logged and polling continues. A timeout is
    /// reported as `ConfirmationTimeout`: the transaction may still land.
    pub async fn confirm(&self, signature: &Signature) -> Result<Duration> {
        let started = Instant::now();
        let deadline = started + self.config.confirm_timeout;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            match self.rpc.get_signature_status(signature).await {
                Ok(Some(SignatureOutcome::Confirmed)) => {
                    let elapsed = started.elapsed();
                    metrics::counter!("tx_confirmed_total").increment(1);
                    metrics::histogram!("tx_confirmation_seconds").record(elapsed.as_secs_f64());
                    info!(signature = %signature, polls, elapsed_ms = elapsed.as_millis() as u64, "Transaction confirmed");
                    return Ok(elapsed);
                }
                Ok(Some(SignatureOutcome::Failed(err))) => {
                    metrics::counter!("tx_failed_total").increment(1);
                    let mut error = classify_transaction_failure(
                        Some(&err),
                        Vec::new(),
                        "Transaction failed on-chain",
                    );
                    error.context = Some(format!("signature: {}", signature));
                    warn!(signature = %signature, kind = %error.kind, "Transaction failed on-chain");
                    return Err(error);
                }
                Ok(None) => {
                    debug!(signature = %signature, polls, "Transaction not yet confirmed");
                }
                Err(error) => {
                    warn!(signature = %signature, error = %error, "Signature status poll failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::counter!("tx_confirmation_timeouts_total").increment(1);
                warn!(
                    signature = %signature,
                    polls,
                    timeout_secs = self.config.confirm_timeout.as_secs(),
                    "Confirmation timed out; transaction may still land"
                );
                return Err(SessionError::confirmation_timeout(
                    signature,
                    self.config.confirm_timeout.as_secs(),
                ));
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Run the full pipeline for `instructions`, paid and signed by `wallet`
    pub async fn execute(
        &self,
        wallet: &Wallet,
        instructions: &[Instruction],
        options: TxOptions,
        operation: &str,
    ) -> Result<TxReceipt> {
        if !wallet.can_transact() {
            return Err(SessionError::invalid_input(
                "Wallet can neither sign nor send transactions",
            ));
        }

        let mut stages = vec![TxStage::Built];
        let transaction = self.build(&wallet.pubkey(), instructions).await?;
        debug!(operation, stage = ?TxStage::Built, "Transaction built");

        let mut simulation_logs = Vec::new();
        let mut units_consumed = None;
        if options.simulate {
            let outcome = match self.simulate(&transaction).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    if matches!(error.kind, ErrorKind::ProgramError { .. } | ErrorKind::TransactionRejected) {
                        metrics::counter!("tx_failed_total").increment(1);
                    }
                    return Err(error);
                }
            };
            simulation_logs = outcome.logs;
            units_consumed = outcome.units_consumed;
            stages.push(TxStage::Simulated);
        }

        let (signature, route) = self.submit(wallet, transaction, options).await?;
        if route.signed_locally() {
            stages.push(TxStage::Signed);
        }
        stages.push(TxStage::Submitted);

        let elapsed = match self.confirm(&signature).await {
            Ok(elapsed) => elapsed,
            Err(error) => {
                info!(operation, signature = %signature, kind = %error.kind, "Transaction did not confirm");
                return Err(error);
            }
        };
        stages.push(TxStage::Confirmed);

        info!(operation, signature = %signature, "Transaction lifecycle complete");
        Ok(TxReceipt {
            signature: signature.to_string(),
            route,
            stages,
            simulation_logs,
            units_consumed,
            confirmation_ms: elapsed.as_millis() as u64,
        })
    }
}

/// Delegate failures that may be retried through sign-then-raw-send
fn allows_fallback(error: &SessionError) -> bool {
    match error.kind {
        ErrorKind::UserRejected
        | ErrorKind::ProgramError { .. }
        | ErrorKind::TransactionRejected => false,
        _ => !looks_like_program_failure(&error.full_text()),
    }
}
