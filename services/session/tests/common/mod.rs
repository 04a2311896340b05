//! Common test utilities: an in-memory ledger emulating the vault program,
//! scripted wallet doubles and a wired-up test context
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use session::allowance::{AllowanceConfig, AllowanceManager};
use session::play_session::PlaySessionCache;
use session::retry_strategy::RetryStrategy;
use session::solana_account_parsing::{decode_account, encode_account};
use session::solana_client::{
    classify_transaction_failure, RpcEndpoint, SignatureOutcome, SimulationOutcome,
};
use session::solana_instructions::VaultInstruction;
use session::solana_pda::{derive_allowance_pda, derive_casino_pda, derive_nonce_registry_pda, derive_user_vault_pda};
use session::solana_tx::TxConfig;
use session::wallet::{SendOptions, TransactionSender, TransactionSigner, Wallet};
use shared::errors::{Result, SessionError};
use shared::types::{Allowance, AllowanceNonceRegistry, Casino, Vault};
use solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Keypair, signature::Signature, signer::Signer,
    transaction::Transaction,
};
use tokio::time::Instant;

pub const PROGRAM_ID: Pubkey = solana_sdk::pubkey!("HTg6Cs11FNiRXjQ2wFiQodKrVuTQdEJYk8j4RtfX56rP");

/// Ledger start time (unix seconds)
pub const GENESIS: i64 = 1_700_000_000;

/// Anchor `AccountNotInitialized`
const ACCOUNT_NOT_INITIALIZED: u32 = 3012;
/// System program "account already in use"
const ACCOUNT_IN_USE: u32 = 0;
const INSUFFICIENT_BALANCE: u32 = 6000;
const UNAUTHORIZED_AUTHORITY: u32 = 6015;
const INVALID_ALLOWANCE_PDA: u32 = 6022;
const INVALID_ALLOWANCE_NONCE: u32 = 6025;

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub method: &'static str,
    pub started: Instant,
    pub finished: Instant,
    pub rate_limited: bool,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Vec<u8>>,
    clock: i64,
    statuses: HashMap<Signature, SignatureOutcome>,
    sent: Vec<Transaction>,
    calls: Vec<CallRecord>,
    rate_limited_reads: u32,
    simulation_failure: Option<u32>,
    never_confirm: bool,
    race_vault_init: bool,
}

/// In-memory stand-in for the RPC endpoint and the vault program behind it
pub struct TestLedger {
    program_id: Pubkey,
    state: Mutex<LedgerState>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl TestLedger {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        let (casino, bump) = derive_casino_pda(&PROGRAM_ID);
        let record = Casino {
            authority: Pubkey::new_unique(),
            processor: Pubkey::new_unique(),
            treasury: Pubkey::new_unique(),
            bump,
            vault_authority_bump: 254,
            paused: false,
            total_bets: 0,
            total_volume: 0,
            created_at: GENESIS,
        };

        let mut state = LedgerState {
            clock: GENESIS,
            ..Default::default()
        };
        state.accounts.insert(casino, encode_account(&record));

        Arc::new(Self {
            program_id: PROGRAM_ID,
            state: Mutex::new(state),
            latency,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    // Knobs

    /// The next `count` account reads answer HTTP 429
    pub fn rate_limit_account_reads(&self, count: u32) {
        self.state().rate_limited_reads = count;
    }

    /// Every simulation fails with this custom program code
    pub fn fail_simulation_with(&self, code: u32) {
        self.state().simulation_failure = Some(code);
    }

    /// Transactions apply but their status is never reported
    pub fn never_confirm(&self) {
        self.state().never_confirm = true;
    }

    /// The next initialize_vault loses a race against another initializer
    pub fn race_vault_init(&self) {
        self.state().race_vault_init = true;
    }

    pub fn advance_clock(&self, seconds: i64) {
        self.state().clock += seconds;
    }

    pub fn now(&self) -> i64 {
        self.state().clock
    }

    pub fn clock(self: &Arc<Self>) -> session::allowance::Clock {
        let ledger = self.clone();
        Arc::new(move || ledger.now())
    }

    // Inspection

    pub fn account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.state().accounts.get(address).cloned()
    }

    pub fn allowance(&self, address: &Pubkey) -> Option<Allowance> {
        self.account(address)
            .map(|data| decode_account::<Allowance>(&data).unwrap())
    }

    pub fn vault(&self, user: &Pubkey) -> Option<Vault> {
        let (casino, _) = derive_casino_pda(&self.program_id);
        let (vault, _) = derive_user_vault_pda(user, &casino, &self.program_id);
        self.account(&vault)
            .map(|data| decode_account::<Vault>(&data).unwrap())
    }

    pub fn next_nonce(&self, user: &Pubkey) -> u64 {
        let (casino, _) = derive_casino_pda(&self.program_id);
        let (registry, _) = derive_nonce_registry_pda(user, &casino, &self.program_id);
        self.account(&registry)
            .map(|data| decode_account::<AllowanceNonceRegistry>(&data).unwrap().next_nonce)
            .unwrap_or(0)
    }

    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state().calls.iter().filter(|c| c.method == method).count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Instant {
        let started = Instant::now();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        started
    }

    fn end(&self, method: &'static str, started: Instant, rate_limited: bool) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state().calls.push(CallRecord {
            method,
            started,
            finished: Instant::now(),
            rate_limited,
        });
    }

    /// Apply every vault instruction in `transaction` to `state`, all or nothing
    fn apply(&self, state: &mut LedgerState, transaction: &Transaction) -> std::result::Result<(), (usize, u32)> {
        let mut scratch = state.accounts.clone();
        let message = &transaction.message;

        for (index, instruction) in message.instructions.iter().enumerate() {
            let program = message.account_keys[instruction.program_id_index as usize];
            if program != self.program_id {
                continue;
            }
            let keys: Vec<Pubkey> = instruction
                .accounts
                .iter()
                .map(|i| message.account_keys[*i as usize])
                .collect();
            let decoded = VaultInstruction::decode(&instruction.data).map_err(|_| (index, 101))?;
            self.apply_instruction(&mut scratch, state.clock, &keys, decoded)
                .map_err(|code| (index, code))?;
        }

        state.accounts = scratch;
        Ok(())
    }

    fn apply_instruction(
        &self,
        accounts: &mut HashMap<Pubkey, Vec<u8>>,
        clock: i64,
        keys: &[Pubkey],
        instruction: VaultInstruction,
    ) -> std::result::Result<(), u32> {
        match instruction {
            VaultInstruction::InitializeVault => {
                let (vault, casino, user) = (keys[0], keys[1], keys[2]);
                if accounts.contains_key(&vault) {
                    return Err(ACCOUNT_IN_USE);
                }
                let (_, bump) = derive_user_vault_pda(&user, &casino, &self.program_id);
                let record = Vault {
                    owner: user,
                    casino,
                    bump,
                    sol_balance: 0,
                    created_at: clock,
                    last_activity: clock,
                };
                accounts.insert(vault, encode_account(&record));
            }
            VaultInstruction::DepositSol { amount } => {
                let mut record = Self::read_vault(accounts, &keys[0])?;
                record.sol_balance += amount;
                record.last_activity = clock;
                accounts.insert(keys[0], encode_account(&record));
            }
            VaultInstruction::WithdrawSol { amount } => {
                let mut record = Self::read_vault(accounts, &keys[0])?;
                record.sol_balance = record
                    .sol_balance
                    .checked_sub(amount)
                    .ok_or(INSUFFICIENT_BALANCE)?;
                record.last_activity = clock;
                accounts.insert(keys[0], encode_account(&record));
            }
            VaultInstruction::ApproveAllowanceV2 {
                amount,
                duration_seconds,
                token_mint,
                nonce,
            } => {
                let (casino, registry, allowance, user) = (keys[1], keys[2], keys[3], keys[5]);
                if !accounts.contains_key(&keys[0]) {
                    return Err(ACCOUNT_NOT_INITIALIZED);
                }
                let mut counter = match accounts.get(&registry) {
                    Some(data) => decode_account::<AllowanceNonceRegistry>(data).map_err(|_| ACCOUNT_NOT_INITIALIZED)?,
                    None => AllowanceNonceRegistry {
                        user,
                        casino,
                        next_nonce: 0,
                        bump: derive_nonce_registry_pda(&user, &casino, &self.program_id).1,
                    },
                };
                if nonce != counter.next_nonce {
                    return Err(INVALID_ALLOWANCE_NONCE);
                }
                let (expected, bump) = derive_allowance_pda(&user, &casino, nonce, &self.program_id);
                if expected != allowance || accounts.contains_key(&allowance) {
                    return Err(INVALID_ALLOWANCE_PDA);
                }

                let record = Allowance {
                    user,
                    casino,
                    token_mint,
                    amount,
                    spent: 0,
                    expires_at: clock + duration_seconds,
                    created_at: clock,
                    nonce,
                    revoked: false,
                    bump,
                    last_spent_at: 0,
                    spend_count: 0,
                };
                counter.next_nonce += 1;
                accounts.insert(allowance, encode_account(&record));
                accounts.insert(registry, encode_account(&counter));
            }
            VaultInstruction::RevokeAllowance => {
                let (allowance, user) = (keys[0], keys[1]);
                let data = accounts.get(&allowance).ok_or(ACCOUNT_NOT_INITIALIZED)?;
                let mut record = decode_account::<Allowance>(data).map_err(|_| ACCOUNT_NOT_INITIALIZED)?;
                if record.user != user {
                    return Err(UNAUTHORIZED_AUTHORITY);
                }
                record.revoked = true;
                accounts.insert(allowance, encode_account(&record));
            }
        }
        Ok(())
    }

    fn read_vault(accounts: &HashMap<Pubkey, Vec<u8>>, address: &Pubkey) -> std::result::Result<Vault, u32> {
        let data = accounts.get(address).ok_or(ACCOUNT_NOT_INITIALIZED)?;
        decode_account::<Vault>(data).map_err(|_| ACCOUNT_NOT_INITIALIZED)
    }

    fn failure(&self, index: usize, code: u32) -> (Value, Vec<String>) {
        (
            json!({"InstructionError": [index, {"Custom": code}]}),
            vec![
                format!("Program {} invoke [1]", self.program_id),
                format!("Program {} failed: custom program error: {:#x}", self.program_id, code),
            ],
        )
    }
}

#[async_trait]
impl RpcEndpoint for TestLedger {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let started = self.begin().await;
        let rate_limited = {
            let mut state = self.state();
            if state.rate_limited_reads > 0 {
                state.rate_limited_reads -= 1;
                true
            } else {
                false
            }
        };
        let result = if rate_limited {
            Err(SessionError::network("HTTP status client error (429 Too Many Requests)"))
        } else {
            Ok(self.account(address))
        };
        self.end("getAccountInfo", started, rate_limited);
        result
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        let started = self.begin().await;
        self.end("getLatestBlockhash", started, false);
        Ok(Hash::new_unique())
    }

    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationOutcome> {
        let started = self.begin().await;
        let outcome = {
            let state = self.state();
            if let Some(code) = state.simulation_failure {
                let (err, logs) = self.failure(0, code);
                SimulationOutcome {
                    err: Some(err),
                    logs,
                    units_consumed: Some(4_200),
                }
            } else {
                let mut dry_run = LedgerState {
                    accounts: state.accounts.clone(),
                    clock: state.clock,
                    ..Default::default()
                };
                match self.apply(&mut dry_run, transaction) {
                    Ok(()) => SimulationOutcome {
                        err: None,
                        logs: vec![format!("Program {} success", self.program_id)],
                        units_consumed: Some(12_000),
                    },
                    Err((index, code)) => {
                        let (err, logs) = self.failure(index, code);
                        SimulationOutcome {
                            err: Some(err),
                            logs,
                            units_consumed: Some(4_200),
                        }
                    }
                }
            }
        };
        self.end("simulateTransaction", started, false);
        Ok(outcome)
    }

    async fn send_transaction(&self, transaction: &Transaction, _skip_preflight: bool) -> Result<Signature> {
        let started = self.begin().await;
        let result = {
            let mut state = self.state();
            if !transaction.is_signed() || transaction.verify().is_err() {
                Err(SessionError::transaction_rejected("SignatureFailure"))
            } else {
                if state.race_vault_init {
                    state.race_vault_init = false;
                    let message = &transaction.message;
                    for instruction in &message.instructions {
                        if VaultInstruction::decode(&instruction.data).ok() == Some(VaultInstruction::InitializeVault) {
                            let keys: Vec<Pubkey> = instruction
                                .accounts
                                .iter()
                                .map(|i| message.account_keys[*i as usize])
                                .collect();
                            let clock = state.clock;
                            let _ = self.apply_instruction(&mut state.accounts, clock, &keys, VaultInstruction::InitializeVault);
                        }
                    }
                }

                let signature = transaction.signatures[0];
                match self.apply(&mut state, transaction) {
                    Ok(()) => {
                        state.sent.push(transaction.clone());
                        state.statuses.insert(signature, SignatureOutcome::Confirmed);
                        Ok(signature)
                    }
                    Err((index, code)) => {
                        let (err, logs) = self.failure(index, code);
                        Err(classify_transaction_failure(
                            Some(&err),
                            logs,
                            "Transaction simulation failed: Error processing Instruction",
                        ))
                    }
                }
            }
        };
        self.end("sendTransaction", started, false);
        result
    }

    async fn get_signature_status(&self, signature: &Signature) -> Result<Option<SignatureOutcome>> {
        let started = self.begin().await;
        let status = {
            let state = self.state();
            if state.never_confirm {
                None
            } else {
                state.statuses.get(signature).cloned()
            }
        };
        self.end("getSignatureStatuses", started, false);
        Ok(status)
    }

    fn url(&self) -> String {
        "memory://ledger".to_string()
    }
}

/// Signer that always declines
pub struct RejectingSigner;

#[async_trait]
impl TransactionSigner for RejectingSigner {
    async fn sign_transaction(&self, _transaction: Transaction) -> Result<Transaction> {
        Err(SessionError::user_rejected("User rejected the request"))
    }
}

/// Delegate sender that fails with a scripted error
pub struct FailingSender {
    error: SessionError,
    pub calls: AtomicUsize,
}

impl FailingSender {
    pub fn opaque() -> Arc<Self> {
        Self::with_error(SessionError::internal("WalletSendTransactionError: Unexpected error"))
    }

    pub fn with_error(error: SessionError) -> Arc<Self> {
        Arc::new(Self {
            error,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSender for FailingSender {
    async fn send_transaction(&self, _transaction: Transaction, _rpc_url: &str, _options: SendOptions) -> Result<Signature> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Wallet capability that throttles the ledger's account reads as it fails
///
/// Models a prompt that is declined while the endpoint starts rate limiting.
pub struct ThrottlingFailure {
    ledger: Arc<TestLedger>,
    error: SessionError,
}

impl ThrottlingFailure {
    pub fn new(ledger: Arc<TestLedger>, error: SessionError) -> Arc<Self> {
        Arc::new(Self { ledger, error })
    }
}

#[async_trait]
impl TransactionSigner for ThrottlingFailure {
    async fn sign_transaction(&self, _transaction: Transaction) -> Result<Transaction> {
        self.ledger.rate_limit_account_reads(10);
        Err(self.error.clone())
    }
}

#[async_trait]
impl TransactionSender for ThrottlingFailure {
    async fn send_transaction(&self, _transaction: Transaction, _rpc_url: &str, _options: SendOptions) -> Result<Signature> {
        self.ledger.rate_limit_account_reads(10);
        Err(self.error.clone())
    }
}

/// Delegate sender that signs with its own key and sends straight to the ledger
pub struct LedgerSender {
    ledger: Arc<TestLedger>,
    keypair: Keypair,
    pub calls: AtomicUsize,
}

impl LedgerSender {
    pub fn new(ledger: Arc<TestLedger>, keypair: &Keypair) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            keypair: keypair.insecure_clone(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSender for LedgerSender {
    async fn send_transaction(&self, mut transaction: Transaction, _rpc_url: &str, options: SendOptions) -> Result<Signature> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(&[&self.keypair], blockhash)
            .map_err(|e| SessionError::internal(e.to_string()))?;
        self.ledger
            .send_transaction(&transaction, options.skip_preflight)
            .await
    }
}

pub fn tx_config() -> TxConfig {
    TxConfig {
        confirm_timeout: Duration::from_secs(90),
        poll_interval: Duration::from_millis(2500),
        compute_unit_limit: Some(200_000),
        priority_fee_micro_lamports: Some(1_000),
    }
}

/// Ledger, cache and manager wired the way the binary wires them
pub struct TestContext {
    pub ledger: Arc<TestLedger>,
    pub cache: Arc<PlaySessionCache>,
    pub manager: AllowanceManager,
    pub keypair: Arc<Keypair>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_ledger(TestLedger::new())
    }

    pub fn with_ledger(ledger: Arc<TestLedger>) -> Self {
        Self::with_cache(ledger, Arc::new(PlaySessionCache::in_memory()), Arc::new(Keypair::new()))
    }

    /// A second process over the same ledger and user, with its own cache
    pub fn restart(&self) -> Self {
        Self::with_cache(
            self.ledger.clone(),
            Arc::new(PlaySessionCache::in_memory()),
            self.keypair.clone(),
        )
    }

    fn with_cache(ledger: Arc<TestLedger>, cache: Arc<PlaySessionCache>, keypair: Arc<Keypair>) -> Self {
        let manager = session::build_allowance_manager(
            ledger.clone(),
            PROGRAM_ID,
            RetryStrategy::new(2, Duration::from_millis(1000)),
            tx_config(),
            AllowanceConfig::default(),
            cache.clone(),
        )
        .with_clock(ledger.clock());

        Self {
            ledger,
            cache,
            manager,
            keypair,
        }
    }

    pub fn user(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Wallet with an in-process signer
    pub fn wallet(&self) -> Wallet {
        Wallet::from_keypair(self.keypair.insecure_clone())
    }
}
