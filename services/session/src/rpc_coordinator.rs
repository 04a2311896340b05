//! RPC resiliency coordinator
//!
//! Every outbound RPC call goes through one coordinator:
//! - at most one call is in flight, callers queue in FIFO order
//! - a 429 opens a shared cooldown window that every queued call honors
//! - rate-limited calls are retried with doubling delay plus jitter
//! - any other error propagates on the first occurrence

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shared::errors::{ErrorKind, Result, SessionError};
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::retry_strategy::RetryStrategy;
use crate::solana_account_parsing::{decode_account, AccountRecord};
use crate::solana_client::{RpcEndpoint, SignatureOutcome, SimulationOutcome};

pub struct RpcCoordinator {
    strategy: RetryStrategy,
    /// tokio's mutex grants the lock in request order
    slot: Mutex<()>,
    cooldown_until: std::sync::Mutex<Option<Instant>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RpcCoordinator {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            slot: Mutex::new(()),
            cooldown_until: std::sync::Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Calls currently executing (0 or 1)
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest concurrency ever observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Time left in the shared cooldown window
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let guard = self
            .cooldown_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.and_then(|deadline| {
            let now = Instant::now();
            (deadline > now).then(|| deadline - now)
        })
    }

    fn extend_cooldown(&self, delay: Duration) {
        let mut guard = self
            .cooldown_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let deadline = Instant::now() + delay;
        *guard = Some(match *guard {
            Some(existing) if existing > deadline => existing,
            _ => deadline,
        });
    }

    async fn wait_for_cooldown(&self) {
        while let Some(remaining) = self.cooldown_remaining() {
            sleep(remaining).await;
        }
    }

    /// Run `call` under the coordinator's discipline
    ///
    /// `operation` labels logs; `call` is invoked once per attempt.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.strategy.create_backoff();
        let mut attempt: u32 = 0;

        loop {
            self.wait_for_cooldown().await;

            let result = {
                let _slot = self.slot.lock().await;
                // The window may have opened while we were queued
                self.wait_for_cooldown().await;

                let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
                metrics::counter!("rpc_calls_total").increment(1);
                debug!(operation, attempt, "RPC call");
                call().await
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.strategy.is_rate_limited(&error) {
                return Err(error);
            }
            metrics::counter!("rpc_rate_limited_total").increment(1);

            if !self.strategy.should_retry(attempt) {
                metrics::counter!("rpc_retry_exhausted_total").increment(1);
                warn!(
                    operation,
                    attempts = attempt + 1,
                    "RPC still rate limited after retries exhausted"
                );
                return Err(SessionError {
                    kind: ErrorKind::RateLimited,
                    ..error
                });
            }

            let delay = self.strategy.next_delay(&mut backoff);
            self.extend_cooldown(delay);
            let jitter = self.strategy.jitter(delay);

            warn!(
                operation,
                attempt = attempt + 1,
                max_retries = self.strategy.max_retries(),
                delay_ms = delay.as_millis() as u64,
                jitter_ms = jitter.as_millis() as u64,
                "RPC rate limited, backing off"
            );

            sleep(delay + jitter).await;
            attempt += 1;
        }
    }
}

impl Default for RpcCoordinator {
    fn default() -> Self {
        Self::new(RetryStrategy::default())
    }
}

/// An endpoint whose every call goes through a shared coordinator
#[derive(Clone)]
pub struct CoordinatedRpc {
    endpoint: Arc<dyn RpcEndpoint>,
    coordinator: Arc<RpcCoordinator>,
}

impl CoordinatedRpc {
    pub fn new(endpoint: Arc<dyn RpcEndpoint>, coordinator: Arc<RpcCoordinator>) -> Self {
        Self {
            endpoint,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<RpcCoordinator> {
        &self.coordinator
    }

    pub fn url(&self) -> String {
        self.endpoint.url()
    }

    pub async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        self.coordinator
            .with_retry("getAccountInfo", || self.endpoint.get_account_data(address))
            .await
    }

    /// Fetch and decode; `None` when the account does not exist
    pub async fn fetch_account<T: AccountRecord>(&self, address: &Pubkey) -> Result<Option<T>> {
        match self.get_account_data(address).await? {
            Some(data) => decode_account::<T>(&data).map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.coordinator
            .with_retry("getLatestBlockhash", || self.endpoint.get_latest_blockhash())
            .await
    }

    pub async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationOutcome> {
        self.coordinator
            .with_retry("simulateTransaction", || {
                self.endpoint.simulate_transaction(transaction)
            })
            .await
    }

    pub async fn send_transaction(
        &self,
        transaction: &Transaction,
        skip_preflight: bool,
    ) -> Result<Signature> {
        self.coordinator
            .with_retry("sendTransaction", || {
                self.endpoint.send_transaction(transaction, skip_preflight)
            })
            .await
    }

    pub async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureOutcome>> {
        self.coordinator
            .with_retry("getSignatureStatuses", || {
                self.endpoint.get_signature_status(signature)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn coordinator(max_retries: u32) -> RpcCoordinator {
        RpcCoordinator::new(RetryStrategy::new(max_retries, Duration::from_millis(1000)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_through() {
        let coordinator = coordinator(2);
        let value = coordinator
            .with_retry("test", || async { Ok::<_, SessionError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(coordinator.cooldown_remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_error_is_not_retried() {
        let coordinator = coordinator(2);
        let calls = AtomicU32::new(0);

        let err = coordinator
            .with_retry("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SessionError::network("connection reset")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_then_surfaces() {
        let coordinator = coordinator(2);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let err = coordinator
            .with_retry("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SessionError::network("429 Too Many Requests")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff at minimum
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success() {
        let coordinator = coordinator(2);
        let calls = AtomicU32::new(0);

        let value = coordinator
            .with_retry("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SessionError::rate_limited("429"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_never_overlap() {
        let coordinator = Arc::new(coordinator(2));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .with_retry("test", || async {
                            sleep(Duration::from_millis(50)).await;
                            Ok::<_, SessionError>(())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(coordinator.peak_in_flight(), 1);
        assert_eq!(coordinator.in_flight(), 0);
    }
}
