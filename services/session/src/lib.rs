//! Play-session allowance client for the casino vault program
//!
//! Layers, bottom-up: address derivation and account codec, a coordinated
//! RPC handle, the transaction lifecycle manager, and the allowance state
//! machine with its play session cache.

pub mod allowance;
pub mod config;
pub mod play_session;
pub mod program_error;
pub mod retry_strategy;
pub mod rpc_coordinator;
pub mod solana_account_parsing;
pub mod solana_client;
pub mod solana_instructions;
pub mod solana_pda;
pub mod solana_tx;
pub mod vault;
pub mod wallet;

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;

use crate::allowance::{AllowanceConfig, AllowanceManager};
use crate::play_session::PlaySessionCache;
use crate::retry_strategy::RetryStrategy;
use crate::rpc_coordinator::{CoordinatedRpc, RpcCoordinator};
use crate::solana_client::RpcEndpoint;
use crate::solana_tx::{TransactionManager, TxConfig};
use crate::vault::VaultClient;

/// Wire the layers over one endpoint with one process-wide coordinator
pub fn build_allowance_manager(
    endpoint: Arc<dyn RpcEndpoint>,
    program_id: Pubkey,
    retry: RetryStrategy,
    tx_config: TxConfig,
    allowance_config: AllowanceConfig,
    cache: Arc<PlaySessionCache>,
) -> AllowanceManager {
    let coordinator = Arc::new(RpcCoordinator::new(retry));
    let rpc = CoordinatedRpc::new(endpoint, coordinator);
    let tx = Arc::new(TransactionManager::new(rpc, tx_config));
    let vault = Arc::new(VaultClient::new(tx, program_id));
    AllowanceManager::new(vault, cache, allowance_config)
}
