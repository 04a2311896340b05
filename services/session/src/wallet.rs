//! Wallet capabilities
//!
//! Signing and sending are never done by the transaction manager itself;
//! a wallet hands it narrow capabilities. A host wallet may expose only one
//! of the two.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use shared::errors::{Result, SessionError};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature},
    signer::Signer,
    transaction::Transaction,
};

/// Options forwarded to a delegate sender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub skip_preflight: bool,
    pub max_retries: Option<usize>,
}

/// Signs a fully built transaction; may fail with `UserRejected`
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction>;
}

/// Signs and submits in one step against `rpc_url`
///
/// Errors from host wallets are often opaque; the transaction manager
/// decides whether they warrant a sign-then-send fallback.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    async fn send_transaction(
        &self,
        transaction: Transaction,
        rpc_url: &str,
        options: SendOptions,
    ) -> Result<Signature>;
}

/// A user identity plus whatever capabilities its wallet exposes
#[derive(Clone)]
pub struct Wallet {
    pubkey: Pubkey,
    signer: Option<Arc<dyn TransactionSigner>>,
    sender: Option<Arc<dyn TransactionSender>>,
}

impl Wallet {
    /// Read-only wallet: can look things up but not transact
    pub fn new(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            signer: None,
            sender: None,
        }
    }

    /// Local keypair wallet with a signer capability
    pub fn from_keypair(keypair: Keypair) -> Self {
        let pubkey = keypair.pubkey();
        Self::new(pubkey).with_signer(Arc::new(KeypairSigner::new(keypair)))
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn TransactionSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    pub fn signer(&self) -> Option<&Arc<dyn TransactionSigner>> {
        self.signer.as_ref()
    }

    pub fn sender(&self) -> Option<&Arc<dyn TransactionSender>> {
        self.sender.as_ref()
    }

    pub fn can_transact(&self) -> bool {
        self.signer.is_some() || self.sender.is_some()
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("pubkey", &self.pubkey)
            .field("signer", &self.signer.is_some())
            .field("sender", &self.sender.is_some())
            .finish()
    }
}

/// Signer backed by an in-process keypair (CLI and tests)
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    async fn sign_transaction(&self, mut transaction: Transaction) -> Result<Transaction> {
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(&[&self.keypair], blockhash)
            .map_err(|e| SessionError::internal("Keypair signing failed").with_context(e.to_string()))?;
        Ok(transaction)
    }
}

pub fn load_wallet_keypair(path: &str) -> AnyResult<Keypair> {
    let keypair = read_keypair_file(Path::new(path))
        .map_err(|e| anyhow::anyhow!("Failed to load wallet keypair from {}: {}", path, e))?;
    Ok(keypair)
}
