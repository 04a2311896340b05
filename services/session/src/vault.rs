use std::sync::Arc;

use shared::errors::{ErrorKind, Result, SessionError};
use shared::types::{Casino, Vault};
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::solana_instructions::{
    build_deposit_sol_instruction, build_initialize_vault_instruction,
    build_withdraw_sol_instruction,
};
use crate::solana_pda::{derive_casino_pda, SessionAddresses};
use crate::solana_tx::{TransactionManager, TxOptions, TxReceipt};
use crate::wallet::Wallet;

/// Custodial vault operations for one program deployment
pub struct VaultClient {
    tx: Arc<TransactionManager>,
    program_id: Pubkey,
    casino: Pubkey,
}

impl VaultClient {
    pub fn new(tx: Arc<TransactionManager>, program_id: Pubkey) -> Self {
        let (casino, _) = derive_casino_pda(&program_id);
        Self {
            tx,
            program_id,
            casino,
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    /// The spender every allowance is granted to
    pub fn casino(&self) -> Pubkey {
        self.casino
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.tx
    }

    pub fn addresses(&self, user: &Pubkey) -> SessionAddresses {
        SessionAddresses::derive(&self.program_id, user, &self.casino)
    }

    pub async fn fetch_casino(&self) -> Result<Option<Casino>> {
        self.tx.rpc().fetch_account::<Casino>(&self.casino).await
    }

    pub async fn fetch_vault(&self, user: &Pubkey) -> Result<Option<Vault>> {
        let addresses = self.addresses(user);
        self.tx.rpc().fetch_account::<Vault>(&addresses.vault).await
    }

    /// Make sure the wallet's vault exists; `true` when this call created it
    ///
    /// An init failure is followed by a re-read: if someone else initialized
    /// the vault in the meantime, that is success. Rejections skip the re-read,
    /// and a failed re-read never replaces the init error.
    pub async fn ensure_vault(&self, wallet: &Wallet) -> Result<bool> {
        let user = wallet.pubkey();
        if self.fetch_vault(&user).await?.is_some() {
            return Ok(false);
        }

        let addresses = self.addresses(&user);
        let instruction = build_initialize_vault_instruction(&addresses);
        match self
            .tx
            .execute(wallet, &[instruction], TxOptions::default(), "initialize_vault")
            .await
        {
            Ok(receipt) => {
                info!(user = %user, vault = %addresses.vault, signature = %receipt.signature, "Vault initialized");
                Ok(true)
            }
            Err(error) if matches!(error.kind, ErrorKind::UserRejected | ErrorKind::InvalidInput) => {
                Err(error)
            }
            Err(error) => match self.fetch_vault(&user).await {
                Ok(Some(_)) => {
                    info!(user = %user, error = %error, "Vault already initialized, continuing");
                    Ok(false)
                }
                Ok(None) => Err(error),
                Err(reread) => {
                    warn!(user = %user, error = %reread, "Vault re-read after failed init also failed");
                    Err(error)
                }
            },
        }
    }

    /// Deposit SOL, initializing the vault first if needed
    pub async fn deposit(&self, wallet: &Wallet, amount: u64) -> Result<TxReceipt> {
        if amount == 0 {
            return Err(SessionError::invalid_input("Deposit amount must be positive"));
        }
        self.ensure_vault(wallet).await?;

        let addresses = self.addresses(&wallet.pubkey());
        let instruction = build_deposit_sol_instruction(&addresses, amount);
        let receipt = self
            .tx
            .execute(wallet, &[instruction], TxOptions::simulated(), "deposit_sol")
            .await?;
        info!(user = %addresses.user, amount, signature = %receipt.signature, "Deposit confirmed");
        Ok(receipt)
    }

    pub async fn withdraw(&self, wallet: &Wallet, amount: u64) -> Result<TxReceipt> {
        if amount == 0 {
            return Err(SessionError::invalid_input("Withdraw amount must be positive"));
        }
        let addresses = self.addresses(&wallet.pubkey());
        if self.fetch_vault(&addresses.user).await?.is_none() {
            return Err(SessionError::account_not_found("Vault", addresses.vault));
        }

        let instruction = build_withdraw_sol_instruction(&addresses, amount);
        let receipt = self
            .tx
            .execute(wallet, &[instruction], TxOptions::simulated(), "withdraw_sol")
            .await?;
        info!(user = %addresses.user, amount, signature = %receipt.signature, "Withdrawal confirmed");
        Ok(receipt)
    }
}
