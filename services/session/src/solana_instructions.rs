//! Solana instruction builders

use shared::errors::{ErrorKind, Result, SessionError};
use shared::program_ids::MEMO_PROGRAM_ID;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use crate::solana_pda::SessionAddresses;

/// Anchor instruction discriminator: sha256("global:<name>")[0..8]
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = hash(format!("global:{}", name).as_bytes()).to_bytes();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Vault program instructions this client submits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultInstruction {
    InitializeVault,
    DepositSol {
        amount: u64,
    },
    WithdrawSol {
        amount: u64,
    },
    ApproveAllowanceV2 {
        amount: u64,
        duration_seconds: i64,
        token_mint: Pubkey,
        nonce: u64,
    },
    RevokeAllowance,
}

impl VaultInstruction {
    pub const ALL_NAMES: [&'static str; 5] = [
        "initialize_vault",
        "deposit_sol",
        "withdraw_sol",
        "approve_allowance_v2",
        "revoke_allowance",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VaultInstruction::InitializeVault => "initialize_vault",
            VaultInstruction::DepositSol { .. } => "deposit_sol",
            VaultInstruction::WithdrawSol { .. } => "withdraw_sol",
            VaultInstruction::ApproveAllowanceV2 { .. } => "approve_allowance_v2",
            VaultInstruction::RevokeAllowance => "revoke_allowance",
        }
    }

    /// Discriminator followed by the little-endian arguments
    pub fn data(&self) -> Vec<u8> {
        let mut data = instruction_discriminator(self.name()).to_vec();
        match self {
            VaultInstruction::InitializeVault | VaultInstruction::RevokeAllowance => {}
            VaultInstruction::DepositSol { amount } | VaultInstruction::WithdrawSol { amount } => {
                data.extend_from_slice(&amount.to_le_bytes());
            }
            VaultInstruction::ApproveAllowanceV2 {
                amount,
                duration_seconds,
                token_mint,
                nonce,
            } => {
                data.extend_from_slice(&amount.to_le_bytes());
                data.extend_from_slice(&duration_seconds.to_le_bytes());
                data.extend_from_slice(token_mint.as_ref());
                data.extend_from_slice(&nonce.to_le_bytes());
            }
        }
        data
    }

    /// Inverse of [`VaultInstruction::data`]
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(SessionError::decode("instruction", data.len(), 8));
        }
        let (tag, args) = data.split_at(8);
        let name = Self::ALL_NAMES
            .iter()
            .find(|name| instruction_discriminator(name) == tag)
            .ok_or_else(|| {
                SessionError::new(ErrorKind::DecodeError, "Unknown instruction discriminator")
                    .with_context(format!("{:?}", tag))
            })?;

        let need = |len: usize| -> Result<()> {
            if args.len() < len {
                Err(SessionError::decode(name, data.len(), 8 + len))
            } else {
                Ok(())
            }
        };
        let u64_at = |offset: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&args[offset..offset + 8]);
            buf
        };

        match *name {
            "initialize_vault" => Ok(VaultInstruction::InitializeVault),
            "revoke_allowance" => Ok(VaultInstruction::RevokeAllowance),
            "deposit_sol" => {
                need(8)?;
                Ok(VaultInstruction::DepositSol {
                    amount: u64::from_le_bytes(u64_at(0)),
                })
            }
            "withdraw_sol" => {
                need(8)?;
                Ok(VaultInstruction::WithdrawSol {
                    amount: u64::from_le_bytes(u64_at(0)),
                })
            }
            _ => {
                need(8 + 8 + 32 + 8)?;
                let mut mint = [0u8; 32];
                mint.copy_from_slice(&args[16..48]);
                Ok(VaultInstruction::ApproveAllowanceV2 {
                    amount: u64::from_le_bytes(u64_at(0)),
                    duration_seconds: i64::from_le_bytes(u64_at(8)),
                    token_mint: Pubkey::new_from_array(mint),
                    nonce: u64::from_le_bytes(u64_at(48)),
                })
            }
        }
    }
}

/// Build initialize_vault instruction
pub fn build_initialize_vault_instruction(addresses: &SessionAddresses) -> Instruction {
    Instruction {
        program_id: addresses.program_id,
        accounts: vec![
            AccountMeta::new(addresses.vault, false),
            AccountMeta::new_readonly(addresses.casino, false),
            AccountMeta::new(addresses.user, true),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: VaultInstruction::InitializeVault.data(),
    }
}

/// Build deposit_sol instruction
pub fn build_deposit_sol_instruction(addresses: &SessionAddresses, amount: u64) -> Instruction {
    Instruction {
        program_id: addresses.program_id,
        accounts: vec![
            AccountMeta::new(addresses.vault, false),
            AccountMeta::new_readonly(addresses.casino, false),
            AccountMeta::new(addresses.user, true),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: VaultInstruction::DepositSol { amount }.data(),
    }
}

/// Build withdraw_sol instruction
pub fn build_withdraw_sol_instruction(addresses: &SessionAddresses, amount: u64) -> Instruction {
    Instruction {
        program_id: addresses.program_id,
        accounts: vec![
            AccountMeta::new(addresses.vault, false),
            AccountMeta::new_readonly(addresses.casino, false),
            AccountMeta::new(addresses.user, true),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: VaultInstruction::WithdrawSol { amount }.data(),
    }
}

/// Build approve_allowance_v2 instruction
///
/// `nonce` must equal the registry's current `next_nonce`; the program
/// rejects anything else with `InvalidAllowanceNonce`.
pub fn build_approve_allowance_v2_instruction(
    addresses: &SessionAddresses,
    amount: u64,
    duration_seconds: i64,
    token_mint: &Pubkey,
    nonce: u64,
) -> Instruction {
    Instruction {
        program_id: addresses.program_id,
        accounts: vec![
            AccountMeta::new(addresses.vault, false),
            AccountMeta::new_readonly(addresses.casino, false),
            AccountMeta::new(addresses.nonce_registry, false),
            AccountMeta::new(addresses.allowance(nonce), false),
            AccountMeta::new(addresses.rate_limiter, false),
            AccountMeta::new(addresses.user, true),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: VaultInstruction::ApproveAllowanceV2 {
            amount,
            duration_seconds,
            token_mint: *token_mint,
            nonce,
        }
        .data(),
    }
}

/// Build revoke_allowance instruction
pub fn build_revoke_allowance_instruction(
    program_id: &Pubkey,
    allowance: &Pubkey,
    user: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*allowance, false),
            AccountMeta::new_readonly(*user, true),
        ],
        data: VaultInstruction::RevokeAllowance.data(),
    }
}

/// Memo instruction that makes an otherwise identical retry a distinct transaction
pub fn build_uniqueness_marker_instruction(marker: &str) -> Instruction {
    Instruction {
        program_id: MEMO_PROGRAM_ID,
        accounts: vec![],
        data: marker.as_bytes().to_vec(),
    }
}

/// Compute-budget instructions; empty when neither knob is set
pub fn build_priority_fee_instructions(
    compute_unit_limit: Option<u32>,
    micro_lamports_per_cu: Option<u64>,
) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(2);
    if let Some(limit) = compute_unit_limit {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(limit));
    }
    if let Some(price) = micro_lamports_per_cu {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(price));
    }
    instructions
}
