//! Structural verification of a candidate payment transaction.
//!
//! The facilitator co-signs and broadcasts whatever it accepts, so it refuses
//! to sign anything it cannot fully audit. Acceptable transactions follow a
//! fixed three-instruction template: a compute-budget prelude (unit limit and
//! unit price, in either order) followed by a single SPL `TransferChecked`.
//!
//! Verification is pure: it runs on the decoded bytes and the stated
//! [`PaymentRequirements`] only, with no RPC. Sender balance is not checked
//! here; insufficient funds surface as a settlement-time RPC rejection.
//! Checks run in a fixed order and the first failure is reported.

use solana_pubkey::{Pubkey, pubkey};

use crate::transaction::{CompiledInstruction, Transaction};
use crate::types::PaymentRequirements;

pub const COMPUTE_BUDGET_PROGRAM: Pubkey =
    pubkey!("ComputeBudget111111111111111111111111111111");
pub const ATA_PROGRAM: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

const COMPUTE_UNIT_LIMIT_DISCRIMINATOR: u8 = 2;
const COMPUTE_UNIT_PRICE_DISCRIMINATOR: u8 = 3;

/// Facilitator-side limits applied during verification.
#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    /// Maximum accepted compute-unit price in micro-lamports.
    pub max_compute_unit_price: u64,
    /// Decimal precision of the configured mint.
    pub expected_decimals: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Expected 3 instructions, got {0}")]
    InstructionCount(usize),
    #[error("First 2 instructions must be ComputeBudget instructions")]
    ComputeBudgetPrelude,
    #[error("Invalid SetComputeUnitLimit instruction")]
    MalformedComputeLimit,
    #[error("Invalid SetComputeUnitPrice instruction")]
    MalformedComputePrice,
    #[error("Compute unit price {price} exceeds max {max}")]
    ComputeUnitPriceTooHigh { price: u64, max: u64 },
    #[error("Third instruction must be an SPL Token TransferChecked")]
    NotTransferChecked,
    #[error("TransferChecked requires exactly 4 accounts, got {0}")]
    TransferAccountCount(usize),
    #[error("Amount {amount} does not match required {required}")]
    AmountMismatch { amount: u64, required: u64 },
    #[error("Decimals {decimals} does not match expected {expected}")]
    DecimalsMismatch { decimals: u8, expected: u8 },
    #[error("Mint {mint} does not match required {required}")]
    MintMismatch { mint: Pubkey, required: Pubkey },
    #[error("Destination {destination} does not match expected ATA {expected}")]
    DestinationMismatch {
        destination: Pubkey,
        expected: Pubkey,
    },
    #[error("Transaction fee payer {found} does not match facilitator {expected}")]
    FeePayerMismatch { found: Pubkey, expected: Pubkey },
    #[error("Fee payer must not be in instruction accounts")]
    FeePayerInInstructionAccounts,
    #[error("Expected exactly 2 required signatures, got {0}")]
    RequiredSignatureCount(u8),
    #[error("Transfer authority does not match the second signer")]
    AuthorityMismatch,
}

/// The audited transfer extracted from a valid transaction.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedTransfer {
    pub amount: u64,
    pub source: Pubkey,
    pub mint: Pubkey,
    pub destination: Pubkey,
    pub authority: Pubkey,
    pub token_program: Pubkey,
}

/// Derive the associated token address holding `owner`'s balance of `mint`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    let (ata, _bump) = Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM,
    );
    ata
}

/// Check a decoded transaction against the stated requirements.
pub fn verify_transaction(
    transaction: &Transaction,
    requirements: &PaymentRequirements,
    policy: &VerifyPolicy,
) -> Result<VerifiedTransfer, VerifyError> {
    let message = &transaction.message;
    let account_keys = &message.account_keys;
    let instructions = &message.instructions;

    if instructions.len() != 3 {
        return Err(VerifyError::InstructionCount(instructions.len()));
    }

    verify_compute_budget_prelude(&instructions[0..2], account_keys, policy)?;

    let transfer =
        verify_transfer_instruction(&instructions[2], account_keys, requirements, policy)?;

    let fee_payer = *requirements.extra.fee_payer.pubkey();
    match message.fee_payer() {
        Some(found) if *found == fee_payer => {}
        found => {
            return Err(VerifyError::FeePayerMismatch {
                found: found.copied().unwrap_or_default(),
                expected: fee_payer,
            });
        }
    }
    for instruction in instructions {
        for &index in &instruction.accounts {
            if account_keys[index as usize] == fee_payer {
                return Err(VerifyError::FeePayerInInstructionAccounts);
            }
        }
    }

    let required = message.header.num_required_signatures;
    if required != 2 {
        return Err(VerifyError::RequiredSignatureCount(required));
    }
    if account_keys[1] != transfer.authority {
        return Err(VerifyError::AuthorityMismatch);
    }

    Ok(transfer)
}

/// Instructions 0 and 1 must both target the compute-budget program: one
/// SetComputeUnitLimit (0x02), one SetComputeUnitPrice (0x03), either order.
/// The bid price is bounded so a client cannot spend the facilitator's SOL on
/// priority fees.
fn verify_compute_budget_prelude(
    prelude: &[CompiledInstruction],
    account_keys: &[Pubkey],
    policy: &VerifyPolicy,
) -> Result<(), VerifyError> {
    let mut limit_instruction = None;
    let mut price_instruction = None;
    for instruction in prelude {
        if *instruction.program_id(account_keys) != COMPUTE_BUDGET_PROGRAM {
            return Err(VerifyError::ComputeBudgetPrelude);
        }
        match instruction.data.first() {
            Some(&COMPUTE_UNIT_LIMIT_DISCRIMINATOR) if limit_instruction.is_none() => {
                limit_instruction = Some(instruction);
            }
            Some(&COMPUTE_UNIT_PRICE_DISCRIMINATOR) if price_instruction.is_none() => {
                price_instruction = Some(instruction);
            }
            _ => return Err(VerifyError::ComputeBudgetPrelude),
        }
    }
    let (Some(limit_instruction), Some(price_instruction)) = (limit_instruction, price_instruction)
    else {
        return Err(VerifyError::ComputeBudgetPrelude);
    };

    // [discriminator: u8][units: u32 le]
    if limit_instruction.data.len() != 5 {
        return Err(VerifyError::MalformedComputeLimit);
    }

    // [discriminator: u8][price: u64 le]
    if price_instruction.data.len() != 9 {
        return Err(VerifyError::MalformedComputePrice);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&price_instruction.data[1..9]);
    let price = u64::from_le_bytes(buf);
    if price > policy.max_compute_unit_price {
        return Err(VerifyError::ComputeUnitPriceTooHigh {
            price,
            max: policy.max_compute_unit_price,
        });
    }

    Ok(())
}

/// Instruction 2 must be a `TransferChecked` of either token program, with
/// accounts `[source, mint, destination, authority]`, moving exactly the
/// required amount of the required mint into the recipient's ATA.
fn verify_transfer_instruction(
    instruction: &CompiledInstruction,
    account_keys: &[Pubkey],
    requirements: &PaymentRequirements,
    policy: &VerifyPolicy,
) -> Result<VerifiedTransfer, VerifyError> {
    let token_program = *instruction.program_id(account_keys);
    let (amount, decimals) = if token_program == spl_token::ID {
        match spl_token::instruction::TokenInstruction::unpack(&instruction.data) {
            Ok(spl_token::instruction::TokenInstruction::TransferChecked { amount, decimals }) => {
                (amount, decimals)
            }
            _ => return Err(VerifyError::NotTransferChecked),
        }
    } else if token_program.to_bytes() == spl_token_2022::ID.to_bytes() {
        match spl_token_2022::instruction::TokenInstruction::unpack(&instruction.data) {
            Ok(spl_token_2022::instruction::TokenInstruction::TransferChecked {
                amount,
                decimals,
            }) => (amount, decimals),
            _ => return Err(VerifyError::NotTransferChecked),
        }
    } else {
        return Err(VerifyError::NotTransferChecked);
    };

    if instruction.accounts.len() != 4 {
        return Err(VerifyError::TransferAccountCount(instruction.accounts.len()));
    }
    let source = account_keys[instruction.accounts[0] as usize];
    let mint = account_keys[instruction.accounts[1] as usize];
    let destination = account_keys[instruction.accounts[2] as usize];
    let authority = account_keys[instruction.accounts[3] as usize];

    let required = requirements.max_amount_required.0;
    if amount != required {
        return Err(VerifyError::AmountMismatch { amount, required });
    }

    if decimals != policy.expected_decimals {
        return Err(VerifyError::DecimalsMismatch {
            decimals,
            expected: policy.expected_decimals,
        });
    }

    let required_mint = *requirements.asset.pubkey();
    if mint != required_mint {
        return Err(VerifyError::MintMismatch {
            mint,
            required: required_mint,
        });
    }

    let expected =
        associated_token_address(requirements.pay_to.pubkey(), &required_mint, &token_program);
    if destination != expected {
        return Err(VerifyError::DestinationMismatch {
            destination,
            expected,
        });
    }

    Ok(VerifiedTransfer {
        amount,
        source,
        mint,
        destination,
        authority,
        token_program,
    })
}
