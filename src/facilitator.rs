//! The facilitator: owns the fee-payer keypair, verifies candidate payments,
//! and co-signs and settles accepted ones on-chain.
//!
//! A payment traverses `Received → Decoded → Verified → CoSigned → Submitted`
//! and ends `Confirmed` (with an on-chain signature) or `Rejected` (with a
//! user-visible reason). Nothing is persisted between requests; the keypair
//! is the only process-wide state and is read-only after construction.

use std::time::Duration;

use solana_keypair::Keypair;
use solana_signer::Signer;

use crate::config::Config;
use crate::rpc::{RpcClient, RpcError};
use crate::transaction::{Transaction, TransactionDecodeError};
use crate::types::{
    Address, Network, PaymentRequirements, RequirementsExtra, RequirementsRequest, Scheme,
    TokenAmount, VerifyResponse,
};
use crate::util::{MoneyAmount, MoneyAmountParseError};
use crate::verify::{VerifiedTransfer, VerifyError, VerifyPolicy, verify_transaction};

/// Why a payment header was rejected before touching the chain.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Failed to parse transaction: {0}")]
    Decode(#[from] TransactionDecodeError),
    #[error("{0}")]
    Policy(#[from] VerifyError),
}

/// Why settlement failed.
#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("Verification failed: {0}")]
    Verification(#[from] PaymentError),
    #[error("Failed to co-sign transaction: {0}")]
    Signing(String),
    #[error("Transaction is not fully signed")]
    NotFullySigned,
    #[error("{0}")]
    Rpc(#[from] RpcError),
    #[error("timeout")]
    Timeout,
}

impl SettleError {
    /// True when the failure is on the facilitator's side of the chain
    /// boundary and worth retrying against the same payload.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SettleError::Rpc(e) if e.is_retriable())
    }
}

/// Why a requirements request could not be turned into requirements.
#[derive(Debug, thiserror::Error)]
pub enum RequirementsError {
    #[error("Invalid price: {0}")]
    Price(#[from] MoneyAmountParseError),
    #[error("payTo must not be the facilitator fee payer")]
    PayToIsFeePayer,
}

/// A confirmed settlement.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// Base58 transaction signature, the on-chain settlement proof.
    pub tx_hash: String,
    /// The account that paid: the transfer authority.
    pub payer: Address,
    pub network: Network,
}

/// Verifies and settles x402 payments on Solana, acting as gas sponsor for
/// client transactions.
pub struct SolanaFacilitator {
    keypair: Keypair,
    rpc: RpcClient,
    network: Network,
    mint: Address,
    decimals: u8,
    max_compute_unit_price: u64,
    default_timeout: Duration,
}

impl SolanaFacilitator {
    pub fn new(keypair: Keypair, rpc: RpcClient, config: &Config) -> Self {
        Self {
            keypair,
            rpc,
            network: config.network(),
            mint: config.mint(),
            decimals: config.decimals(),
            max_compute_unit_price: config.max_compute_unit_price(),
            default_timeout: config.default_timeout(),
        }
    }

    pub fn fee_payer(&self) -> Address {
        Address::from(self.keypair.pubkey())
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn mint(&self) -> Address {
        self.mint
    }

    fn policy(&self) -> VerifyPolicy {
        VerifyPolicy {
            max_compute_unit_price: self.max_compute_unit_price,
            expected_decimals: self.decimals,
        }
    }

    /// Build payment requirements for a priced resource, converting the
    /// human USD price into atomic units of the configured mint.
    pub fn payment_requirements(
        &self,
        request: RequirementsRequest,
    ) -> Result<PaymentRequirements, RequirementsError> {
        if request.pay_to == self.fee_payer() {
            return Err(RequirementsError::PayToIsFeePayer);
        }
        let amount = MoneyAmount::parse(&request.price)?.atomic(self.decimals)?;
        Ok(self.requirements_for(amount, request))
    }

    /// Requirements for the built-in demo resource. The demo pays into the
    /// facilitator's own token account so the round trip needs no external
    /// wallet; real resources route payment elsewhere via
    /// [`Self::payment_requirements`].
    pub fn demo_requirements(&self, request: RequirementsRequest) -> PaymentRequirements {
        let amount = MoneyAmount::parse(&request.price)
            .and_then(|price| price.atomic(self.decimals))
            .unwrap_or(1);
        self.requirements_for(amount, request)
    }

    fn requirements_for(
        &self,
        amount: u64,
        request: RequirementsRequest,
    ) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: self.network,
            max_amount_required: TokenAmount(amount),
            resource: request.resource,
            description: request.description.unwrap_or_default(),
            mime_type: "application/json".to_string(),
            output_schema: None,
            pay_to: request.pay_to,
            max_timeout_seconds: request
                .timeout_seconds
                .unwrap_or(self.default_timeout.as_secs()),
            asset: self.mint,
            extra: RequirementsExtra {
                fee_payer: self.fee_payer(),
            },
        }
    }

    /// Verify a payment header against requirements, without touching the
    /// chain. Every failure maps to an `isValid: false` response with the
    /// failing rule as the reason.
    pub fn verify(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> VerifyResponse {
        match self.check(payment_header, requirements) {
            Ok((_, transfer)) => {
                tracing::info!(
                    payer = %transfer.authority,
                    amount = transfer.amount,
                    "Payment verified"
                );
                VerifyResponse::valid()
            }
            Err(error) => {
                tracing::warn!(error = %error, "Payment verification failed");
                VerifyResponse::invalid(error.to_string())
            }
        }
    }

    fn check(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> Result<(Transaction, VerifiedTransfer), PaymentError> {
        let transaction = Transaction::from_base64(payment_header)?;
        let transfer = verify_transaction(&transaction, requirements, &self.policy())?;
        Ok((transaction, transfer))
    }

    /// Settle a payment: verify, co-sign as fee payer, submit.
    ///
    /// The embedded blockhash is never rewritten (that would invalidate the
    /// sender's signature), so an expired hash surfaces as an RPC rejection.
    /// The whole path runs under a deadline of
    /// `min(requirements.maxTimeoutSeconds, configured default)`; a timed-out
    /// submission may still land on-chain, and callers re-query by signature
    /// when they need the truth.
    pub async fn settle(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> Result<Settlement, SettleError> {
        let deadline = Duration::from_secs(
            requirements
                .max_timeout_seconds
                .min(self.default_timeout.as_secs()),
        );
        tokio::time::timeout(deadline, self.settle_inner(payment_header, requirements))
            .await
            .unwrap_or(Err(SettleError::Timeout))
    }

    async fn settle_inner(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> Result<Settlement, SettleError> {
        let (mut transaction, transfer) = self.check(payment_header, requirements)?;

        // Sign the canonical message bytes regardless of transaction
        // version; the signature lands in the fee payer's slot and every
        // other byte stays as the sender signed it.
        let message_bytes = transaction.message_bytes();
        let signature = self
            .keypair
            .try_sign_message(&message_bytes)
            .map_err(|e| SettleError::Signing(e.to_string()))?;
        transaction
            .place_signature(&self.keypair.pubkey(), signature)
            .map_err(|e| SettleError::Signing(e.to_string()))?;

        if !transaction.is_fully_signed() {
            return Err(SettleError::NotFullySigned);
        }

        let tx_hash = self.rpc.send_transaction(&transaction.serialize()).await?;
        tracing::info!(
            tx_hash = %tx_hash,
            payer = %transfer.authority,
            network = %self.network,
            "Payment settled"
        );
        Ok(Settlement {
            tx_hash,
            payer: Address::new(transfer.authority),
            network: self.network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use url::Url;

    fn test_config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    fn test_facilitator() -> SolanaFacilitator {
        let rpc = RpcClient::new(Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
        SolanaFacilitator::new(Keypair::new(), rpc, &test_config())
    }

    fn requirements_request(price: &str, pay_to: Address) -> RequirementsRequest {
        RequirementsRequest {
            price: price.to_string(),
            pay_to,
            resource: Url::parse("https://example.com/api").unwrap(),
            description: Some("Test payment".to_string()),
            timeout_seconds: None,
        }
    }

    #[test]
    fn test_requirements_convert_price_to_atomic_units() {
        let facilitator = test_facilitator();
        let pay_to = Address::new(Keypair::new().pubkey());
        let requirements = facilitator
            .payment_requirements(requirements_request("$0.01", pay_to))
            .unwrap();
        assert_eq!(requirements.max_amount_required, TokenAmount(10_000));
        assert_eq!(requirements.scheme, Scheme::Exact);
        assert_eq!(requirements.pay_to, pay_to);
        assert_eq!(requirements.asset, facilitator.mint());
        assert_eq!(requirements.extra.fee_payer, facilitator.fee_payer());
        assert_eq!(requirements.max_timeout_seconds, 60);

        let requirements = facilitator
            .payment_requirements(requirements_request("1", pay_to))
            .unwrap();
        assert_eq!(requirements.max_amount_required, TokenAmount(1_000_000));
    }

    #[test]
    fn test_requirements_reject_fee_payer_as_recipient() {
        let facilitator = test_facilitator();
        let result =
            facilitator.payment_requirements(requirements_request("$0.01", facilitator.fee_payer()));
        assert!(matches!(result, Err(RequirementsError::PayToIsFeePayer)));
    }

    #[test]
    fn test_requirements_reject_bad_price() {
        let facilitator = test_facilitator();
        let pay_to = Address::new(Keypair::new().pubkey());
        let result = facilitator.payment_requirements(requirements_request("free", pay_to));
        assert!(matches!(result, Err(RequirementsError::Price(_))));
    }

    #[test]
    fn test_verify_reports_malformed_header() {
        let facilitator = test_facilitator();
        let pay_to = Address::new(Keypair::new().pubkey());
        let requirements = facilitator
            .payment_requirements(requirements_request("$0.01", pay_to))
            .unwrap();
        let response = facilitator.verify("!!not base64!!", &requirements);
        assert!(!response.is_valid);
        assert!(
            response
                .invalid_reason
                .unwrap()
                .contains("Failed to parse transaction")
        );
    }

    #[test]
    fn test_mint_default_is_mainnet_usdc() {
        let facilitator = test_facilitator();
        assert_eq!(
            facilitator.mint(),
            Address::from_str("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap()
        );
    }
}
