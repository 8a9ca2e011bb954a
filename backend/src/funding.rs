//! Pays the oracle fee into the consumer contract before a request.
//!
//! Funding is a precondition, never retried here: every attempt moves
//! tokens, so a failed or unconfirmed transfer ends the mint and the caller
//! decides whether to start a fresh one.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::abi::{self, LinkToken};
use crate::error::MintError;
use crate::ledger::{send_and_confirm, Confirmation, Ledger, TxReceipt, TxRequest};
use crate::network::NetworkProfile;

/// Outcome of a fee transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingRecord {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub tx_hash: Option<B256>,
    /// Set only once the transfer was seen in a committed receipt.
    pub confirmed: bool,
}

#[async_trait]
pub trait Funder: Send + Sync {
    /// Transfer `profile.fee` of the funding token from `payer` to
    /// `beneficiary` and wait for it to commit.
    async fn ensure_funded(
        &self,
        profile: &NetworkProfile,
        payer: Address,
        beneficiary: Address,
    ) -> Result<FundingRecord, MintError>;
}

/// [`Funder`] backed by an ERC-20 `transfer` on the profile's funding token.
pub struct FundingService {
    ledger: Arc<dyn Ledger>,
    confirmation: Confirmation,
}

impl FundingService {
    pub fn new(ledger: Arc<dyn Ledger>, confirmation: Confirmation) -> Self {
        Self { ledger, confirmation }
    }
}

/// Whether `receipt` carries `Transfer(from, to, amount)` from `token`.
fn transfer_observed(
    receipt: &TxReceipt,
    token: Address,
    from: Address,
    to: Address,
    amount: U256,
) -> bool {
    receipt
        .logs_matching(token, LinkToken::Transfer::SIGNATURE_HASH)
        .filter_map(abi::decode_event::<LinkToken::Transfer>)
        .any(|transfer| transfer.from == from && transfer.to == to && transfer.value == amount)
}

#[async_trait]
impl Funder for FundingService {
    #[instrument(skip_all, fields(network = %profile.name, beneficiary = %beneficiary))]
    async fn ensure_funded(
        &self,
        profile: &NetworkProfile,
        payer: Address,
        beneficiary: Address,
    ) -> Result<FundingRecord, MintError> {
        let token = profile.funding_token_address;
        let amount = profile.fee;

        let tx = TxRequest {
            from: payer,
            to: token,
            data: LinkToken::transferCall { to: beneficiary, value: amount }
                .abi_encode()
                .into(),
            gas: None,
        };

        let receipt = send_and_confirm(self.ledger.as_ref(), &tx, self.confirmation)
            .await
            .map_err(|e| MintError::Funding(format!("fee transfer to {beneficiary} failed: {e}")))?;

        if !transfer_observed(&receipt, token, payer, beneficiary, amount) {
            return Err(MintError::Funding(format!(
                "receipt {} has no Transfer of {amount} to {beneficiary}",
                receipt.tx_hash
            )));
        }

        info!(
            tx = %receipt.tx_hash,
            amount = %amount,
            block = receipt.block_number,
            "Fee transfer confirmed"
        );

        Ok(FundingRecord {
            from: payer,
            to: beneficiary,
            amount,
            tx_hash: Some(receipt.tx_hash),
            confirmed: true,
        })
    }
}
