//! Finalize and artifact-lookup capabilities of the consumer contract.
//!
//! The coordinator calls [`Finalizer::finalize`] exactly once per request,
//! after the random value is recorded. [`ArtifactLookup::token_uri`] is only
//! used to show the result once a mint is finalized.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::abi::RandomSVG;
use crate::error::{MintError, RequestId};
use crate::ledger::{send_and_confirm, Confirmation, Ledger, TxRequest};

/// Proof that the finalize transaction committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
}

#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Turn the fulfilled token into its final artifact using `random_value`.
    async fn finalize(
        &self,
        request_id: RequestId,
        token_id: U256,
        random_value: U256,
    ) -> Result<CommitReceipt, MintError>;
}

#[async_trait]
pub trait ArtifactLookup: Send + Sync {
    async fn token_uri(&self, token_id: U256) -> Result<String, MintError>;
}

/// Both capabilities over the deployed consumer contract.
pub struct ContractMinter {
    ledger: Arc<dyn Ledger>,
    consumer: Address,
    sender: Address,
    gas_limit: u64,
    confirmation: Confirmation,
}

impl ContractMinter {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        consumer: Address,
        sender: Address,
        gas_limit: u64,
        confirmation: Confirmation,
    ) -> Self {
        Self {
            ledger,
            consumer,
            sender,
            gas_limit,
            confirmation,
        }
    }

    /// Random value the consumer stored for `token_id` at fulfillment.
    async fn stored_random_value(&self, token_id: U256) -> Result<U256, MintError> {
        let call = RandomSVG::tokenIdToRandomNumberCall { tokenId: token_id };
        let out = self
            .ledger
            .call(self.consumer, call.abi_encode().into())
            .await
            .map_err(|e| {
                MintError::Finalize(format!("tokenIdToRandomNumber({token_id}) failed: {e}"))
            })?;
        RandomSVG::tokenIdToRandomNumberCall::abi_decode_returns(&out).map_err(|e| {
            MintError::Finalize(format!("tokenIdToRandomNumber({token_id}) returned {e}"))
        })
    }
}

#[async_trait]
impl Finalizer for ContractMinter {
    #[instrument(skip_all, fields(request_id = %request_id, token_id = %token_id))]
    async fn finalize(
        &self,
        request_id: RequestId,
        token_id: U256,
        random_value: U256,
    ) -> Result<CommitReceipt, MintError> {
        // The consumer must have stored the same value the oracle delivered,
        // otherwise the artifact would be built from something else.
        let stored = self.stored_random_value(token_id).await?;
        if stored != random_value {
            return Err(MintError::Finalize(format!(
                "consumer holds random value {stored} for token {token_id}, \
                 fulfillment carried {random_value}"
            )));
        }

        let tx = TxRequest {
            from: self.sender,
            to: self.consumer,
            data: RandomSVG::finishMintCall { tokenId: token_id }.abi_encode().into(),
            gas: Some(self.gas_limit),
        };
        let receipt = send_and_confirm(self.ledger.as_ref(), &tx, self.confirmation)
            .await
            .map_err(|e| MintError::Finalize(format!("finishMint({token_id}) failed: {e}")))?;

        info!(tx = %receipt.tx_hash, block = receipt.block_number, "Mint finished");
        Ok(CommitReceipt {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        })
    }
}

#[async_trait]
impl ArtifactLookup for ContractMinter {
    async fn token_uri(&self, token_id: U256) -> Result<String, MintError> {
        let call = RandomSVG::tokenURICall { tokenId: token_id };
        let out = self
            .ledger
            .call(self.consumer, call.abi_encode().into())
            .await
            .map_err(|e| MintError::Finalize(format!("tokenURI({token_id}) failed: {e}")))?;
        RandomSVG::tokenURICall::abi_decode_returns(&out)
            .map_err(|e| MintError::Finalize(format!("tokenURI({token_id}) returned {e}")))
    }
}
