//! Chain boundary used by funding, submission, simulation and finalization.
//!
//! [`Ledger`] is the raw transaction/log surface; [`send_and_confirm`] adds
//! the commit wait every state-changing step needs before it can report
//! success.

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::LedgerError;

/// A state-changing call sent from an account the node can sign for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    /// Explicit gas budget; `None` lets the node estimate.
    pub gas: Option<u64>,
}

/// An emitted log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
}

/// A mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// `false` when execution reverted.
    pub success: bool,
    pub logs: Vec<LogEntry>,
}

impl TxReceipt {
    /// Logs from `address` whose first topic is `topic0`.
    pub fn logs_matching(&self, address: Address, topic0: B256) -> impl Iterator<Item = &LogEntry> {
        self.logs
            .iter()
            .filter(move |log| log.address == address && log.topics.first() == Some(&topic0))
    }
}

/// Inclusive block range query for one event at one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

/// How long and how deep to wait for a transaction to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Blocks including the one the transaction landed in. Never below 1.
    pub confirmations: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Confirmation {
    pub fn new(confirmations: u64, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            confirmations: confirmations.max(1),
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submit a transaction and return its hash without waiting for it.
    async fn send_transaction(&self, tx: &TxRequest) -> Result<B256, LedgerError>;

    /// Receipt of a mined transaction, `None` while pending.
    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, LedgerError>;

    /// Current head block number.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Read-only call against the latest state.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError>;

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, LedgerError>;
}

/// Send `tx` and wait until it is buried under `confirmation.confirmations`
/// blocks (the inclusion block counts as the first).
///
/// A reverted receipt fails immediately with [`LedgerError::Reverted`].
pub async fn send_and_confirm(
    ledger: &dyn Ledger,
    tx: &TxRequest,
    confirmation: Confirmation,
) -> Result<TxReceipt, LedgerError> {
    let tx_hash = ledger.send_transaction(tx).await?;
    debug!(tx = %tx_hash, to = %tx.to, "Transaction sent");
    wait_for_confirmations(ledger, tx_hash, confirmation).await
}

/// Poll for the receipt of `tx_hash` and enough blocks on top of it.
pub async fn wait_for_confirmations(
    ledger: &dyn Ledger,
    tx_hash: B256,
    confirmation: Confirmation,
) -> Result<TxReceipt, LedgerError> {
    let started = Instant::now();
    let needed = confirmation.confirmations.max(1);

    loop {
        if let Some(receipt) = ledger.receipt(tx_hash).await? {
            if !receipt.success {
                return Err(LedgerError::Reverted(tx_hash));
            }
            let head = ledger.block_number().await?;
            if head + 1 >= receipt.block_number + needed {
                debug!(
                    tx = %tx_hash,
                    block = receipt.block_number,
                    head,
                    "Transaction confirmed"
                );
                return Ok(receipt);
            }
        }

        if started.elapsed() >= confirmation.timeout {
            return Err(LedgerError::ConfirmationTimeout {
                hash: tx_hash,
                waited: started.elapsed(),
            });
        }
        tokio::time::sleep(confirmation.poll_interval).await;
    }
}
