//! Oracle client: randomness request submission and fulfillment waiting.
//!
//! Fulfillments arrive out of band, either from the live log listener or
//! from the local simulator. Both push into the same [`FulfillmentHub`], so
//! whoever awaits a request never needs to know which one is running.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use alloy_sol_types::{SolCall, SolEvent};

use crate::abi::{self, RandomSVG};
use crate::error::{MintError, RequestId};
use crate::ledger::{send_and_confirm, Confirmation, Ledger, TxReceipt, TxRequest};
use crate::metrics::Metrics;
use crate::network::NetworkProfile;

/// The oracle's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentEvent {
    pub request_id: RequestId,
    pub random_value: U256,
    /// Contract (or simulator) the answer came from.
    pub source_address: Address,
}

/// Identifiers extracted from a committed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedRequest {
    pub request_id: RequestId,
    /// Token reserved by the consumer for this request.
    pub token_id: U256,
    pub tx_hash: B256,
}

/// How long to wait for a fulfillment.
///
/// No `Default`: an unbounded wait has to be asked for by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentWait {
    Within(Duration),
    /// Only for manually driven runs against the simulator.
    Indefinitely,
}

/// Result of handing a fulfillment to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// The request already has an answer or is settled; the new one is dropped.
    DuplicateIgnored,
}

#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Request randomness on behalf of `requester` and wait for the request
    /// to commit.
    async fn submit_request(
        &self,
        profile: &NetworkProfile,
        requester: Address,
    ) -> Result<SubmittedRequest, MintError>;

    /// Wait for the fulfillment of `request_id`.
    async fn await_fulfillment(
        &self,
        request_id: RequestId,
        wait: FulfillmentWait,
    ) -> Result<FulfillmentEvent, MintError>;

    /// Stop tracking `request_id`; it reached a terminal state.
    async fn release(&self, request_id: RequestId);
}

/// Unclaimed slots (fulfillments nobody registered or waited for) are
/// dropped once they are this old.
const UNCLAIMED_TTL: Duration = Duration::from_secs(600);

struct Slot {
    tx: watch::Sender<Option<FulfillmentEvent>>,
    /// A waiter subscribed to this request.
    claimed: bool,
    /// Someone is submitting the answer on chain.
    reserved: bool,
    opened: tokio::time::Instant,
}

impl Slot {
    fn new() -> Self {
        Self {
            tx: watch::channel(None).0,
            claimed: false,
            reserved: false,
            opened: tokio::time::Instant::now(),
        }
    }

    fn is_filled(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

#[derive(Default)]
struct Slots {
    open: HashMap<RequestId, Slot>,
    /// Requests that reached a terminal state. Further answers are dropped.
    released: HashSet<RequestId>,
}

impl Slots {
    fn prune(&mut self) {
        self.open.retain(|request_id, slot| {
            let keep = slot.claimed || slot.reserved || slot.opened.elapsed() < UNCLAIMED_TTL;
            if !keep {
                debug!(request_id = %request_id, "Unclaimed fulfillment dropped");
            }
            keep
        });
    }
}

/// Per-request fulfillment channels.
///
/// A fulfillment can arrive before anyone waits for it; the slot keeps it
/// for a while even unclaimed. The first value for a request wins and later ones
/// are logged and dropped. Slots are removed by [`FulfillmentHub::release`].
pub struct FulfillmentHub {
    slots: Mutex<Slots>,
    metrics: Arc<Metrics>,
}

impl FulfillmentHub {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            metrics,
        }
    }

    /// Sender for `request_id`, or `None` once the request was released.
    async fn open(
        &self,
        request_id: RequestId,
        claim: bool,
    ) -> Option<watch::Sender<Option<FulfillmentEvent>>> {
        let mut slots = self.slots.lock().await;
        if slots.released.contains(&request_id) {
            return None;
        }
        slots.prune();
        let slot = slots.open.entry(request_id).or_insert_with(Slot::new);
        slot.claimed |= claim;
        Some(slot.tx.clone())
    }

    /// Whether `request_id` has an answer or is already settled.
    #[cfg(test)]
    pub async fn is_fulfilled(&self, request_id: &RequestId) -> bool {
        let slots = self.slots.lock().await;
        slots.released.contains(request_id)
            || slots.open.get(request_id).is_some_and(Slot::is_filled)
    }

    /// Claim the right to answer `request_id`. False unless the request is
    /// still open and unclaimed.
    pub async fn reserve(&self, request_id: RequestId) -> bool {
        let mut slots = self.slots.lock().await;
        if slots.released.contains(&request_id) {
            return false;
        }
        let slot = slots.open.entry(request_id).or_insert_with(Slot::new);
        if slot.reserved || slot.is_filled() {
            return false;
        }
        slot.reserved = true;
        true
    }

    /// Give up a claim taken with [`reserve`](Self::reserve).
    pub async fn cancel_reservation(&self, request_id: &RequestId) {
        if let Some(slot) = self.slots.lock().await.open.get_mut(request_id) {
            slot.reserved = false;
        }
    }

    /// Record a fulfillment. First writer wins.
    pub async fn deliver(&self, event: FulfillmentEvent) -> Delivery {
        let Some(slot) = self.open(event.request_id, false).await else {
            return self.reject(&event, None);
        };
        let mut previous = None;
        let accepted = slot.send_if_modified(|current| match current {
            Some(existing) => {
                previous = Some(existing.random_value);
                false
            }
            None => {
                *current = Some(event.clone());
                true
            }
        });

        if accepted {
            debug!(
                request_id = %event.request_id,
                source = %event.source_address,
                "Fulfillment recorded"
            );
            Delivery::Accepted
        } else {
            self.reject(&event, previous)
        }
    }

    /// Count and log an answer that will not be used.
    pub fn reject(&self, event: &FulfillmentEvent, kept: Option<U256>) -> Delivery {
        self.metrics.record_duplicate_fulfillment();
        warn!(
            request_id = %event.request_id,
            kept = ?kept,
            ignored = %event.random_value,
            source = %event.source_address,
            "Duplicate fulfillment ignored"
        );
        Delivery::DuplicateIgnored
    }

    /// Drop the slot of a settled request. Later answers are rejected.
    pub async fn release(&self, request_id: RequestId) {
        let mut slots = self.slots.lock().await;
        slots.open.remove(&request_id);
        slots.released.insert(request_id);
    }

    #[cfg(test)]
    pub async fn open_slots(&self) -> usize {
        self.slots.lock().await.open.len()
    }

    /// Wait until `request_id` has a fulfillment or `wait` runs out.
    pub async fn wait_for(
        &self,
        request_id: RequestId,
        wait: FulfillmentWait,
    ) -> Result<FulfillmentEvent, MintError> {
        let started = Instant::now();
        let Some(slot) = self.open(request_id, true).await else {
            return Err(MintError::Timeout {
                request_id,
                waited: started.elapsed(),
            });
        };
        let mut rx = slot.subscribe();
        drop(slot);

        let fulfilled = async move {
            // Closed only when the slot is released, which ends the wait.
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|event| event.clone())
        };

        let event = match wait {
            FulfillmentWait::Within(limit) => tokio::time::timeout(limit, fulfilled)
                .await
                .ok()
                .flatten(),
            FulfillmentWait::Indefinitely => fulfilled.await,
        };

        event.ok_or(MintError::Timeout {
            request_id,
            waited: started.elapsed(),
        })
    }
}

/// [`OracleClient`] that requests randomness through the consumer contract's
/// `create()` and waits on a shared [`FulfillmentHub`].
pub struct ChainOracleClient {
    ledger: Arc<dyn Ledger>,
    hub: Arc<FulfillmentHub>,
    consumer: Address,
    gas_limit: u64,
    confirmation: Confirmation,
}

impl ChainOracleClient {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        hub: Arc<FulfillmentHub>,
        consumer: Address,
        gas_limit: u64,
        confirmation: Confirmation,
    ) -> Self {
        Self {
            ledger,
            hub,
            consumer,
            gas_limit,
            confirmation,
        }
    }
}

/// Pull the request id and token id out of the consumer's
/// `requestedRandomSVG(bytes32 indexed, uint256 indexed)` log.
pub fn parse_request_receipt(
    receipt: &TxReceipt,
    consumer: Address,
) -> Result<SubmittedRequest, MintError> {
    let log = receipt
        .logs_matching(consumer, RandomSVG::requestedRandomSVG::SIGNATURE_HASH)
        .next()
        .ok_or_else(|| {
            MintError::Submission(format!(
                "receipt {} has no requestedRandomSVG event from {consumer}",
                receipt.tx_hash
            ))
        })?;

    let requested: RandomSVG::requestedRandomSVG = abi::decode_event(log).ok_or_else(|| {
        MintError::Submission(format!(
            "requestedRandomSVG event in {} does not decode ({} topics)",
            receipt.tx_hash,
            log.topics.len()
        ))
    })?;

    Ok(SubmittedRequest {
        request_id: requested.requestId,
        token_id: requested.tokenId,
        tx_hash: receipt.tx_hash,
    })
}

#[async_trait]
impl OracleClient for ChainOracleClient {
    #[instrument(skip_all, fields(network = %profile.name, requester = %requester))]
    async fn submit_request(
        &self,
        profile: &NetworkProfile,
        requester: Address,
    ) -> Result<SubmittedRequest, MintError> {
        let tx = TxRequest {
            from: requester,
            to: self.consumer,
            data: RandomSVG::createCall {}.abi_encode().into(),
            gas: Some(self.gas_limit),
        };

        let receipt = send_and_confirm(self.ledger.as_ref(), &tx, self.confirmation)
            .await
            .map_err(|e| MintError::Submission(format!("randomness request failed: {e}")))?;

        let submitted = parse_request_receipt(&receipt, self.consumer)?;
        info!(
            request_id = %submitted.request_id,
            token_id = %submitted.token_id,
            key_hash = %profile.key_hash,
            explorer = ?profile.explorer_url(&submitted.tx_hash),
            "Randomness requested"
        );
        Ok(submitted)
    }

    async fn await_fulfillment(
        &self,
        request_id: RequestId,
        wait: FulfillmentWait,
    ) -> Result<FulfillmentEvent, MintError> {
        self.hub.wait_for(request_id, wait).await
    }

    async fn release(&self, request_id: RequestId) {
        self.hub.release(request_id).await;
    }
}
