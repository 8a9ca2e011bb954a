//! Per-request mint state machine.
//!
//! ```text
//! Created -> Funded -> Requested -> Fulfilled -> Finalized
//!    |          |          |            |
//!    +----------+----------+------------+------> Failed
//! ```
//!
//! The coordinator is the only writer of a request's status and random
//! value. Its table is locked only to read or record a transition, never
//! while a chain call is in flight.

use alloy_primitives::{Address, U256};
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::error::{MintError, RequestId};
use crate::finalizer::{CommitReceipt, Finalizer};
use crate::funding::Funder;
use crate::metrics::Metrics;
use crate::network::NetworkProfile;
use crate::oracle::{FulfillmentWait, OracleClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MintStatus {
    Created,
    Funded,
    Requested,
    Fulfilled,
    Finalized,
    Failed,
}

impl MintStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MintStatus::Finalized | MintStatus::Failed)
    }

    /// Whether `next` is a legal transition out of `self`.
    fn allows(self, next: MintStatus) -> bool {
        use MintStatus::*;
        match (self, next) {
            (Created, Funded)
            | (Funded, Requested)
            | (Requested, Fulfilled)
            | (Fulfilled, Finalized) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// Snapshot of one mint.
#[derive(Debug, Clone)]
pub struct MintRequest {
    /// Coordinator-local key, assigned before the oracle knows the request.
    pub seq: u64,
    pub request_id: Option<RequestId>,
    pub token_id: Option<U256>,
    pub owner: Address,
    pub status: MintStatus,
    pub random_value: Option<U256>,
    pub created_at: SystemTime,
    /// Every status entered, in order.
    pub history: Vec<MintStatus>,
    pub failure: Option<MintError>,
}

impl MintRequest {
    fn new(seq: u64, owner: Address) -> Self {
        Self {
            seq,
            request_id: None,
            token_id: None,
            owner,
            status: MintStatus::Created,
            random_value: None,
            created_at: SystemTime::now(),
            history: vec![MintStatus::Created],
            failure: None,
        }
    }

    /// Move to `next`. The request is left untouched when the move is not
    /// an edge of the state machine.
    fn enter(&mut self, next: MintStatus) -> Result<(), MintError> {
        if !self.status.allows(next) {
            return Err(MintError::IllegalTransition {
                seq: self.seq,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self, e: &MintError) -> Result<(), MintError> {
        self.enter(MintStatus::Failed)?;
        self.failure = Some(e.clone());
        Ok(())
    }
}

/// Successful outcome of [`MintCoordinator::wait_and_finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedMint {
    pub request_id: RequestId,
    pub token_id: U256,
    pub random_value: U256,
    pub receipt: CommitReceipt,
}

type Outcome = Result<FinalizedMint, MintError>;

/// Runs on its own task; callers only hold a handle to the result.
type Driver = Shared<BoxFuture<'static, Outcome>>;

struct Entry {
    request: MintRequest,
    started: Instant,
    /// Installed once, by the first `wait_and_finalize` or by `abort`.
    driver: Option<Driver>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<u64, Entry>,
    by_request: HashMap<RequestId, u64>,
}

impl Table {
    fn entry_mut(&mut self, request_id: RequestId) -> Result<(u64, &mut Entry), MintError> {
        let seq = *self
            .by_request
            .get(&request_id)
            .ok_or(MintError::UnknownRequest(request_id))?;
        let entry = self
            .entries
            .get_mut(&seq)
            .ok_or(MintError::UnknownRequest(request_id))?;
        Ok((seq, entry))
    }
}

pub struct MintCoordinator {
    profile: Arc<NetworkProfile>,
    funder: Arc<dyn Funder>,
    oracle: Arc<dyn OracleClient>,
    finalizer: Arc<dyn Finalizer>,
    /// Consumer contract that receives the fee and owns the request.
    beneficiary: Address,
    metrics: Arc<Metrics>,
    table: RwLock<Table>,
    next_seq: AtomicU64,
}

impl MintCoordinator {
    pub fn new(
        profile: Arc<NetworkProfile>,
        funder: Arc<dyn Funder>,
        oracle: Arc<dyn OracleClient>,
        finalizer: Arc<dyn Finalizer>,
        beneficiary: Address,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            profile,
            funder,
            oracle,
            finalizer,
            beneficiary,
            metrics,
            table: RwLock::new(Table::default()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Fund and submit a new mint for `owner`, returning the oracle's
    /// request id once the request has committed.
    #[instrument(skip_all, fields(network = %self.profile.name, owner = %owner))]
    pub async fn start(&self, owner: Address) -> Result<RequestId, MintError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut table = self.table.write().await;
            table.entries.insert(
                seq,
                Entry {
                    request: MintRequest::new(seq, owner),
                    started: Instant::now(),
                    driver: None,
                },
            );
        }
        self.metrics.record_start();
        info!(seq, "Mint created");

        let funded = match self.funder.ensure_funded(&self.profile, owner, self.beneficiary).await {
            Ok(_) => self.transition(seq, |request| request.enter(MintStatus::Funded)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = funded {
            self.fail(seq, &e).await;
            return Err(e);
        }
        info!(seq, "Mint funded");

        let submitted = match self.oracle.submit_request(&self.profile, owner).await {
            Ok(submitted) => submitted,
            Err(e) => {
                self.fail(seq, &e).await;
                return Err(e);
            }
        };

        let recorded = {
            let mut guard = self.table.write().await;
            let table = &mut *guard;
            if table.by_request.contains_key(&submitted.request_id) {
                Err(MintError::Submission(format!(
                    "oracle returned request id {} which is already in use",
                    submitted.request_id
                )))
            } else {
                match table.entries.get_mut(&seq) {
                    Some(entry) => entry.request.enter(MintStatus::Requested).map(|()| {
                        entry.request.request_id = Some(submitted.request_id);
                        entry.request.token_id = Some(submitted.token_id);
                        table.by_request.insert(submitted.request_id, seq);
                    }),
                    None => Err(MintError::UnknownRequest(submitted.request_id)),
                }
            }
        };
        if let Err(e) = recorded {
            self.fail(seq, &e).await;
            return Err(e);
        }
        info!(
            seq,
            request_id = %submitted.request_id,
            token_id = %submitted.token_id,
            "Mint requested"
        );
        Ok(submitted.request_id)
    }

    /// Wait for the fulfillment of `request_id`, then finalize with it.
    ///
    /// Finalize runs at most once per request. The work runs on its own
    /// task, so a caller that stops waiting does not cancel it; any later or
    /// concurrent call gets the same terminal result without touching the
    /// chain.
    pub async fn wait_and_finalize(
        self: &Arc<Self>,
        request_id: RequestId,
        wait: FulfillmentWait,
    ) -> Outcome {
        let driver = {
            let mut table = self.table.write().await;
            let (seq, entry) = table.entry_mut(request_id)?;
            entry
                .driver
                .get_or_insert_with(|| {
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.drive(seq, request_id, wait).await })
                        .map(move |joined| {
                            joined.unwrap_or_else(|e| {
                                Err(MintError::Finalize(format!(
                                    "driver for {request_id} stopped: {e}"
                                )))
                            })
                        })
                        .boxed()
                        .shared()
                })
                .clone()
        };
        driver.await
    }

    /// End `request_id` with `error` before anyone waits on it.
    ///
    /// A request that already has a driver is left to it. Later
    /// `wait_and_finalize` calls return `error`.
    pub async fn abort(&self, request_id: RequestId, error: MintError) -> Result<(), MintError> {
        let seq = {
            let mut table = self.table.write().await;
            let (seq, entry) = table.entry_mut(request_id)?;
            if entry.driver.is_some() {
                return Ok(());
            }
            entry.driver = Some(future::ready::<Outcome>(Err(error.clone())).boxed().shared());
            seq
        };
        self.fail(seq, &error).await;
        self.oracle.release(request_id).await;
        Ok(())
    }

    /// Snapshot of the request behind `request_id`.
    pub async fn request(&self, request_id: RequestId) -> Result<MintRequest, MintError> {
        let table = self.table.read().await;
        table
            .by_request
            .get(&request_id)
            .and_then(|seq| table.entries.get(seq))
            .map(|entry| entry.request.clone())
            .ok_or(MintError::UnknownRequest(request_id))
    }

    /// Snapshots of every request, including those that failed before the
    /// oracle assigned an id, ordered by creation.
    pub async fn requests(&self) -> Vec<MintRequest> {
        let table = self.table.read().await;
        let mut all: Vec<_> = table.entries.values().map(|entry| entry.request.clone()).collect();
        all.sort_by_key(|request| request.seq);
        all
    }

    #[instrument(skip_all, fields(seq = seq, request_id = %request_id))]
    async fn drive(&self, seq: u64, request_id: RequestId, wait: FulfillmentWait) -> Outcome {
        let result = self.fulfill_and_finalize(seq, request_id, wait).await;
        match &result {
            Ok(minted) => {
                let latency_ms = {
                    let table = self.table.read().await;
                    table
                        .entries
                        .get(&seq)
                        .map_or(0, |entry| entry.started.elapsed().as_millis() as u64)
                };
                self.metrics.record_finalized(latency_ms);
                info!(
                    token_id = %minted.token_id,
                    tx = %minted.receipt.tx_hash,
                    latency_ms,
                    "Mint finalized"
                );
            }
            Err(e) => self.fail(seq, e).await,
        }
        self.oracle.release(request_id).await;
        result
    }

    async fn fulfill_and_finalize(
        &self,
        seq: u64,
        request_id: RequestId,
        wait: FulfillmentWait,
    ) -> Outcome {
        let event = self.oracle.await_fulfillment(request_id, wait).await?;

        let token_id = {
            let mut table = self.table.write().await;
            let (_, entry) = table.entry_mut(request_id)?;
            entry.request.enter(MintStatus::Fulfilled)?;
            entry.request.random_value = Some(event.random_value);
            entry.request.token_id.unwrap_or_default()
        };
        info!(
            random_value = %event.random_value,
            source = %event.source_address,
            "Mint fulfilled"
        );

        let receipt = self
            .finalizer
            .finalize(request_id, token_id, event.random_value)
            .await
            .map_err(|e| match e {
                MintError::Finalize(_) => e,
                other => MintError::Finalize(other.to_string()),
            })?;

        self.transition(seq, |request| request.enter(MintStatus::Finalized)).await?;
        Ok(FinalizedMint {
            request_id,
            token_id,
            random_value: event.random_value,
            receipt,
        })
    }

    async fn transition(
        &self,
        seq: u64,
        apply: impl FnOnce(&mut MintRequest) -> Result<(), MintError>,
    ) -> Result<(), MintError> {
        let mut table = self.table.write().await;
        match table.entries.get_mut(&seq) {
            Some(entry) => apply(&mut entry.request),
            // Entries are inserted by `start` and never removed.
            None => Ok(()),
        }
    }

    async fn fail(&self, seq: u64, e: &MintError) {
        match self.transition(seq, |request| request.fail(e)).await {
            Ok(()) => {
                self.metrics.record_failure();
                error!(seq, kind = %e.kind(), error = %e, "Mint failed");
            }
            Err(rejected) => warn!(seq, error = %e, reason = %rejected, "Failure not recorded"),
        }
    }
}
