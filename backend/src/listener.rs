//! Live fulfillment listener.
//!
//! Watches the oracle coordinator for `RandomnessRequestFulfilled` logs and
//! hands every answer to the [`FulfillmentHub`]:
//!
//! 1. **Catch-up scan**: the first pass covers everything from the start
//!    block to the current head, so answers that landed before the listener
//!    came up are not missed.
//! 2. **Follow**: afterwards each pass covers only the new blocks. RPC
//!    failures are logged and the same range is retried after a delay.

use alloy_primitives::Address;
use alloy_sol_types::SolEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::abi::{self, VRFCoordinator};
use crate::error::LedgerError;
use crate::ledger::{Ledger, LogEntry, LogFilter};
use crate::oracle::{FulfillmentEvent, FulfillmentHub};

/// Delay before retrying after an RPC failure.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on blocks per `eth_getLogs` query.
const MAX_BLOCK_RANGE: u64 = 2_000;

/// Decode a `RandomnessRequestFulfilled(bytes32 requestId, uint256 output)`
/// log.
pub fn parse_fulfilled_log(log: &LogEntry) -> Option<FulfillmentEvent> {
    let fulfilled: VRFCoordinator::RandomnessRequestFulfilled = abi::decode_event(log)?;
    Some(FulfillmentEvent {
        request_id: fulfilled.requestId,
        random_value: fulfilled.output,
        source_address: log.address,
    })
}

/// Run one scan over `[from_block, to_block]` and deliver what it finds.
///
/// Returns the number of fulfillments seen.
pub async fn scan_range(
    ledger: &dyn Ledger,
    oracle: Address,
    hub: &FulfillmentHub,
    from_block: u64,
    to_block: u64,
) -> Result<usize, LedgerError> {
    let filter = LogFilter {
        address: oracle,
        topic0: VRFCoordinator::RandomnessRequestFulfilled::SIGNATURE_HASH,
        from_block,
        to_block,
    };

    let logs = ledger.logs(&filter).await?;
    let mut seen = 0;
    for log in &logs {
        let Some(event) = parse_fulfilled_log(log) else {
            warn!(
                block = ?log.block_number,
                "Failed to parse RandomnessRequestFulfilled payload"
            );
            continue;
        };
        debug!(request_id = %event.request_id, "Received RandomnessRequestFulfilled");
        hub.deliver(event).await;
        seen += 1;
    }
    Ok(seen)
}

/// Follow the oracle's fulfillment logs forever, starting at `start_block`.
pub async fn watch_fulfillments(
    ledger: Arc<dyn Ledger>,
    oracle: Address,
    hub: Arc<FulfillmentHub>,
    start_block: u64,
    poll_interval: Duration,
) {
    info!(oracle = %oracle, start_block, "Watching for fulfillments");
    let mut next_block = start_block;

    loop {
        let head = match ledger.block_number().await {
            Ok(head) => head,
            Err(e) => {
                error!(error = %e, "Failed to fetch head block");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        if head < next_block {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        let to_block = head.min(next_block.saturating_add(MAX_BLOCK_RANGE - 1));
        match scan_range(ledger.as_ref(), oracle, &hub, next_block, to_block).await {
            Ok(seen) => {
                if seen > 0 {
                    info!(from = next_block, to = to_block, seen, "Fulfillments received");
                }
                next_block = to_block + 1;
                if to_block == head {
                    tokio::time::sleep(poll_interval).await;
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    from = next_block,
                    to = to_block,
                    "Failed to fetch fulfillment logs"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::FakeLedger;
    use crate::metrics::Metrics;
    use crate::oracle::FulfillmentWait;
    use alloy_primitives::{Bytes, B256, U256};

    const ORACLE: Address = Address::new([0xc0; 20]);

    fn fulfilled_log(request_id: B256, output: u64, block: u64) -> LogEntry {
        let fulfilled = VRFCoordinator::RandomnessRequestFulfilled {
            requestId: request_id,
            output: U256::from(output),
        };
        LogEntry {
            block_number: Some(block),
            ..abi::log_entry(ORACLE, &fulfilled)
        }
    }

    #[test]
    fn parses_request_id_and_output() {
        let log = fulfilled_log(B256::repeat_byte(9), 77777, 1);
        let event = parse_fulfilled_log(&log).unwrap();
        assert_eq!(event.request_id, B256::repeat_byte(9));
        assert_eq!(event.random_value, U256::from(77777u64));
        assert_eq!(event.source_address, ORACLE);
    }

    #[test]
    fn short_payload_is_skipped() {
        let mut log = fulfilled_log(B256::repeat_byte(9), 1, 1);
        log.data = Bytes::from(vec![0u8; 40]);
        assert!(parse_fulfilled_log(&log).is_none());
    }

    #[tokio::test]
    async fn scan_delivers_only_logs_in_range() {
        let ledger = FakeLedger::succeeding(|_| vec![]);
        ledger.log_results.lock().unwrap().extend([
            fulfilled_log(B256::repeat_byte(1), 11, 5),
            fulfilled_log(B256::repeat_byte(2), 22, 50),
        ]);
        let hub = FulfillmentHub::new(Arc::new(Metrics::new()));

        let seen = scan_range(&ledger, ORACLE, &hub, 0, 10).await.unwrap();

        assert_eq!(seen, 1);
        let event = hub
            .wait_for(B256::repeat_byte(1), FulfillmentWait::Within(Duration::from_millis(5)))
            .await
            .unwrap();
        assert_eq!(event.random_value, U256::from(11u64));
        assert!(!hub.is_fulfilled(&B256::repeat_byte(2)).await);
    }

    #[tokio::test]
    async fn watcher_picks_up_fulfillments_from_start_block() {
        let ledger = Arc::new(FakeLedger::succeeding(|_| vec![]));
        ledger
            .log_results
            .lock()
            .unwrap()
            .push(fulfilled_log(B256::repeat_byte(3), 33, 100));
        let hub = Arc::new(FulfillmentHub::new(Arc::new(Metrics::new())));

        let task = tokio::spawn(watch_fulfillments(
            ledger,
            ORACLE,
            hub.clone(),
            90,
            Duration::from_millis(1),
        ));

        let event = hub
            .wait_for(B256::repeat_byte(3), FulfillmentWait::Within(Duration::from_secs(2)))
            .await
            .unwrap();
        task.abort();
        assert_eq!(event.random_value, U256::from(33u64));
    }
}
