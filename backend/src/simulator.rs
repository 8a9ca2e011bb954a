//! Local stand-in for the oracle network.
//!
//! Nothing answers randomness requests on the local chain, so the driver
//! answers them itself: [`OracleSimulator::fulfill`] pushes the value into
//! the mock coordinator on chain (when one is attached) and then into the
//! same [`FulfillmentHub`] the coordinator is waiting on.

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::abi::VRFCoordinatorMock;
use crate::error::{MintError, RequestId};
use crate::ledger::{send_and_confirm, Confirmation, Ledger, TxRequest};
use crate::network::{NetworkProfile, ProfileKind};
use crate::oracle::{Delivery, FulfillmentEvent, FulfillmentHub};
use crate::vrf;

/// On-chain half of the simulator: the deployed mock coordinator.
pub struct MockCoordinator {
    pub ledger: Arc<dyn Ledger>,
    /// Consumer contract the mock calls back into.
    pub consumer: Address,
    /// Account that pays for the callback transaction.
    pub sender: Address,
    pub confirmation: Confirmation,
}

/// Where simulated random values come from when the driver does not pass one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedValue {
    /// Same value for every request.
    Fixed(U256),
    /// HMAC-derived per request from a secret.
    Derived(Vec<u8>),
}

impl Default for SimulatedValue {
    fn default() -> Self {
        SimulatedValue::Fixed(U256::from(vrf::DEFAULT_SIMULATED_VALUE))
    }
}

pub struct OracleSimulator {
    hub: Arc<FulfillmentHub>,
    /// Reported as the source of every simulated fulfillment.
    address: Address,
    mock: Option<MockCoordinator>,
    values: SimulatedValue,
}

impl OracleSimulator {
    /// Build a simulator for `profile`. Live profiles are refused.
    pub fn for_profile(
        profile: &NetworkProfile,
        hub: Arc<FulfillmentHub>,
        mock: Option<MockCoordinator>,
        values: SimulatedValue,
    ) -> Result<Self, MintError> {
        if profile.kind != ProfileKind::Simulated {
            return Err(MintError::Configuration(format!(
                "network '{}' has a live oracle; the simulator only runs on simulated networks",
                profile.name
            )));
        }
        Ok(Self {
            hub,
            address: profile.oracle_address,
            mock,
            values,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The value [`fulfill_default`](Self::fulfill_default) would use.
    pub fn value_for(&self, request_id: &RequestId) -> U256 {
        match &self.values {
            SimulatedValue::Fixed(value) => *value,
            SimulatedValue::Derived(secret) => vrf::derive_random_value(secret, request_id),
        }
    }

    /// Answer `request_id` with the configured value source.
    pub async fn fulfill_default(&self, request_id: RequestId) -> Result<Delivery, MintError> {
        self.fulfill(request_id, self.value_for(&request_id)).await
    }

    /// Answer `request_id` with `random_value`.
    ///
    /// The request is reserved in the hub before the on-chain callback, so
    /// concurrent calls send at most one. A request that already has a value
    /// or a pending callback reports [`Delivery::DuplicateIgnored`].
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn fulfill(
        &self,
        request_id: RequestId,
        random_value: U256,
    ) -> Result<Delivery, MintError> {
        let event = FulfillmentEvent {
            request_id,
            random_value,
            source_address: self.address,
        };
        if !self.hub.reserve(request_id).await {
            warn!(ignored = %random_value, "Request already answered, not calling back again");
            return Ok(self.hub.reject(&event, None));
        }

        if let Some(mock) = &self.mock {
            if let Err(e) = self.call_back(mock, request_id, random_value).await {
                self.hub.cancel_reservation(&request_id).await;
                return Err(e);
            }
        }

        let delivery = self.hub.deliver(event).await;
        info!(random_value = %random_value, ?delivery, "Simulated fulfillment delivered");
        Ok(delivery)
    }

    async fn call_back(
        &self,
        mock: &MockCoordinator,
        request_id: RequestId,
        random_value: U256,
    ) -> Result<(), MintError> {
        let call = VRFCoordinatorMock::callBackWithRandomnessCall {
            requestId: request_id,
            randomness: random_value,
            consumerContract: mock.consumer,
        };
        let tx = TxRequest {
            from: mock.sender,
            to: self.address,
            data: call.abi_encode().into(),
            gas: None,
        };
        let receipt = send_and_confirm(mock.ledger.as_ref(), &tx, mock.confirmation)
            .await
            .map_err(|e| MintError::Submission(format!("simulated callback failed: {e}")))?;
        info!(tx = %receipt.tx_hash, "Mock coordinator called back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ledger::testing::{fast_confirmation, FakeLedger};
    use crate::metrics::Metrics;
    use crate::oracle::FulfillmentWait;
    use alloy_primitives::B256;
    use std::time::Duration;

    fn profile(kind: ProfileKind) -> NetworkProfile {
        NetworkProfile {
            id: 31337,
            name: "localhost".into(),
            kind,
            oracle_address: Address::repeat_byte(0xc0),
            funding_token_address: Address::repeat_byte(0x11),
            key_hash: B256::repeat_byte(0x6c),
            fee: U256::from(100u64),
            explorer: None,
        }
    }

    fn hub() -> Arc<FulfillmentHub> {
        Arc::new(FulfillmentHub::new(Arc::new(Metrics::new())))
    }

    fn simulator(hub: Arc<FulfillmentHub>, mock: Option<MockCoordinator>) -> OracleSimulator {
        let profile = profile(ProfileKind::Simulated);
        OracleSimulator::for_profile(&profile, hub, mock, SimulatedValue::default()).unwrap()
    }

    fn mock(ledger: Arc<FakeLedger>) -> MockCoordinator {
        MockCoordinator {
            ledger,
            consumer: Address::repeat_byte(0xbb),
            sender: Address::repeat_byte(0xaa),
            confirmation: fast_confirmation(),
        }
    }

    #[test]
    fn live_profiles_have_no_simulator() {
        let live = profile(ProfileKind::Live);
        let err = OracleSimulator::for_profile(&live, hub(), None, SimulatedValue::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn delivers_through_the_hub_with_its_own_address() {
        let hub = hub();
        let sim = simulator(hub.clone(), None);
        let id = B256::repeat_byte(1);

        assert_eq!(sim.fulfill_default(id).await.unwrap(), Delivery::Accepted);

        let event = hub
            .wait_for(id, FulfillmentWait::Within(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(event.random_value, U256::from(77777u64));
        assert_eq!(event.source_address, sim.address());
    }

    #[tokio::test]
    async fn calls_mock_coordinator_once_per_request() {
        let ledger = Arc::new(FakeLedger::succeeding(|_| vec![]));
        let sim = simulator(hub(), Some(mock(ledger.clone())));
        let id = B256::repeat_byte(2);

        assert_eq!(sim.fulfill(id, U256::from(5u64)).await.unwrap(), Delivery::Accepted);
        assert_eq!(sim.fulfill(id, U256::from(6u64)).await.unwrap(), Delivery::DuplicateIgnored);

        let sent = ledger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, Address::repeat_byte(0xc0));
        assert_eq!(&sent[0].data[..4], &VRFCoordinatorMock::callBackWithRandomnessCall::SELECTOR);
        assert_eq!(&sent[0].data[4..36], id.as_slice());
    }

    #[tokio::test]
    async fn concurrent_answers_send_one_callback() {
        let ledger = Arc::new(FakeLedger::succeeding(|_| vec![]));
        let hub = hub();
        let sim = simulator(hub.clone(), Some(mock(ledger.clone())));
        let id = B256::repeat_byte(4);

        let (first, second) =
            tokio::join!(sim.fulfill(id, U256::from(1u64)), sim.fulfill(id, U256::from(2u64)));

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_ne!(first, second);
        assert_eq!(ledger.sent_count(), 1);

        let kept = if first == Delivery::Accepted { 1u64 } else { 2 };
        let event = hub
            .wait_for(id, FulfillmentWait::Within(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(event.random_value, U256::from(kept));
    }

    #[tokio::test]
    async fn failed_callback_can_be_retried() {
        let ledger = Arc::new(FakeLedger::new(|_, _, _| None));
        let hub = hub();
        let sim = simulator(hub.clone(), Some(mock(ledger.clone())));
        let id = B256::repeat_byte(5);

        let err = sim.fulfill(id, U256::from(1u64)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Submission);
        assert!(!hub.is_fulfilled(&id).await);

        assert!(sim.fulfill(id, U256::from(1u64)).await.is_err());
        assert_eq!(ledger.sent_count(), 2);
    }

    #[test]
    fn derived_values_follow_the_secret() {
        let sim = OracleSimulator::for_profile(
            &profile(ProfileKind::Simulated),
            hub(),
            None,
            SimulatedValue::Derived(b"local".to_vec()),
        )
        .unwrap();
        let id = B256::repeat_byte(3);
        assert_eq!(sim.value_for(&id), vrf::derive_random_value(b"local", &id));
    }
}
