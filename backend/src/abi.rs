//! Solidity interfaces of the contracts the workflow talks to.
//!
//! Calldata is built from the generated `*Call` types with
//! [`SolCall::abi_encode`](alloy_sol_types::SolCall::abi_encode); receipts and
//! logs are read back with [`decode_event`].

use alloy_sol_types::{sol, SolEvent};

use crate::ledger::LogEntry;

sol! {
    /// ERC-20 token the oracle fee is paid in.
    interface LinkToken {
        function transfer(address to, uint256 value) external returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    /// Consumer contract that requests randomness and mints the artifact.
    interface RandomSVG {
        function create() external returns (bytes32 requestId);
        function finishMint(uint256 tokenId) external;
        function tokenIdToRandomNumber(uint256 tokenId) external view returns (uint256);
        function tokenURI(uint256 tokenId) external view returns (string);

        event requestedRandomSVG(bytes32 indexed requestId, uint256 indexed tokenId);
    }

    /// Live VRF coordinator.
    interface VRFCoordinator {
        event RandomnessRequestFulfilled(bytes32 requestId, uint256 output);
    }

    /// Local mock coordinator, answered by hand.
    interface VRFCoordinatorMock {
        function callBackWithRandomness(
            bytes32 requestId,
            uint256 randomness,
            address consumerContract
        ) external;
    }
}

/// Decode `log` as `E`. `None` when the first topic is not `E`'s signature
/// or the payload does not match its layout.
pub fn decode_event<E: SolEvent>(log: &LogEntry) -> Option<E> {
    if log.topics.first() != Some(&E::SIGNATURE_HASH) {
        return None;
    }
    E::decode_raw_log(log.topics.iter().copied(), &log.data).ok()
}

/// Log entry `address` would emit for `event`.
#[cfg(test)]
pub fn log_entry<E: SolEvent>(address: alloy_primitives::Address, event: &E) -> LogEntry {
    let data = event.encode_log_data();
    LogEntry {
        address,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        block_number: None,
    }
}

/// ABI word for a `uint256` return value.
#[cfg(test)]
pub fn uint_return(value: u64) -> alloy_primitives::Bytes {
    let word = alloy_primitives::U256::from(value).to_be_bytes::<32>();
    alloy_primitives::Bytes::copy_from_slice(&word)
}
