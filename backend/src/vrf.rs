//! Deterministic random values for the local oracle simulator.
//!
//! Uses HMAC-SHA256 keyed by a simulator secret so that repeated local runs
//! against the same request id produce the same artifact, while different
//! secrets give unrelated values.

use alloy_primitives::U256;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::RequestId;

type HmacSha256 = Hmac<Sha256>;

/// Value the original local fixture answered every request with.
pub const DEFAULT_SIMULATED_VALUE: u64 = 77777;

/// Compute the simulated random value for a request.
///
/// ```text
/// value = uint256(HMAC-SHA256(secret, "vrf-mint" || request_id))
/// ```
pub fn derive_random_value(secret: &[u8], request_id: &RequestId) -> U256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any size");

    mac.update(b"vrf-mint");
    mac.update(request_id.as_slice());

    let bytes = mac.finalize().into_bytes();
    U256::from_be_slice(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn deterministic_for_same_inputs() {
        let id = B256::repeat_byte(7);
        assert_eq!(
            derive_random_value(b"test-secret", &id),
            derive_random_value(b"test-secret", &id)
        );
    }

    #[test]
    fn different_for_different_requests() {
        let a = derive_random_value(b"test-secret", &B256::repeat_byte(1));
        let b = derive_random_value(b"test-secret", &B256::repeat_byte(2));
        assert_ne!(a, b);
    }

    #[test]
    fn different_for_different_secrets() {
        let id = B256::repeat_byte(1);
        assert_ne!(derive_random_value(b"one", &id), derive_random_value(b"two", &id));
    }
}
