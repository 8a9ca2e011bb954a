//! Network profiles: which oracle, funding token, key hash and fee a network
//! uses.
//!
//! Profiles are resolved once at startup into an immutable
//! [`NetworkProfile`] that every component receives explicitly. The local
//! development chain is [`ProfileKind::Simulated`]: its oracle and token are
//! mocks deployed per run, so their addresses arrive late through
//! [`LateBinding`] instead of the built-in table.

use alloy_primitives::{Address, B256, U256};
use std::str::FromStr;

use crate::error::MintError;

/// Chain id of the local development network.
pub const LOCAL_CHAIN_ID: u64 = 31337;

/// Whether a real oracle answers requests on this network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// A live oracle network fulfills requests asynchronously.
    Live,
    /// Requests are fulfilled explicitly by the local oracle simulator.
    Simulated,
}

/// Fully resolved per-network parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    pub id: u64,
    pub name: String,
    pub kind: ProfileKind,
    /// VRF coordinator the consumer contract requests randomness from.
    pub oracle_address: Address,
    /// Token the oracle fee is paid in (LINK).
    pub funding_token_address: Address,
    /// Identifies the oracle's proving key.
    pub key_hash: B256,
    /// Fee per request, in the funding token's smallest unit.
    pub fee: U256,
    /// Block explorer base URL, if the network has one.
    pub explorer: Option<String>,
}

impl NetworkProfile {
    /// Explorer link for a transaction, when the network has an explorer.
    pub fn explorer_url(&self, tx_hash: &B256) -> Option<String> {
        self.explorer
            .as_ref()
            .map(|base| format!("{base}/tx/{tx_hash}"))
    }
}

/// Built-in entry; `None` fields must be supplied late or resolution fails.
struct KnownNetwork {
    id: u64,
    name: &'static str,
    aliases: &'static [&'static str],
    kind: ProfileKind,
    oracle: Option<&'static str>,
    funding_token: Option<&'static str>,
    key_hash: Option<&'static str>,
    fee: Option<&'static str>,
    explorer: Option<&'static str>,
}

const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        id: LOCAL_CHAIN_ID,
        name: "localhost",
        aliases: &["hardhat"],
        kind: ProfileKind::Simulated,
        oracle: None,
        funding_token: None,
        key_hash: Some("0x6c3699283bda56ad74f6b855546325b68d482e983852a7a82979cc4807b641f4"),
        fee: Some("100000000000000000"),
        explorer: None,
    },
    KnownNetwork {
        id: 4,
        name: "rinkeby",
        aliases: &[],
        kind: ProfileKind::Live,
        oracle: Some("0xb3dCcb4Cf7a26f6cf6B120Cf5A73875B7BBc655B"),
        funding_token: Some("0x01BE23585060835E02B77ef475b0Cc51aA1e0709"),
        key_hash: Some("0x6c3699283bda56ad74f6b855546325b68d482e983852a7a82979cc4807b641f4"),
        fee: Some("100000000000000000"),
        explorer: Some("https://rinkeby.etherscan.io"),
    },
];

/// Addresses produced by a deployment step outside this process.
///
/// Accepted for [`ProfileKind::Simulated`] profiles only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LateBinding {
    pub oracle_address: Option<Address>,
    pub funding_token_address: Option<Address>,
}

impl LateBinding {
    pub fn is_empty(&self) -> bool {
        self.oracle_address.is_none() && self.funding_token_address.is_none()
    }
}

fn find(network: &str) -> Result<&'static KnownNetwork, MintError> {
    let network = network.trim();
    let by_id = network.parse::<u64>().ok();
    KNOWN_NETWORKS
        .iter()
        .find(|n| {
            Some(n.id) == by_id
                || n.name.eq_ignore_ascii_case(network)
                || n.aliases.iter().any(|a| a.eq_ignore_ascii_case(network))
        })
        .ok_or_else(|| MintError::Configuration(format!("unknown network '{network}'")))
}

/// Kind of a known network, without resolving the rest of its profile.
///
/// Lets the caller decide whether late-bound addresses need loading.
pub fn kind_of(network: &str) -> Result<ProfileKind, MintError> {
    find(network).map(|n| n.kind)
}

/// Canonical name of a known network (used for deployment directories).
pub fn name_of(network: &str) -> Result<&'static str, MintError> {
    find(network).map(|n| n.name)
}

fn required<T>(network: &str, field: &str, value: Option<T>) -> Result<T, MintError> {
    value.ok_or_else(|| {
        MintError::Configuration(format!("network '{network}' has no {field} configured"))
    })
}

fn parse_field<T: FromStr>(network: &str, field: &str, raw: &str) -> Result<T, MintError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| {
        MintError::Configuration(format!("network '{network}' has malformed {field} '{raw}': {e}"))
    })
}

fn non_zero(network: &str, field: &str, address: Address) -> Result<Address, MintError> {
    if address == Address::ZERO {
        return Err(MintError::Configuration(format!(
            "network '{network}' has a zero {field}"
        )));
    }
    Ok(address)
}

/// Resolve `network` (chain id or name) into a complete profile.
///
/// Fails with [`MintError::Configuration`] when the network is unknown, a
/// field is missing or malformed, or late-bound addresses are supplied for
/// a live network.
pub fn resolve(network: &str, late: &LateBinding) -> Result<NetworkProfile, MintError> {
    let known = find(network)?;
    let name = known.name;

    if known.kind == ProfileKind::Live && !late.is_empty() {
        return Err(MintError::Configuration(format!(
            "network '{name}' is live; late-bound oracle/token addresses \
             are only accepted for simulated networks"
        )));
    }

    let static_oracle = known
        .oracle
        .map(|raw| parse_field::<Address>(name, "oracle address", raw))
        .transpose()?;
    let static_token = known
        .funding_token
        .map(|raw| parse_field::<Address>(name, "funding token address", raw))
        .transpose()?;

    let oracle_address = required(name, "oracle address", static_oracle.or(late.oracle_address))?;
    let funding_token_address = required(
        name,
        "funding token address",
        static_token.or(late.funding_token_address),
    )?;
    let key_hash: B256 =
        parse_field(name, "key hash", required(name, "key hash", known.key_hash)?)?;
    let fee: U256 = parse_field(name, "fee", required(name, "fee", known.fee)?)?;

    if key_hash == B256::ZERO {
        return Err(MintError::Configuration(format!("network '{name}' has a zero key hash")));
    }
    if fee.is_zero() {
        return Err(MintError::Configuration(format!("network '{name}' has a zero fee")));
    }

    Ok(NetworkProfile {
        id: known.id,
        name: name.to_string(),
        kind: known.kind,
        oracle_address: non_zero(name, "oracle address", oracle_address)?,
        funding_token_address: non_zero(name, "funding token address", funding_token_address)?,
        key_hash,
        fee,
        explorer: known.explorer.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn local_binding() -> LateBinding {
        LateBinding {
            oracle_address: Some(Address::repeat_byte(0xc0)),
            funding_token_address: Some(Address::repeat_byte(0x11)),
        }
    }

    #[test]
    fn every_known_network_resolves_completely() {
        for known in KNOWN_NETWORKS {
            let late = match known.kind {
                ProfileKind::Simulated => local_binding(),
                ProfileKind::Live => LateBinding::default(),
            };
            let profile = resolve(&known.id.to_string(), &late).unwrap();

            assert_eq!(profile.id, known.id);
            assert_eq!(profile.name, known.name);
            assert_ne!(profile.oracle_address, Address::ZERO);
            assert_ne!(profile.funding_token_address, Address::ZERO);
            assert_ne!(profile.key_hash, B256::ZERO);
            assert!(!profile.fee.is_zero());
        }
    }

    #[test]
    fn rinkeby_matches_published_addresses() {
        let profile = resolve("rinkeby", &LateBinding::default()).unwrap();
        assert_eq!(profile.kind, ProfileKind::Live);
        assert_eq!(
            profile.funding_token_address,
            "0x01BE23585060835E02B77ef475b0Cc51aA1e0709".parse::<Address>().unwrap()
        );
        assert_eq!(profile.fee, U256::from(100_000_000_000_000_000u64));
        assert_eq!(
            profile.explorer_url(&B256::ZERO).unwrap(),
            format!("https://rinkeby.etherscan.io/tx/{}", B256::ZERO)
        );
    }

    #[test]
    fn names_ids_and_aliases_resolve_to_the_same_profile() {
        let by_id = resolve("31337", &local_binding()).unwrap();
        let by_name = resolve("localhost", &local_binding()).unwrap();
        let by_alias = resolve("Hardhat", &local_binding()).unwrap();
        assert_eq!(by_id, by_name);
        assert_eq!(by_name, by_alias);
        assert_eq!(by_id.kind, ProfileKind::Simulated);
    }

    #[test]
    fn unknown_network_is_a_configuration_error() {
        for id in ["1", "mainnet", "", "kovan"] {
            let err = resolve(id, &LateBinding::default()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "network {id:?}");
        }
    }

    #[test]
    fn simulated_profile_without_deployed_mocks_fails() {
        let err = resolve("localhost", &LateBinding::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let half = LateBinding {
            oracle_address: Some(Address::repeat_byte(0xc0)),
            funding_token_address: None,
        };
        assert!(resolve("localhost", &half).is_err());
    }

    #[test]
    fn zero_late_address_counts_as_missing() {
        let late = LateBinding {
            oracle_address: Some(Address::ZERO),
            funding_token_address: Some(Address::repeat_byte(0x11)),
        };
        assert!(resolve("localhost", &late).is_err());
    }

    #[test]
    fn live_profile_rejects_late_binding() {
        let err = resolve("rinkeby", &local_binding()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn kind_lookup_does_not_need_addresses() {
        assert_eq!(kind_of("localhost").unwrap(), ProfileKind::Simulated);
        assert_eq!(kind_of("4").unwrap(), ProfileKind::Live);
        assert_eq!(name_of("31337").unwrap(), "localhost");
    }
}
