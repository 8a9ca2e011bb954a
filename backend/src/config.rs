//! Application configuration loaded from environment variables.
//!
//! Optional: `NETWORK`, `RPC_URL`, `SENDER_ADDRESS`, `MINT_CONTRACT_ADDRESS`,
//!           `PRIVATE_KEY` or `MNEMONIC` (with `MNEMONIC_INDEX`),
//!           `DEPLOYMENTS_DIR`, `LOCAL_VRF_COORDINATOR`, `LOCAL_LINK_TOKEN`,
//!           `CONFIRMATIONS`, `CONFIRMATION_TIMEOUT_SECS`, `POLL_INTERVAL_MS`,
//!           `FULFILLMENT_TIMEOUT_SECS`, `REQUEST_GAS_LIMIT`,
//!           `FINALIZE_GAS_LIMIT`, `SIMULATOR_RANDOM_VALUE`,
//!           `SIMULATOR_SECRET`, `MINT_COUNT`, `SCAN_FROM_BLOCK`

use alloy_primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::MintError;
use crate::ledger::Confirmation;
use crate::network::{LateBinding, NetworkProfile, ProfileKind};
use crate::oracle::FulfillmentWait;
use crate::simulator::SimulatedValue;
use crate::vrf;
use crate::wallet::{KeySource, Wallet};

/// Configuration for one run of the mint workflow.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Chain id or name of the target network.
    pub network: String,
    /// Ethereum JSON-RPC endpoint (HTTP).
    pub rpc_url: String,
    /// Account that pays the fee and sends every transaction. Falls back to
    /// the signing key's address, then to the node's first unlocked account.
    pub sender: Option<Address>,
    /// Local signing key. Required on live networks.
    pub key: Option<KeySource>,
    /// Consumer contract. Falls back to the deployments directory.
    pub mint_contract: Option<Address>,
    /// Where the deployment step records contract addresses.
    pub deployments_dir: PathBuf,
    /// Explicit mock coordinator / token addresses for the local network.
    pub local_overrides: LateBinding,
    pub confirmations: u64,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// `None` waits for fulfillment indefinitely.
    pub fulfillment_timeout: Option<Duration>,
    pub request_gas_limit: u64,
    pub finalize_gas_limit: u64,
    pub simulated_value: SimulatedValue,
    /// Number of mints to run concurrently.
    pub mint_count: usize,
    /// First block the live listener scans. Defaults to the head at startup.
    pub scan_from_block: Option<u64>,
}

impl AppConfig {
    /// Load configuration from environment variables. `network` (the first
    /// CLI argument) takes precedence over `NETWORK`.
    pub fn from_env(network: Option<String>) -> Result<Self> {
        Self::from_lookup(network, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        network: Option<String>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let network = network
            .or_else(|| var("NETWORK"))
            .unwrap_or_else(|| "localhost".into());
        let rpc_url = var("RPC_URL").unwrap_or_else(|| "http://127.0.0.1:8545".into());

        let sender = parse_opt::<Address>(&var, "SENDER_ADDRESS")?;
        let mint_contract = parse_opt::<Address>(&var, "MINT_CONTRACT_ADDRESS")?;

        let key = match (var("PRIVATE_KEY"), var("MNEMONIC")) {
            (Some(_), Some(_)) => bail!("set either PRIVATE_KEY or MNEMONIC, not both"),
            (Some(key), None) => Some(KeySource::PrivateKey(key)),
            (None, Some(phrase)) => Some(KeySource::Mnemonic {
                phrase,
                index: parse_opt(&var, "MNEMONIC_INDEX")?.unwrap_or(0),
            }),
            (None, None) => None,
        };

        let deployments_dir = var("DEPLOYMENTS_DIR").unwrap_or_else(|| "./deployments".into());
        let deployments_dir = PathBuf::from(shellexpand::tilde(&deployments_dir).to_string());

        let local_overrides = LateBinding {
            oracle_address: parse_opt(&var, "LOCAL_VRF_COORDINATOR")?,
            funding_token_address: parse_opt(&var, "LOCAL_LINK_TOKEN")?,
        };

        let confirmations = parse_opt(&var, "CONFIRMATIONS")?.unwrap_or(1u64).max(1);
        let confirmation_timeout =
            Duration::from_secs(parse_opt(&var, "CONFIRMATION_TIMEOUT_SECS")?.unwrap_or(120));
        let poll_interval =
            Duration::from_millis(parse_opt(&var, "POLL_INTERVAL_MS")?.unwrap_or(1_000));

        let fulfillment_timeout = match var("FULFILLMENT_TIMEOUT_SECS") {
            Some(raw) => parse_fulfillment_timeout(&raw)?,
            None => Some(Duration::from_secs(300)),
        };

        let request_gas_limit = parse_opt(&var, "REQUEST_GAS_LIMIT")?.unwrap_or(300_000);
        let finalize_gas_limit = parse_opt(&var, "FINALIZE_GAS_LIMIT")?.unwrap_or(20_000_000);

        let fixed_value = parse_opt::<U256>(&var, "SIMULATOR_RANDOM_VALUE")?;
        let simulated_value = match (var("SIMULATOR_SECRET"), fixed_value) {
            (Some(_), Some(_)) => {
                bail!("set either SIMULATOR_SECRET or SIMULATOR_RANDOM_VALUE, not both")
            }
            (Some(secret), None) => SimulatedValue::Derived(secret.into_bytes()),
            (None, Some(value)) => SimulatedValue::Fixed(value),
            (None, None) => SimulatedValue::Fixed(U256::from(vrf::DEFAULT_SIMULATED_VALUE)),
        };

        let mint_count: usize = parse_opt(&var, "MINT_COUNT")?.unwrap_or(1);
        if mint_count == 0 {
            bail!("MINT_COUNT must be at least 1");
        }

        let scan_from_block = parse_opt(&var, "SCAN_FROM_BLOCK")?;

        Ok(Self {
            network,
            rpc_url,
            sender,
            key,
            mint_contract,
            deployments_dir,
            local_overrides,
            confirmations,
            confirmation_timeout,
            poll_interval,
            fulfillment_timeout,
            request_gas_limit,
            finalize_gas_limit,
            simulated_value,
            mint_count,
            scan_from_block,
        })
    }

    pub fn confirmation(&self) -> Confirmation {
        Confirmation::new(self.confirmations, self.confirmation_timeout, self.poll_interval)
    }

    /// Signing wallet for `profile`.
    ///
    /// Live networks need a key. A configured `SENDER_ADDRESS` must be the
    /// key's address.
    pub fn wallet(&self, profile: &NetworkProfile) -> Result<Option<Wallet>, MintError> {
        let Some(source) = &self.key else {
            return match profile.kind {
                ProfileKind::Simulated => Ok(None),
                ProfileKind::Live => Err(MintError::Configuration(format!(
                    "network '{}' is live; set PRIVATE_KEY or MNEMONIC",
                    profile.name
                ))),
            };
        };
        let wallet = Wallet::from_source(source, profile.id)
            .map_err(|e| MintError::Configuration(e.to_string()))?;
        if let Some(sender) = self.sender {
            if sender != wallet.address() {
                return Err(MintError::Configuration(format!(
                    "SENDER_ADDRESS {sender} does not match the signing key's address {}",
                    wallet.address()
                )));
            }
        }
        Ok(Some(wallet))
    }

    /// Fulfillment bound for a network of `kind`.
    ///
    /// Live oracles always get a finite bound.
    pub fn fulfillment_wait(&self, kind: ProfileKind) -> Result<FulfillmentWait, MintError> {
        match (self.fulfillment_timeout, kind) {
            (Some(limit), _) => Ok(FulfillmentWait::Within(limit)),
            (None, ProfileKind::Simulated) => Ok(FulfillmentWait::Indefinitely),
            (None, ProfileKind::Live) => Err(MintError::Configuration(format!(
                "FULFILLMENT_TIMEOUT_SECS=none is only allowed on simulated networks, '{}' is live",
                self.network
            ))),
        }
    }
}

fn parse_opt<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("invalid {key}: {raw}")))
        .transpose()
}

/// `none` disables the bound; anything else is a whole number of seconds.
fn parse_fulfillment_timeout(raw: &str) -> Result<Option<Duration>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("invalid FULFILLMENT_TIMEOUT_SECS: {raw}"))?;
    if secs == 0 {
        bail!("FULFILLMENT_TIMEOUT_SECS must be positive or 'none'");
    }
    Ok(Some(Duration::from_secs(secs)))
}
