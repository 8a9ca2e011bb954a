//! Reads contract addresses recorded by the external deployment step.
//!
//! The layout is the one hardhat-deploy writes:
//! `<dir>/<network>/<Contract>.json` with a top-level `address` field.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::network::LateBinding;

/// Mock coordinator deployed for the local network.
pub const VRF_COORDINATOR_MOCK: &str = "VRFCoordinatorMock";
/// Funding token deployed for the local network.
pub const LINK_TOKEN: &str = "LinkToken";
/// Consumer contract that mints the artifact.
pub const RANDOM_SVG: &str = "RandomSVG";

#[derive(Deserialize)]
struct DeploymentRecord {
    address: Address,
}

fn record_path(dir: &Path, network: &str, contract: &str) -> PathBuf {
    dir.join(network).join(format!("{contract}.json"))
}

/// Address of `contract` on `network`, or `None` when it was never deployed.
///
/// A record that exists but cannot be parsed is an error rather than `None`.
pub fn read_deployed_address(dir: &Path, network: &str, contract: &str) -> Result<Option<Address>> {
    let path = record_path(dir, network, contract);
    if !path.exists() {
        debug!(path = %path.display(), "No deployment record");
        return Ok(None);
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read deployment record {}", path.display()))?;
    let record: DeploymentRecord = serde_json::from_str(&raw)
        .with_context(|| format!("invalid deployment record {}", path.display()))?;

    debug!(contract, address = %record.address, "Loaded deployment record");
    Ok(Some(record.address))
}

/// Late-bound mock addresses for a simulated network.
///
/// Explicit overrides win; anything left unset is looked up in `dir`.
pub fn load_late_binding(
    dir: &Path,
    network: &str,
    overrides: &LateBinding,
) -> Result<LateBinding> {
    let oracle_address = match overrides.oracle_address {
        Some(address) => Some(address),
        None => read_deployed_address(dir, network, VRF_COORDINATOR_MOCK)?,
    };
    let funding_token_address = match overrides.funding_token_address {
        Some(address) => Some(address),
        None => read_deployed_address(dir, network, LINK_TOKEN)?,
    };
    Ok(LateBinding {
        oracle_address,
        funding_token_address,
    })
}
