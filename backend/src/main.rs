//! VRF Mint Driver
//!
//! Runs the randomness-backed mint workflow against one network:
//!
//! - **Funding**: pays the oracle fee into the consumer contract.
//! - **Request**: calls `create()` and reads the oracle request id back.
//! - **Fulfillment**: on live networks a log listener watches the oracle;
//!   on the local network the driver answers through the simulator.
//! - **Finalize**: calls `finishMint` with the fulfilled value.
//!
//! Exit codes: 0 when every mint finalized, 1 when any failed, 2 on a
//! startup configuration failure, 130 on Ctrl-C.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use futures_util::future::join_all;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod abi;
mod config;
mod coordinator;
mod deployments;
mod error;
mod finalizer;
mod funding;
mod ledger;
mod listener;
mod metrics;
mod network;
mod oracle;
mod rpc;
mod simulator;
mod vrf;
mod wallet;

use config::AppConfig;
use coordinator::{FinalizedMint, MintCoordinator};
use error::MintError;
use finalizer::{ArtifactLookup, ContractMinter};
use funding::FundingService;
use ledger::Ledger;
use metrics::Metrics;
use network::{NetworkProfile, ProfileKind};
use oracle::{ChainOracleClient, FulfillmentHub, FulfillmentWait};
use rpc::EvmRpcClient;
use simulator::{MockCoordinator, OracleSimulator};

/// Everything one run needs, wired for the resolved network.
struct Workflow {
    profile: Arc<NetworkProfile>,
    coordinator: Arc<MintCoordinator>,
    /// Present only on simulated networks.
    simulator: Option<OracleSimulator>,
    artifacts: Arc<ContractMinter>,
    sender: Address,
    wait: FulfillmentWait,
    mint_count: usize,
    metrics: Arc<Metrics>,
}

impl Workflow {
    async fn build(config: AppConfig) -> Result<Self> {
        let kind = network::kind_of(&config.network)?;
        let name = network::name_of(&config.network)?;

        let late = match kind {
            ProfileKind::Simulated => deployments::load_late_binding(
                &config.deployments_dir,
                name,
                &config.local_overrides,
            )?,
            // Rejected by `resolve` when non-empty.
            ProfileKind::Live => config.local_overrides.clone(),
        };
        let profile = Arc::new(network::resolve(&config.network, &late)?);
        let wait = config.fulfillment_wait(profile.kind)?;

        info!(
            network = %profile.name,
            chain_id = profile.id,
            kind = ?profile.kind,
            oracle = %profile.oracle_address,
            token = %profile.funding_token_address,
            fee = %profile.fee,
            "Network resolved"
        );

        let wallet = config.wallet(&profile)?;
        let mut rpc = EvmRpcClient::new(&config.rpc_url).context("failed to build RPC client")?;
        let sender = match (&wallet, config.sender) {
            (Some(wallet), _) => wallet.address(),
            (None, Some(sender)) => sender,
            (None, None) => rpc
                .accounts()
                .await
                .with_context(|| format!("failed to list accounts on {}", config.rpc_url))?
                .first()
                .copied()
                .context("node has no unlocked accounts; set PRIVATE_KEY or SENDER_ADDRESS")?,
        };
        if let Some(wallet) = wallet {
            rpc = rpc.with_wallet(wallet);
        }
        let ledger: Arc<dyn Ledger> = Arc::new(rpc);

        let consumer = match config.mint_contract {
            Some(address) => address,
            None => deployments::read_deployed_address(
                &config.deployments_dir,
                name,
                deployments::RANDOM_SVG,
            )?
            .with_context(|| {
                format!(
                    "no {} deployment for '{name}'; set MINT_CONTRACT_ADDRESS",
                    deployments::RANDOM_SVG
                )
            })?,
        };
        info!(
            rpc = %config.rpc_url,
            sender = %sender,
            consumer = %consumer,
            signing = if config.key.is_some() { "local" } else { "node" },
            "Endpoints configured"
        );

        let metrics = Arc::new(Metrics::new());
        let hub = Arc::new(FulfillmentHub::new(metrics.clone()));
        let confirmation = config.confirmation();

        let artifacts = Arc::new(ContractMinter::new(
            ledger.clone(),
            consumer,
            sender,
            config.finalize_gas_limit,
            confirmation,
        ));
        let coordinator = Arc::new(MintCoordinator::new(
            profile.clone(),
            Arc::new(FundingService::new(ledger.clone(), confirmation)),
            Arc::new(ChainOracleClient::new(
                ledger.clone(),
                hub.clone(),
                consumer,
                config.request_gas_limit,
                confirmation,
            )),
            artifacts.clone(),
            consumer,
            metrics.clone(),
        ));

        let simulator = match profile.kind {
            ProfileKind::Live => {
                let start_block = match config.scan_from_block {
                    Some(block) => block,
                    None => ledger.block_number().await.context("failed to fetch head block")?,
                };
                tokio::spawn(listener::watch_fulfillments(
                    ledger.clone(),
                    profile.oracle_address,
                    hub.clone(),
                    start_block,
                    config.poll_interval,
                ));
                None
            }
            ProfileKind::Simulated => {
                let mock = MockCoordinator {
                    ledger: ledger.clone(),
                    consumer,
                    sender,
                    confirmation,
                };
                Some(OracleSimulator::for_profile(
                    &profile,
                    hub.clone(),
                    Some(mock),
                    config.simulated_value.clone(),
                )?)
            }
        };

        Ok(Self {
            profile,
            coordinator,
            simulator,
            artifacts,
            sender,
            wait,
            mint_count: config.mint_count,
            metrics,
        })
    }

    async fn mint_one(&self) -> Result<FinalizedMint, MintError> {
        let request_id = self.coordinator.start(self.sender).await?;
        if let Some(simulator) = &self.simulator {
            if let Err(e) = simulator.fulfill_default(request_id).await {
                self.coordinator.abort(request_id, e).await?;
            }
        }
        self.coordinator.wait_and_finalize(request_id, self.wait).await
    }

    async fn run(&self) -> ExitCode {
        info!(count = self.mint_count, wait = ?self.wait, "Starting mints");
        let results = join_all((0..self.mint_count).map(|_| self.mint_one())).await;

        let mut failed = 0;
        for result in results {
            match result {
                Ok(minted) => {
                    let uri = self.artifacts.token_uri(minted.token_id).await;
                    info!(
                        request_id = %minted.request_id,
                        token_id = %minted.token_id,
                        random_value = %minted.random_value,
                        explorer = ?self.profile.explorer_url(&minted.receipt.tx_hash),
                        uri_len = uri.as_ref().map_or(0, String::len),
                        "Minted"
                    );
                    if let Err(e) = uri {
                        warn!(token_id = %minted.token_id, error = %e, "Failed to read tokenURI");
                    }
                }
                Err(e) => {
                    failed += 1;
                    error!(kind = %e.kind(), error = %e, "Mint did not finalize");
                }
            }
        }

        info!(metrics = %self.metrics.to_json(), "Run complete");
        if failed == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        }
    }

    /// Log every mint that had not reached a terminal state.
    async fn report_abandoned(&self) {
        for request in self.coordinator.requests().await {
            if !request.status.is_terminal() {
                warn!(
                    seq = request.seq,
                    request_id = ?request.request_id,
                    status = ?request.status,
                    "Mint abandoned"
                );
            }
        }
        info!(metrics = %self.metrics.to_json(), "Interrupted");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn")),
        )
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = match AppConfig::from_env(std::env::args().nth(1)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Invalid configuration");
            return ExitCode::from(2);
        }
    };

    info!(network = %config.network, "Starting VRF mint driver");

    let workflow = match Workflow::build(config).await {
        Ok(workflow) => workflow,
        Err(e) => {
            let kind = e
                .downcast_ref::<MintError>()
                .map_or_else(|| "ConfigurationError".to_string(), |e| e.kind().to_string());
            error!(kind = %kind, error = %format!("{e:#}"), "Startup failed");
            return ExitCode::from(2);
        }
    };

    tokio::select! {
        code = workflow.run() => code,
        _ = tokio::signal::ctrl_c() => {
            workflow.report_abandoned().await;
            ExitCode::from(130)
        }
    }
}
