//! Supervisor (C9): builds every actor in dependency order and keeps the
//! process alive until asked to shut down.
//!
//! Ordering follows §4.9: the BlockMetadataCache and
//! NotificationSink have no dependencies and start first; the ledgers need
//! the NotificationSink to publish topic updates; the Prover needs both
//! ledgers and the EthProofs client; the InputGenerator needs the RPC
//! client, the cache, the input builder, and the Prover; the StatusSurface
//! comes up last since it reports on everything else.

use std::{path::PathBuf, sync::Arc};

use ethp_ethproofs::EthProofsApiClient;
use ethp_ledger::{open_pool, MissedLedger, ProvedLedger};
use ethp_notify::{NotificationEvent, NotificationSink};
use ethp_rpc::{EthRpcClient, HealthEvent, RpcHealthHandle};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    input_builder::CliInputBuilder,
    input_generator::InputGenerator,
    meta_cache::BlockMetadataCache,
    prover::{Prover, ProverConfig},
    status::{self, RpcHealthSnapshot},
};

/// Every `§6` configuration key the Supervisor needs to wire the pipeline
/// together. Parsing and validating these from the environment is
/// `bin/pipeline`'s job; by the time a `SupervisorConfig` exists every field
/// is already known-good.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub eth_rpc_url: url::Url,
    pub database_url: String,

    pub elf_path: PathBuf,
    pub cargo_zisk_path: PathBuf,
    pub output_dir: PathBuf,
    pub dev: bool,

    pub input_builder_executable: PathBuf,
    pub input_cache_dir: PathBuf,

    pub ethproofs_rpc_url: String,
    pub ethproofs_api_key: String,
    pub ethproofs_cluster_id: u64,

    pub slack_webhook: Option<String>,

    pub health_port: u16,
    pub prover_stuck_threshold_seconds: u64,
}

/// Everything needed to (re)build the rest-for-one trio (Prover →
/// InputGenerator → StatusSurface). Held by the background restart monitor;
/// the components earlier in the startup order (cache, notify, ledgers,
/// rpc) are built once by [`Supervisor::start`] and survive every restart,
/// matching the "ledgers survive (no restart)" resolution (§9).
struct RestartDeps {
    rpc: EthRpcClient,
    cache: BlockMetadataCache,
    builder: Arc<CliInputBuilder>,
    proved: ProvedLedger,
    missed: MissedLedger,
    notify: NotificationSink,
    rpc_health_snapshot: RpcHealthSnapshot,
    ethproofs_rpc_url: String,
    ethproofs_api_key: String,
    ethproofs_cluster_id: u64,
    dev: bool,
    output_dir: PathBuf,
    prover_config: ProverConfig,
    health_port: u16,
    prover_stuck_threshold_seconds: u64,
}

impl RestartDeps {
    fn build_prover(&self) -> (Prover, JoinHandle<()>) {
        let ethproofs = EthProofsApiClient::new(
            self.ethproofs_rpc_url.clone(),
            self.ethproofs_api_key.clone(),
            self.ethproofs_cluster_id,
            self.dev,
            self.output_dir.clone(),
        );
        Prover::spawn(self.prover_config.clone(), ethproofs, self.proved.clone(), self.missed.clone(), self.notify.clone())
    }

    fn build_generator(&self, prover: Prover) -> (InputGenerator, JoinHandle<()>) {
        InputGenerator::spawn(
            self.rpc.clone(),
            self.cache.clone(),
            self.builder.clone(),
            self.missed.clone(),
            self.notify.clone(),
            prover,
        )
    }

    async fn build_status(&self, prover: Prover, generator: InputGenerator) -> eyre::Result<JoinHandle<()>> {
        status::spawn(
            self.health_port,
            prover,
            generator,
            self.proved.clone(),
            self.missed.clone(),
            self.rpc_health_snapshot.clone(),
            self.prover_stuck_threshold_seconds,
        )
        .await
    }
}

/// A running pipeline. Dropping this does not stop anything — call
/// [`Supervisor::shutdown`] or let the process exit.
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Builds and starts every actor, then returns once the StatusSurface is
    /// listening. The returned [`Supervisor`] is the shutdown handle; callers
    /// typically await [`Supervisor::wait_for_shutdown`] next.
    pub async fn start(config: SupervisorConfig) -> eyre::Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let cache = crate::meta_cache::BlockMetadataCache::new();
        let notify = NotificationSink::spawn(config.slack_webhook.clone());

        let rpc_health_snapshot = RpcHealthSnapshot::new();
        let health_notify = notify.clone();
        let health_snapshot = rpc_health_snapshot.clone();
        let health = RpcHealthHandle::spawn(config.eth_rpc_url.to_string(), move |event| match event {
            HealthEvent::Down { url, down_since_ms, last_error } => {
                health_snapshot.set_down(true);
                health_notify.notify(NotificationEvent::RpcDown { url, down_since_ms, last_error });
            }
            HealthEvent::Recovered { url, down_since_ms, recovered_at_ms } => {
                health_snapshot.set_down(false);
                health_notify.notify(NotificationEvent::RpcRecovered { url, down_since_ms, recovered_at_ms });
            }
        });
        let rpc = EthRpcClient::new(config.eth_rpc_url.clone(), health);

        let pool = open_pool(&config.database_url).await?;
        let proved = ProvedLedger::spawn(pool.clone(), Some(notify.clone())).await?;
        let missed = MissedLedger::spawn(pool, Some(notify.clone())).await?;

        let prover_config = ProverConfig {
            cargo_zisk_path: config.cargo_zisk_path.clone(),
            elf_path: config.elf_path.clone(),
            output_dir: config.output_dir.clone(),
            execute_only: config.dev,
        };
        let builder = Arc::new(CliInputBuilder::new(
            config.input_builder_executable.clone(),
            config.input_cache_dir.clone(),
        ));

        let deps = Arc::new(RestartDeps {
            rpc,
            cache,
            builder,
            proved,
            missed,
            notify,
            rpc_health_snapshot,
            ethproofs_rpc_url: config.ethproofs_rpc_url.clone(),
            ethproofs_api_key: config.ethproofs_api_key.clone(),
            ethproofs_cluster_id: config.ethproofs_cluster_id,
            dev: config.dev,
            output_dir: config.output_dir.clone(),
            prover_config,
            health_port: config.health_port,
            prover_stuck_threshold_seconds: config.prover_stuck_threshold_seconds,
        });

        // First build happens inline so `start` only returns once the
        // status surface is actually listening; the monitor loop below
        // takes over restarts from here.
        let (prover, prover_join) = deps.build_prover();
        let (generator, generator_join) = deps.build_generator(prover.clone());
        let status_join = deps.build_status(prover.clone(), generator.clone()).await?;

        tokio::spawn(run_rest_for_one(
            deps,
            prover,
            prover_join,
            generator,
            generator_join,
            status_join,
            shutdown_rx,
        ));

        info!("pipeline supervisor started");
        Ok(Self { shutdown_tx })
    }

    /// Blocks until [`Supervisor::shutdown`] is called (or a `ctrl_c` is
    /// wired to it by the caller).
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The rest-for-one restart loop (§4.9, §9 "Task substrate with
/// rest-for-one"): Prover, InputGenerator, and StatusSurface are started in
/// that order; when one of them terminates abnormally, it and every
/// component declared after it are rebuilt, while earlier components (and
/// everything built in [`Supervisor::start`] before this trio) are
/// preserved.
#[allow(clippy::too_many_arguments)]
async fn run_rest_for_one(
    deps: Arc<RestartDeps>,
    mut prover: Prover,
    mut prover_join: JoinHandle<()>,
    mut generator: InputGenerator,
    mut generator_join: JoinHandle<()>,
    mut status_join: JoinHandle<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            res = &mut prover_join => {
                log_exit("prover", res);
                warn!("restarting prover, input_generator, status_surface (rest-for-one)");
                generator_join.abort();
                status_join.abort();
                let (new_prover, pj) = deps.build_prover();
                let (new_generator, gj) = deps.build_generator(new_prover.clone());
                prover = new_prover;
                generator = new_generator;
                prover_join = pj;
                generator_join = gj;
                status_join = match deps.build_status(prover.clone(), generator.clone()).await {
                    Ok(join) => join,
                    Err(err) => {
                        tracing::error!("failed to restart status surface: {err}");
                        return;
                    }
                };
            }
            res = &mut generator_join => {
                log_exit("input_generator", res);
                warn!("restarting input_generator, status_surface (rest-for-one)");
                status_join.abort();
                // Prover is declared earlier in the startup order (§4.9) and
                // survives this restart untouched.
                let (new_generator, gj) = deps.build_generator(prover.clone());
                generator = new_generator;
                generator_join = gj;
                status_join = match deps.build_status(prover.clone(), generator.clone()).await {
                    Ok(join) => join,
                    Err(err) => {
                        tracing::error!("failed to restart status surface: {err}");
                        return;
                    }
                };
            }
            res = &mut status_join => {
                log_exit("status_surface", res);
                warn!("restarting status_surface");
                status_join = match deps.build_status(prover.clone(), generator.clone()).await {
                    Ok(join) => join,
                    Err(err) => {
                        tracing::error!("failed to restart status surface: {err}");
                        return;
                    }
                };
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

fn log_exit(component: &str, result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => warn!(component, "actor task exited normally (unexpected)"),
        Err(err) => warn!(component, "actor task terminated abnormally: {err}"),
    }
}
