//! InputGenerator (C7): the serial, poll-driven first pipeline stage. Polls
//! the latest block on a fixed interval, decides which blocks are eligible,
//! and runs the single producing worker (fetch, cache, build) ahead of
//! handing the result to the Prover.
//!
//! Grounded on `bin/continuous`'s main loop (a per-block task spawn against
//! a polled chain tip), generalized to the target-block-interval acceptance
//! rule and the single-worker queue model from §4.7.

use std::{
    collections::{HashSet, VecDeque},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use ethp_ledger::MissedLedger;
use ethp_notify::{NotificationEvent, NotificationSink};
use ethp_rpc::{parse_block_meta, BlockParam, EthRpcClient};
use ethp_types::{estimated_wait_seconds, is_target_block, BlockId, MissedRecord, MissedStage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::{input_builder::InputBuilder, meta_cache::BlockMetadataCache, prover::Prover};

const POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorStatus {
    Idle,
    Generating { block: BlockId },
    /// The actor mailbox is gone (task host torn down): StatusSurface
    /// reports this as unhealthy (§4.10).
    Down,
}

enum Msg {
    Tick,
    Generate(BlockId),
    Completed { generation: u64, block: BlockId, result: Result<(PathBuf, u32), String> },
    Crashed { generation: u64, block: BlockId },
    Status { reply: oneshot::Sender<GeneratorStatus> },
}

/// A cloneable handle to the running InputGenerator actor.
#[derive(Debug, Clone)]
pub struct InputGenerator {
    tx: mpsc::Sender<Msg>,
}

struct Current {
    block: BlockId,
    generation: u64,
    started_at: i64,
}

struct State<B: InputBuilder> {
    rpc: EthRpcClient,
    cache: BlockMetadataCache,
    builder: Arc<B>,
    missed: MissedLedger,
    notify: NotificationSink,
    prover: Prover,
    tx: mpsc::Sender<Msg>,
    queue: VecDeque<BlockId>,
    queued: HashSet<BlockId>,
    processed: HashSet<BlockId>,
    current: Option<Current>,
    generation: u64,
}

impl InputGenerator {
    /// Spawns the actor and returns a handle to it alongside the
    /// [`tokio::task::JoinHandle`] for its driver loop (see
    /// [`crate::prover::Prover::spawn`] for why).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<B: InputBuilder>(
        rpc: EthRpcClient,
        cache: BlockMetadataCache,
        builder: Arc<B>,
        missed: MissedLedger,
        notify: NotificationSink,
        prover: Prover,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(256);
        let mut state = State {
            rpc,
            cache,
            builder,
            missed,
            notify,
            prover,
            tx: tx.clone(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            processed: HashSet::new(),
            current: None,
            generation: 0,
        };

        let ticker_tx = tx.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                if ticker_tx.send(Msg::Tick).await.is_err() {
                    break;
                }
            }
        });

        let join = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                state.handle(msg).await;
            }
            ticker.abort();
        });

        (Self { tx }, join)
    }

    /// Directly requests generation for `block`, bypassing the poll's
    /// target-block-interval gate (§4.7 "External triggers": used by tests
    /// and could be wired to an operator-facing trigger). Still subject to
    /// the same dedupe/marker acceptance rule as a poll-derived block.
    pub async fn generate(&self, block: BlockId) {
        let _ = self.tx.send(Msg::Generate(block)).await;
    }

    pub async fn status(&self) -> GeneratorStatus {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Msg::Status { reply }).await.is_err() {
            return GeneratorStatus::Down;
        }
        rx.await.unwrap_or(GeneratorStatus::Down)
    }
}

impl<B: InputBuilder> State<B> {
    async fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Tick => self.on_tick().await,
            Msg::Generate(block) => self.try_enqueue(block).await,
            Msg::Completed { generation, block, result } => self.on_completed(generation, block, result).await,
            Msg::Crashed { generation, block } => self.on_crashed(generation, block).await,
            Msg::Status { reply } => {
                let status = match &self.current {
                    Some(c) => GeneratorStatus::Generating { block: c.block },
                    None => GeneratorStatus::Idle,
                };
                let _ = reply.send(status);
            }
        }
    }

    async fn on_tick(&mut self) {
        let (latest, observed_at) = match self.rpc.latest_block_info().await {
            Ok(info) => info,
            Err(err) => {
                warn!("failed to poll latest block: {err}");
                return;
            }
        };

        if !is_target_block(latest) {
            let wait = estimated_wait_seconds(latest, observed_at, now());
            debug!(latest, wait, "latest block is not a target block");
            return;
        }

        self.try_enqueue(latest).await;
    }

    async fn try_enqueue(&mut self, block: BlockId) {
        if self.processed.contains(&block) {
            debug!(block, "already processed, skipping");
            return;
        }
        if self.queued.contains(&block) {
            debug!(block, "already queued, skipping");
            return;
        }
        if self.current.as_ref().is_some_and(|c| c.block == block) {
            debug!(block, "currently generating, skipping");
            return;
        }
        // On-disk "<n>.bin" marker (§9, Open Question): its acceptance rule
        // treats the marker's presence as a reason to skip, same as the
        // in-memory checks above. This implementation is not itself the
        // marker's writer; it only honors the convention.
        if self.builder.existing_marker(block).is_some() {
            debug!(block, "on-disk marker exists, skipping");
            return;
        }

        self.queued.insert(block);
        self.queue.push_back(block);

        if self.current.is_none() {
            self.promote().await;
        }
    }

    async fn promote(&mut self) {
        let Some(block) = self.queue.pop_front() else { return };
        self.queued.remove(&block);

        self.generation += 1;
        let generation = self.generation;
        let started_at = now();
        self.current = Some(Current { block, generation, started_at });

        let rpc = self.rpc.clone();
        let cache = self.cache.clone();
        let builder = self.builder.clone();
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            run_worker(block, rpc, cache, builder).await
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(result) => {
                    let input_gen_seconds = (now() - started_at).max(0) as u32;
                    let result = result.map(|path| (path, input_gen_seconds));
                    let _ = tx.send(Msg::Completed { generation, block, result }).await;
                }
                Err(err) => {
                    error!(block, "input generation worker panicked: {err}");
                    let _ = tx.send(Msg::Crashed { generation, block }).await;
                }
            }
        });
    }

    async fn on_completed(&mut self, generation: u64, block: BlockId, result: Result<(PathBuf, u32), String>) {
        if self.current.as_ref().map_or(true, |c| c.generation != generation) {
            return;
        }
        self.current = None;

        match result {
            Ok((input_path, input_gen_seconds)) => {
                self.processed.insert(block);
                self.prover.prove(block, input_path, Some(input_gen_seconds)).await;
            }
            Err(reason) => {
                self.processed.insert(block);
                let meta = self.cache.get(block);
                self.missed
                    .add(MissedRecord::with_defaults(block, now(), Some(MissedStage::InputGen), Some(reason.clone())))
                    .await;
                self.notify.notify(NotificationEvent::InputGenerationFailed {
                    block,
                    step: "build_input".to_string(),
                    reason,
                    meta,
                });
            }
        }

        self.promote().await;
    }

    async fn on_crashed(&mut self, generation: u64, block: BlockId) {
        if self.current.as_ref().map_or(true, |c| c.generation != generation) {
            return;
        }
        self.current = None;

        // Open Question resolution (§9): a crashed worker does
        // NOT mark the block processed, so a later poll retries it.
        warn!(block, "input generation worker crashed, will retry on next poll");

        self.promote().await;
    }
}

async fn run_worker<B: InputBuilder>(
    block: BlockId,
    rpc: EthRpcClient,
    cache: BlockMetadataCache,
    builder: Arc<B>,
) -> Result<PathBuf, String> {
    let block_json = rpc.block_json(BlockParam::Number(block)).await.map_err(|e| e.to_string())?;

    let meta = parse_block_meta(&block_json).map_err(|e| e.to_string())?;
    cache.insert(block, meta);

    let witness = rpc.execution_witness(BlockParam::Number(block)).await.map_err(|e| e.to_string())?;

    builder.build_input(block, &block_json, &witness).await
}

fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethp_ethproofs::EthProofsApiClient;
    use ethp_ledger::{open_pool, ProvedLedger};
    use ethp_rpc::RpcHealthHandle;

    struct FakeBuilder {
        marker: Option<PathBuf>,
    }

    impl InputBuilder for FakeBuilder {
        async fn build_input(&self, _block: BlockId, _block_json: &[u8], _witness: &[u8]) -> Result<PathBuf, String> {
            Err("fake builder never succeeds in these tests".to_string())
        }

        fn existing_marker(&self, _block: BlockId) -> Option<PathBuf> {
            self.marker.clone()
        }
    }

    /// A `State` wired over an unreachable RPC endpoint and a dev-mode
    /// Prover: enough to exercise `try_enqueue`'s synchronous acceptance
    /// rule without any network traffic actually completing.
    async fn test_state(marker: Option<PathBuf>) -> State<FakeBuilder> {
        let rpc = EthRpcClient::new(
            url::Url::parse("http://127.0.0.1:1").unwrap(),
            RpcHealthHandle::spawn("http://127.0.0.1:1", |_| {}),
        );
        let pool = open_pool("sqlite::memory:").await.unwrap();
        let missed = MissedLedger::spawn(pool.clone(), None).await.unwrap();
        let proved = ProvedLedger::spawn(pool, None).await.unwrap();
        let notify = NotificationSink::spawn(None);
        let ethproofs = EthProofsApiClient::new(String::new(), String::new(), 1, true, std::env::temp_dir());
        let (prover, _join) = crate::prover::Prover::spawn(
            crate::prover::ProverConfig {
                cargo_zisk_path: PathBuf::from("cargo-zisk"),
                elf_path: PathBuf::from("guest.elf"),
                output_dir: std::env::temp_dir(),
                execute_only: true,
            },
            ethproofs,
            proved,
            missed.clone(),
            notify.clone(),
        );

        let (tx, _rx) = mpsc::channel(8);
        State {
            rpc,
            cache: BlockMetadataCache::new(),
            builder: Arc::new(FakeBuilder { marker }),
            missed,
            notify,
            prover,
            tx,
            queue: VecDeque::new(),
            queued: HashSet::new(),
            processed: HashSet::new(),
            current: None,
            generation: 0,
        }
    }

    #[tokio::test]
    async fn marker_present_skips_enqueue() {
        let mut state = test_state(Some(PathBuf::from("/tmp/42.bin"))).await;
        state.try_enqueue(42).await;
        assert!(state.queue.is_empty());
        assert!(state.current.is_none());
    }

    #[tokio::test]
    async fn already_processed_skips_enqueue() {
        let mut state = test_state(None).await;
        state.processed.insert(7);
        state.try_enqueue(7).await;
        assert!(state.queue.is_empty());
        assert!(state.current.is_none());
    }

    #[tokio::test]
    async fn already_queued_skips_duplicate_enqueue() {
        let mut state = test_state(None).await;
        state.queue.push_back(7);
        state.queued.insert(7);
        state.try_enqueue(7).await;
        assert_eq!(state.queue.len(), 1);
    }

    #[tokio::test]
    async fn currently_generating_skips_duplicate_enqueue() {
        let mut state = test_state(None).await;
        state.current = Some(Current { block: 9, generation: 1, started_at: 0 });
        state.try_enqueue(9).await;
        assert!(state.queue.is_empty());
    }

    #[tokio::test]
    async fn accepted_block_is_promoted_into_current() {
        let mut state = test_state(None).await;
        state.try_enqueue(5).await;
        match &state.current {
            Some(current) => assert_eq!(current.block, 5),
            None => panic!("expected block 5 to be promoted into current"),
        }
        assert!(!state.queued.contains(&5));
    }
}
