//! Prover (C8): the serial, subprocess-backed second pipeline stage.
//!
//! Subprocess supervision follows §4.8/§9: a dedicated "nanny"
//! task blocks on `child.wait()` and forwards the outcome to the Prover
//! actor's own mailbox as an ordinary message, so a child's death can never
//! unwind the actor itself (grounded on `tokio::process::Command`
//! spawn/await/forward-as-message usage in the pack, e.g.
//! `generate_entities.rs`).

use std::{
    io,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Instant,
};

use ethp_ethproofs::{encode_proof, find_proof_binary, EthProofsApiClient};
use ethp_ledger::{AddOutcome, MissedLedger, ProvedLedger};
use ethp_notify::{NotificationEvent, NotificationSink, Topic};
use ethp_types::{BlockId, MissedRecord, MissedStage, ProvedRecord};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct QueuedProof {
    block: BlockId,
    input: PathBuf,
    input_gen_seconds: Option<u32>,
}

enum Msg {
    Prove(QueuedProof),
    Exited { generation: u64, status: io::Result<ExitStatus> },
    Status { reply: tokio::sync::oneshot::Sender<ProverStatus> },
}

/// A cloneable handle to the running Prover actor.
#[derive(Debug, Clone)]
pub struct Prover {
    tx: mpsc::Sender<Msg>,
}

#[derive(Debug, Clone)]
pub struct ProverConfig {
    pub cargo_zisk_path: PathBuf,
    pub elf_path: PathBuf,
    pub output_dir: PathBuf,
    /// §6 `dev`: replaces the `prove` subcommand with `execute` (no proof
    /// produced, used for dry-running the pipeline in development).
    pub execute_only: bool,
}

struct State {
    config: ProverConfig,
    ethproofs: EthProofsApiClient,
    proved: ProvedLedger,
    missed: MissedLedger,
    notify: NotificationSink,
    tx: mpsc::Sender<Msg>,
    queue: std::collections::VecDeque<QueuedProof>,
    queued_set: std::collections::HashSet<BlockId>,
    idle_since: i64,
    current: Option<CurrentRun>,
    generation: u64,
}

struct CurrentRun {
    block: BlockId,
    started_at: Instant,
    input_gen_seconds: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProverStatus {
    Idle,
    Proving { block: BlockId, running_seconds: u64 },
    /// The actor mailbox is gone: StatusSurface reports this as unhealthy
    /// (§4.10).
    Down,
}

impl Prover {
    /// Spawns the actor and returns a handle to it alongside the
    /// [`tokio::task::JoinHandle`] for its driver loop, so a supervisor can
    /// detect an abnormal exit (panic) and apply the rest-for-one restart
    /// policy (§4.9).
    pub fn spawn(
        config: ProverConfig,
        ethproofs: EthProofsApiClient,
        proved: ProvedLedger,
        missed: MissedLedger,
        notify: NotificationSink,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(256);
        let mut state = State {
            config,
            ethproofs,
            proved,
            missed,
            notify,
            tx: tx.clone(),
            queue: Default::default(),
            queued_set: Default::default(),
            idle_since: now(),
            current: None,
            generation: 0,
        };

        let join = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                state.handle(msg).await;
            }
        });

        (Self { tx }, join)
    }

    /// Enqueue `block` for proving (§4.8 "Enqueue operation"). A no-op if
    /// the block is already queued or in-progress (I1).
    pub async fn prove(&self, block: BlockId, input: PathBuf, input_gen_seconds: Option<u32>) {
        let _ = self.tx.send(Msg::Prove(QueuedProof { block, input, input_gen_seconds })).await;
    }

    pub async fn status(&self) -> ProverStatus {
        let (reply, rx) = tokio::sync::oneshot::channel();
        if self.tx.send(Msg::Status { reply }).await.is_err() {
            return ProverStatus::Down;
        }
        rx.await.unwrap_or(ProverStatus::Down)
    }
}

impl State {
    async fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Prove(item) => self.enqueue(item).await,
            Msg::Exited { generation, status } => {
                if generation != self.generation {
                    // Stray message from an already-replaced run; discard (§4.8).
                    return;
                }
                self.on_exit(status).await;
            }
            Msg::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn enqueue(&mut self, item: QueuedProof) {
        if self.queued_set.contains(&item.block) || self.current.as_ref().is_some_and(|c| c.block == item.block) {
            debug!(block = item.block, "prover: block already queued or in progress, skipping");
            return;
        }

        if let ethp_ethproofs::ReportOutcome::Error(reason) = self.ethproofs.queued(item.block).await {
            self.notify.notify(NotificationEvent::EthProofsRequestFailed {
                block: item.block,
                step: "queued".to_string(),
                reason,
            });
        }

        self.queued_set.insert(item.block);
        self.queue.push_back(item);

        if self.current.is_none() {
            self.promote().await;
        }
    }

    async fn promote(&mut self) {
        let Some(item) = self.queue.pop_front() else { return };
        self.queued_set.remove(&item.block);
        self.generation += 1;
        let generation = self.generation;

        let output_dir = self.config.output_dir.join(item.block.to_string());
        if let Err(err) = tokio::fs::create_dir_all(&output_dir).await {
            error!(block = item.block, "failed to create prover output dir: {err}");
            self.missed
                .add(MissedRecord::with_defaults(
                    item.block,
                    now(),
                    Some(MissedStage::Proving),
                    Some(format!("Prover crashed: {err}")),
                ))
                .await;
            self.promote_next_after_failure().await;
            return;
        }

        let subcommand = if self.config.execute_only { "execute" } else { "prove" };
        let mut command = Command::new(&self.config.cargo_zisk_path);
        command
            .arg(subcommand)
            .arg("-e")
            .arg(&self.config.elf_path)
            .arg("-i")
            .arg(&item.input)
            .arg("-o")
            .arg(&output_dir)
            .arg("-a")
            .arg("-u")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(block = item.block, "failed to spawn cargo-zisk: {err}");
                self.missed
                    .add(MissedRecord::with_defaults(
                        item.block,
                        now(),
                        Some(MissedStage::Proving),
                        Some(format!("Prover crashed: {err}")),
                    ))
                    .await;
                self.promote_next_after_failure().await;
                return;
            }
        };

        if let Some(stdout) = child.stdout.take() {
            spawn_line_logger(item.block, "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_logger(item.block, "stderr", stderr);
        }

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let _ = tx.send(Msg::Exited { generation, status }).await;
        });

        if let ethp_ethproofs::ReportOutcome::Error(reason) = self.ethproofs.proving(item.block).await {
            self.notify.notify(NotificationEvent::EthProofsRequestFailed {
                block: item.block,
                step: "proving".to_string(),
                reason,
            });
        }

        self.current = Some(CurrentRun { block: item.block, started_at: Instant::now(), input_gen_seconds: item.input_gen_seconds });
        self.notify.publish(Topic::ProverStatus { block: Some(item.block), status: "proving".to_string() });
    }

    async fn on_exit(&mut self, status: io::Result<ExitStatus>) {
        let Some(run) = self.current.take() else { return };
        let proving_seconds = run.started_at.elapsed().as_secs() as u32;

        match status {
            Ok(exit_status) if exit_status.signal().is_none() => {
                self.on_process_exit(run.block, exit_status, proving_seconds, run.input_gen_seconds).await
            }
            Ok(exit_status) => {
                let signal = exit_status.signal().expect("checked above");
                self.on_crash(run.block, format!("Prover crashed: killed by signal {signal}")).await;
            }
            Err(err) => self.on_crash(run.block, format!("Prover crashed: {err}")).await,
        }

        self.notify.publish(Topic::ProverStatus { block: None, status: "idle".to_string() });
        self.idle_since = now();
        self.promote().await;
    }

    /// §4.8 abnormal termination: the subprocess never reached `result.json`,
    /// whether it never ran at all (`wait()` error) or was killed by a signal
    /// (OOM, scenario 4) — `child.wait()` reports the latter as `Ok` with no
    /// exit code, not an `Err`.
    async fn on_crash(&mut self, block: BlockId, reason: String) {
        warn!(block, "{reason}");
        self.missed.add(MissedRecord::with_defaults(block, now(), Some(MissedStage::Proving), Some(reason.clone()))).await;
        self.notify.notify(NotificationEvent::ProofGenerationFailed { block, reason });
    }

    async fn on_process_exit(&mut self, block: BlockId, status: ExitStatus, proving_seconds: u32, input_gen_seconds: Option<u32>) {
        let output_dir = self.config.output_dir.join(block.to_string());

        match read_artifacts(&output_dir).await {
            Ok(artifacts) => {
                let outcome = self
                    .ethproofs
                    .proved(block, artifacts.time_ms, artifacts.cycles, &artifacts.proof_b64, Some(&artifacts.verifier_id))
                    .await;

                if let ethp_ethproofs::ReportOutcome::Error(reason) = outcome {
                    self.notify.notify(NotificationEvent::EthProofsRequestFailed {
                        block,
                        step: "proved".to_string(),
                        reason,
                    });
                }

                let add_outcome = self
                    .proved
                    .add(ProvedRecord {
                        block,
                        proved_at: now(),
                        proving_seconds: Some(proving_seconds),
                        input_gen_seconds,
                    })
                    .await;

                if let AddOutcome::Error(reason) = add_outcome {
                    error!(block, "failed to persist proved record: {reason}");
                }

                info!(block, "proof submitted");
                self.notify.notify(NotificationEvent::ProofSubmitted { block });
            }
            Err(reason) => {
                let reason = format!("Proving failed (exit_status:{status}): {reason}");
                warn!(block, "{reason}");
                self.missed
                    .add(MissedRecord::with_defaults(block, now(), Some(MissedStage::Proving), Some(reason.clone())))
                    .await;
                self.notify.notify(NotificationEvent::ProofDataFailed { block, reason });
            }
        }
    }

    async fn promote_next_after_failure(&mut self) {
        self.current = None;
        self.idle_since = now();
        self.promote().await;
    }

    pub fn status(&self) -> ProverStatus {
        match &self.current {
            Some(run) => {
                ProverStatus::Proving { block: run.block, running_seconds: run.started_at.elapsed().as_secs() }
            }
            None => ProverStatus::Idle,
        }
    }
}

struct ParsedArtifacts {
    cycles: u64,
    time_ms: u64,
    proof_b64: String,
    verifier_id: String,
}

#[derive(Deserialize)]
struct ResultJson {
    cycles: u64,
    time: f64,
    id: String,
}

async fn read_artifacts(output_dir: &std::path::Path) -> Result<ParsedArtifacts, String> {
    let result_path = output_dir.join("result.json");
    let result_bytes = tokio::fs::read(&result_path).await.map_err(|e| format!("reading result.json: {e}"))?;
    let result: ResultJson = serde_json::from_slice(&result_bytes).map_err(|e| format!("parsing result.json: {e}"))?;

    let proof_path =
        find_proof_binary(output_dir).await.ok_or_else(|| "no proof binary found".to_string())?;
    let proof_bytes = tokio::fs::read(&proof_path).await.map_err(|e| format!("reading proof binary: {e}"))?;

    Ok(ParsedArtifacts {
        cycles: result.cycles,
        time_ms: (result.time * 1000.0).floor() as u64,
        proof_b64: encode_proof(&proof_bytes),
        verifier_id: result.id,
    })
}

fn spawn_line_logger(block: BlockId, stream: &'static str, reader: impl tokio::io::AsyncRead + Unpin + Send + 'static) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(block, stream, "{line}");
        }
    });
}

fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethp_ethproofs::EthProofsApiClient;
    use ethp_ledger::{open_pool, MissedLedger, ProvedLedger};
    use ethp_notify::NotificationSink;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable shell script standing in for `cargo-zisk` and
    /// wires up a Prover over fresh in-memory ledgers and a dev-mode (no
    /// network) EthProofs client.
    async fn harness(script: &str) -> (Prover, ProvedLedger, MissedLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool("sqlite::memory:").await.unwrap();
        let proved = ProvedLedger::spawn(pool.clone(), None).await.unwrap();
        let missed = MissedLedger::spawn(pool, None).await.unwrap();
        let notify = NotificationSink::spawn(None);
        let ethproofs = EthProofsApiClient::new(String::new(), String::new(), 1, true, dir.path().join("requests"));

        let script_path = dir.path().join("cargo-zisk");
        tokio::fs::write(&script_path, script).await.unwrap();
        let mut perms = tokio::fs::metadata(&script_path).await.unwrap().permissions();
        perms.set_mode(0o755);
        tokio::fs::set_permissions(&script_path, perms).await.unwrap();

        let config = ProverConfig {
            cargo_zisk_path: script_path,
            elf_path: dir.path().join("guest.elf"),
            output_dir: dir.path().join("output"),
            execute_only: false,
        };

        let (prover, _join) = Prover::spawn(config, ethproofs, proved.clone(), missed.clone(), notify);
        (prover, proved, missed, dir)
    }

    async fn wait_for_idle(prover: &Prover) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if prover.status().await == ProverStatus::Idle {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("prover did not return to idle in time");
    }

    #[tokio::test]
    async fn spawn_failure_marks_missed_and_returns_idle() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool("sqlite::memory:").await.unwrap();
        let proved = ProvedLedger::spawn(pool.clone(), None).await.unwrap();
        let missed = MissedLedger::spawn(pool, None).await.unwrap();
        let notify = NotificationSink::spawn(None);
        let ethproofs = EthProofsApiClient::new(String::new(), String::new(), 1, true, dir.path().join("requests"));

        let config = ProverConfig {
            cargo_zisk_path: dir.path().join("no-such-binary"),
            elf_path: dir.path().join("guest.elf"),
            output_dir: dir.path().join("output"),
            execute_only: false,
        };

        let (prover, _join) = Prover::spawn(config, ethproofs, proved.clone(), missed.clone(), notify);

        // enqueue() and its failed promote() run to completion before the
        // actor dequeues the next message, so by the time status() replies
        // the missed record is already written (no polling needed).
        prover.prove(7, dir.path().join("input.bin"), None).await;
        assert_eq!(prover.status().await, ProverStatus::Idle);
        assert!(missed.contains(7).await);
        assert!(!proved.contains(7).await);
    }

    #[tokio::test]
    async fn duplicate_enqueue_while_running_is_deduped() {
        let (prover, _proved, _missed, dir) = harness("#!/bin/sh\nsleep 2\n").await;

        prover.prove(11, dir.path().join("a.bin"), None).await;
        prover.prove(11, dir.path().join("b.bin"), None).await;

        match prover.status().await {
            ProverStatus::Proving { block, .. } => assert_eq!(block, 11),
            other => panic!("expected Proving, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_artifacts_after_exit_is_recorded_as_missed() {
        let (prover, proved, missed, dir) = harness("#!/bin/sh\nexit 0\n").await;

        prover.prove(42, dir.path().join("input.bin"), None).await;
        wait_for_idle(&prover).await;

        assert!(missed.contains(42).await);
        assert!(!proved.contains(42).await);
    }

    #[tokio::test]
    async fn successful_run_with_artifacts_is_recorded_as_proved() {
        // argv is `prove -e <elf> -i <input> -o <output_dir> -a -u`, so the
        // output directory lands in $7.
        let script = r#"#!/bin/sh
out="$7"
printf '{"cycles":12345,"time":1.5,"id":"v1"}' > "$out/result.json"
printf 'deadbeef' > "$out/vadcop_final_proof.compressed.bin"
exit 0
"#;
        let (prover, proved, missed, dir) = harness(script).await;

        prover.prove(99, dir.path().join("input.bin"), Some(3)).await;
        wait_for_idle(&prover).await;

        assert!(proved.contains(99).await);
        assert!(!missed.contains(99).await);
    }
}
