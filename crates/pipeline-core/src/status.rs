//! StatusSurface (C10): a tiny `axum` HTTP surface exposing liveness,
//! readiness, and an aggregate health summary over the rest of the
//! pipeline's actors, without ever failing to respond because a downstream
//! component is unhealthy.
//!
//! Grounded on the pack's `axum::Router` usage for operator-facing health
//! endpoints (`server_relayer/server.rs`), generalized from a single relayer
//! status to this pipeline's multi-actor summary.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use ethp_ledger::{MissedLedger, ProvedLedger};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::{input_generator::InputGenerator, prover::Prover};

/// Default threshold (§6/§9) past which a stalled Prover run
/// is reported unhealthy rather than merely degraded.
pub const DEFAULT_PROVER_STUCK_THRESHOLD_SECONDS: u64 = 3600;

/// Shared, lock-protected view of the RPC endpoint's health, updated from
/// the [`ethp_rpc::RpcHealthHandle`]'s event callback (wired in the
/// Supervisor).
#[derive(Debug, Clone, Default)]
pub struct RpcHealthSnapshot {
    inner: Arc<Mutex<bool>>,
}

impl RpcHealthSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        *self.inner.lock().expect("rpc health snapshot lock poisoned") = down;
    }

    fn is_down(&self) -> bool {
        *self.inner.lock().expect("rpc health snapshot lock poisoned")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Overall {
    Healthy,
    Degraded,
    Unhealthy,
}

struct Shared {
    prover: Prover,
    generator: InputGenerator,
    proved: ProvedLedger,
    missed: MissedLedger,
    rpc_health: RpcHealthSnapshot,
    stuck_threshold_seconds: u64,
    started_at: std::time::Instant,
}

#[derive(Clone)]
struct AppState(Arc<Shared>);

/// Starts the HTTP surface on `port` and returns once it's listening,
/// alongside the [`tokio::task::JoinHandle`] for the serving task so a
/// supervisor can detect it dying and restart it (§4.9).
pub async fn spawn(
    port: u16,
    prover: Prover,
    generator: InputGenerator,
    proved: ProvedLedger,
    missed: MissedLedger,
    rpc_health: RpcHealthSnapshot,
    stuck_threshold_seconds: u64,
) -> eyre::Result<tokio::task::JoinHandle<()>> {
    let state = AppState(Arc::new(Shared {
        prover,
        generator,
        proved,
        missed,
        rpc_health,
        stuck_threshold_seconds,
        started_at: std::time::Instant::now(),
    }));

    let app = Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/health", get(health))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server = axum::Server::try_bind(&addr)?.serve(app.into_make_service());
    info!(%addr, "status surface listening");

    let join = tokio::spawn(async move {
        if let Err(err) = server.await {
            tracing::error!("status surface exited: {err}");
        }
    });

    Ok(join)
}

/// Process liveness: always `200 OK` once the surface itself is up.
async fn live() -> impl IntoResponse {
    "ok"
}

/// Process readiness (§4.10): `200` iff the aggregate `/health` verdict is
/// `healthy`, `503` otherwise (degraded counts as not-ready, same as
/// unhealthy — only a fully healthy pipeline should receive traffic).
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let (overall, _prover_status, _generator_status, _rpc_down) = compute_status(&state).await;
    match overall {
        Overall::Healthy => axum::http::StatusCode::OK,
        Overall::Degraded | Overall::Unhealthy => axum::http::StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn compute_status(
    state: &AppState,
) -> (Overall, crate::prover::ProverStatus, crate::input_generator::GeneratorStatus, bool) {
    let prover_status = state.0.prover.status().await;
    let generator_status = state.0.generator.status().await;
    let rpc_down = state.0.rpc_health.is_down();

    let prover_down = matches!(prover_status, crate::prover::ProverStatus::Down);
    let generator_down = matches!(generator_status, crate::input_generator::GeneratorStatus::Down);
    let prover_running_seconds = match prover_status {
        crate::prover::ProverStatus::Proving { running_seconds, .. } => Some(running_seconds),
        _ => None,
    };

    let overall =
        overall_status(prover_down, generator_down, prover_running_seconds, state.0.stuck_threshold_seconds);

    (overall, prover_status, generator_status, rpc_down)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (overall, prover_status, generator_status, rpc_down) = compute_status(&state).await;
    let generator_down = matches!(generator_status, crate::input_generator::GeneratorStatus::Down);

    let body = json!({
        "status": overall,
        "timestamp": now(),
        "uptime_seconds": state.0.started_at.elapsed().as_secs(),
        "system": system_info(),
        "components": {
            "rpc": if rpc_down { "down" } else { "up" },
            "prover": match prover_status {
                crate::prover::ProverStatus::Idle => json!({ "state": "idle" }),
                crate::prover::ProverStatus::Proving { block, running_seconds } => {
                    json!({ "state": "proving", "block": block, "running_seconds": running_seconds })
                }
                crate::prover::ProverStatus::Down => json!({ "state": "down" }),
            },
            "input_generator": match generator_status {
                crate::input_generator::GeneratorStatus::Idle => json!({ "state": "idle" }),
                crate::input_generator::GeneratorStatus::Generating { block } => {
                    json!({ "state": "generating", "block": block })
                }
                crate::input_generator::GeneratorStatus::Down => json!({ "state": "down" }),
            },
            // No standalone task-host substrate exists separately from the
            // InputGenerator actor (§9), so its liveness mirrors the
            // generator's.
            "task_host": if generator_down { "down" } else { "up" },
            "proved_blocks": state.0.proved.count().await,
            "missed_blocks": state.0.missed.count().await,
        }
    });

    let status_code = match overall {
        Overall::Healthy | Overall::Degraded => axum::http::StatusCode::OK,
        Overall::Unhealthy => axum::http::StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(body))
}

/// §4.10: unhealthy if the Prover or InputGenerator actor is down (or, by
/// the note above, the task host folded into it); degraded if the Prover's
/// running duration exceeds `stuck_threshold_seconds`; healthy otherwise.
fn overall_status(
    prover_down: bool,
    generator_down: bool,
    prover_running_seconds: Option<u64>,
    stuck_threshold_seconds: u64,
) -> Overall {
    if prover_down || generator_down {
        return Overall::Unhealthy;
    }

    match prover_running_seconds {
        Some(seconds) if seconds > stuck_threshold_seconds => Overall::Degraded,
        _ => Overall::Healthy,
    }
}

fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Coarse `system` figures for `/health` (§4.10): resident memory and a
/// process count, both read straight off `/proc` rather than pulled in from
/// a CPU/GPU-probing dependency (§1 explicitly keeps that gathering
/// external). Degrades to `null` fields on non-Linux or read failure rather
/// than failing the health check.
fn system_info() -> serde_json::Value {
    json!({
        "memory_kb": read_rss_kb(),
        "process_count": count_processes(),
    })
}

fn read_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status.lines().find_map(|line| {
        line.strip_prefix("VmRSS:")?.split_whitespace().next()?.parse::<u64>().ok()
    })
}

fn count_processes() -> Option<usize> {
    let entries = std::fs::read_dir("/proc").ok()?;
    Some(
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()))
            .count(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_when_nothing_is_wrong() {
        assert_eq!(overall_status(false, false, None, 3600), Overall::Healthy);
    }

    #[test]
    fn unhealthy_when_prover_down() {
        assert_eq!(overall_status(true, false, None, 3600), Overall::Unhealthy);
    }

    #[test]
    fn unhealthy_when_generator_down() {
        assert_eq!(overall_status(false, true, None, 3600), Overall::Unhealthy);
    }

    #[test]
    fn degraded_past_the_stuck_threshold() {
        assert_eq!(overall_status(false, false, Some(3_601), 3600), Overall::Degraded);
    }

    #[test]
    fn healthy_at_or_below_the_stuck_threshold() {
        assert_eq!(overall_status(false, false, Some(3_600), 3600), Overall::Healthy);
    }

    #[test]
    fn system_info_never_panics_and_reports_some_counts() {
        // On a Linux CI host both fields resolve; elsewhere they degrade to
        // `null` rather than erroring (§4.10 "tolerate absent components").
        let info = system_info();
        assert!(info.get("memory_kb").is_some());
        assert!(info.get("process_count").is_some());
    }
}
