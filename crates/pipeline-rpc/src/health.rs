//! RpcHealthTracker (C2): an edge-triggered up/down tracker for a single
//! upstream RPC endpoint. Kept as a plain, synchronously-testable state
//! machine (§8 P7) with a thin actor shell (§5) wrapped around it so the
//! rest of the pipeline can drive it from arbitrary call sites without
//! sharing a lock.

use tokio::sync::mpsc;
use tracing::debug;

/// Outages must persist at least this long before a `rpc_down` notification
/// fires, to avoid flapping on isolated blips (§4.2).
pub const DOWN_THRESHOLD_MS: i64 = 60_000;

#[derive(Debug, Clone, Default)]
struct HealthState {
    down_since_ms: Option<i64>,
    notified: bool,
    last_error: Option<String>,
}

/// An edge transition worth telling the rest of the system about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    Down { url: String, down_since_ms: i64, last_error: String },
    Recovered { url: String, down_since_ms: i64, recovered_at_ms: i64 },
}

/// The pure state machine from §4.2, with no I/O of its own.
#[derive(Debug, Clone, Default)]
pub struct RpcHealthTracker {
    url: String,
    state: HealthState,
}

impl RpcHealthTracker {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), state: HealthState::default() }
    }

    /// Feed a successful call. Returns `Some` exactly on a recovered edge.
    pub fn record_success(&mut self, now_ms: i64) -> Option<HealthEvent> {
        if let Some(down_since_ms) = self.state.down_since_ms {
            let event = self
                .state
                .notified
                .then(|| HealthEvent::Recovered { url: self.url.clone(), down_since_ms, recovered_at_ms: now_ms });
            self.state = HealthState::default();
            event
        } else {
            None
        }
    }

    /// Feed a failed call. Returns `Some` exactly on the down edge (first
    /// time the outage crosses [`DOWN_THRESHOLD_MS`]).
    pub fn record_failure(&mut self, now_ms: i64, reason: String) -> Option<HealthEvent> {
        let down_since_ms = *self.state.down_since_ms.get_or_insert(now_ms);
        self.state.last_error = Some(reason.clone());

        if !self.state.notified && now_ms - down_since_ms >= DOWN_THRESHOLD_MS {
            self.state.notified = true;
            return Some(HealthEvent::Down { url: self.url.clone(), down_since_ms, last_error: reason });
        }

        None
    }
}

enum HealthCmd {
    Success { now_ms: i64 },
    Failure { now_ms: i64, reason: String },
}

/// A cloneable handle to a running [`RpcHealthTracker`] actor.
#[derive(Debug, Clone)]
pub struct RpcHealthHandle {
    tx: mpsc::UnboundedSender<HealthCmd>,
}

impl RpcHealthHandle {
    /// Spawns the actor loop. `on_event` is called from the actor task for
    /// every edge transition (wire it to the NotificationSink).
    pub fn spawn(
        url: impl Into<String>,
        mut on_event: impl FnMut(HealthEvent) + Send + 'static,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = RpcHealthTracker::new(url);

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let event = match cmd {
                    HealthCmd::Success { now_ms } => tracker.record_success(now_ms),
                    HealthCmd::Failure { now_ms, reason } => tracker.record_failure(now_ms, reason),
                };
                if let Some(event) = event {
                    debug!(?event, "rpc health transition");
                    on_event(event);
                }
            }
        });

        Self { tx }
    }

    pub fn record_success(&self, now_ms: i64) {
        let _ = self.tx.send(HealthCmd::Success { now_ms });
    }

    pub fn record_failure(&self, now_ms: i64, reason: String) {
        let _ = self.tx.send(HealthCmd::Failure { now_ms, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_notification_below_threshold() {
        let mut t = RpcHealthTracker::new("wss://x");
        assert_eq!(t.record_failure(0, "refused".into()), None);
        assert_eq!(t.record_failure(59_999, "refused".into()), None);
    }

    #[test]
    fn single_down_notification_per_episode() {
        let mut t = RpcHealthTracker::new("wss://x");
        assert_eq!(t.record_failure(0, "refused".into()), None);
        let event = t.record_failure(61_000, "refused".into());
        assert!(matches!(event, Some(HealthEvent::Down { .. })));

        // Further failures in the same episode must not re-notify.
        assert_eq!(t.record_failure(90_000, "refused".into()), None);
    }

    #[test]
    fn recovered_only_after_notified_down() {
        let mut t = RpcHealthTracker::new("wss://x");
        // Outage that never crossed the threshold: success is a silent reset.
        assert_eq!(t.record_failure(0, "refused".into()), None);
        assert_eq!(t.record_success(1_000), None);

        // Outage that did cross the threshold produces a matching recovered.
        assert_eq!(t.record_failure(0, "refused".into()), None);
        assert!(t.record_failure(61_000, "refused".into()).is_some());
        let recovered = t.record_success(120_000);
        assert!(matches!(recovered, Some(HealthEvent::Recovered { .. })));
    }

    #[test]
    fn success_while_clean_is_noop() {
        let mut t = RpcHealthTracker::new("wss://x");
        assert_eq!(t.record_success(0), None);
    }
}
