#![cfg_attr(not(test), warn(unused_crate_dependencies))]

//! NotificationSink (C11): a fire-and-forget async fan-out to an external
//! webhook, plus a realtime topic bus for the dashboard/StatusSurface.
//!
//! Grounded on `alerting.rs`'s `AlertingClient`: a plain `reqwest::Client::post`
//! whose failures are logged and never retried or propagated. Generalized
//! here from PagerDuty's fixed alert schema to an arbitrary Slack-compatible
//! `{text, fields}` webhook payload, since these events carry varying
//! structured fields (§4.11).

use ethp_types::{BlockId, BlockMetaView};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error};

/// Structured events the pipeline can raise (§4.11).
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    InputGenerationFailed { block: BlockId, step: String, reason: String, meta: BlockMetaView },
    ProofGenerationFailed { block: BlockId, reason: String },
    ProofDataFailed { block: BlockId, reason: String },
    EthProofsRequestFailed { block: BlockId, step: String, reason: String },
    ProofSubmitted { block: BlockId },
    RpcDown { url: String, down_since_ms: i64, last_error: String },
    RpcRecovered { url: String, down_since_ms: i64, recovered_at_ms: i64 },
}

impl NotificationEvent {
    fn headline(&self) -> String {
        match self {
            NotificationEvent::InputGenerationFailed { block, .. } => {
                format!("Input generation failed for block {block}")
            }
            NotificationEvent::ProofGenerationFailed { block, .. } => {
                format!("Proving failed for block {block}")
            }
            NotificationEvent::ProofDataFailed { block, .. } => {
                format!("Proof artifacts unreadable for block {block}")
            }
            NotificationEvent::EthProofsRequestFailed { block, step, .. } => {
                format!("EthProofs `{step}` report failed for block {block}")
            }
            NotificationEvent::ProofSubmitted { block } => format!("Block {block} proved"),
            NotificationEvent::RpcDown { url, .. } => format!("RPC endpoint {url} is down"),
            NotificationEvent::RpcRecovered { url, .. } => format!("RPC endpoint {url} recovered"),
        }
    }

    fn fields(&self) -> serde_json::Value {
        match self {
            NotificationEvent::InputGenerationFailed { block, step, reason, meta } => json!({
                "block": block, "step": step, "reason": reason, "block_meta": meta.to_string(),
            }),
            NotificationEvent::ProofGenerationFailed { block, reason }
            | NotificationEvent::ProofDataFailed { block, reason } => {
                json!({ "block": block, "reason": reason })
            }
            NotificationEvent::EthProofsRequestFailed { block, step, reason } => {
                json!({ "block": block, "step": step, "reason": reason })
            }
            NotificationEvent::ProofSubmitted { block } => json!({ "block": block }),
            NotificationEvent::RpcDown { url, down_since_ms, last_error } => {
                json!({ "url": url, "down_since_ms": down_since_ms, "last_error": last_error })
            }
            NotificationEvent::RpcRecovered { url, down_since_ms, recovered_at_ms } => {
                json!({ "url": url, "down_since_ms": down_since_ms, "recovered_at_ms": recovered_at_ms })
            }
        }
    }
}

/// Realtime topics published by the ledgers and the Prover (§4.5, §4.6, §4.8).
#[derive(Debug, Clone)]
pub enum Topic {
    ProvedBlocksUpdated,
    MissedBlocksUpdated,
    ProverStatus { block: Option<BlockId>, status: String },
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    fields: serde_json::Value,
}

enum SinkCommand {
    Notify(NotificationEvent),
}

/// A cloneable handle to the running NotificationSink actor.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<SinkCommand>,
    topics: broadcast::Sender<Topic>,
}

impl NotificationSink {
    /// Spawns the actor. `webhook_url` is the `slack_webhook` config key
    /// (§6); when absent, events are logged and silently dropped.
    pub fn spawn(webhook_url: Option<String>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkCommand>();
        let (topics, _) = broadcast::channel(256);

        tokio::spawn(async move {
            let client = reqwest::Client::new();
            while let Some(SinkCommand::Notify(event)) = rx.recv().await {
                debug!(headline = %event.headline(), "notification event");

                let Some(url) = &webhook_url else { continue };

                let payload = WebhookPayload { text: &event.headline(), fields: event.fields() };
                if let Err(err) = client.post(url).json(&payload).send().await {
                    error!("Failed to deliver webhook notification: {err}");
                }
            }
        });

        Self { tx, topics }
    }

    /// Fire-and-forget; never blocks the caller.
    pub fn notify(&self, event: NotificationEvent) {
        let _ = self.tx.send(SinkCommand::Notify(event));
    }

    /// Best-effort topic broadcast; failures (no subscribers) are swallowed.
    pub fn publish(&self, topic: Topic) {
        let _ = self.topics.send(topic);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Topic> {
        self.topics.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drops_events_without_webhook() {
        let sink = NotificationSink::spawn(None);
        sink.notify(NotificationEvent::ProofSubmitted { block: 100 });
        // No panic, no webhook call; nothing else to assert without a mock server.
    }

    #[tokio::test]
    async fn publish_is_best_effort_with_no_subscribers() {
        let sink = NotificationSink::spawn(None);
        sink.publish(Topic::ProvedBlocksUpdated);
    }

    #[tokio::test]
    async fn subscriber_observes_published_topics() {
        let sink = NotificationSink::spawn(None);
        let mut rx = sink.subscribe();
        sink.publish(Topic::ProverStatus { block: Some(100), status: "proving".to_string() });
        let topic = rx.recv().await.unwrap();
        assert!(matches!(topic, Topic::ProverStatus { block: Some(100), .. }));
    }
}
