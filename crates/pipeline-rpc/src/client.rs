//! EthRpcClient (C3): a typed wrapper over the subset of Ethereum JSON-RPC
//! this pipeline needs. Modeled on `rsp-provider`'s JSON-RPC client, with the
//! retry layer swapped from `alloy-transport`'s `RetryBackoffLayer` to the
//! `reqwest-middleware` + `reqwest-retry` stack `bin/eth-proofs` already uses
//! for its own outbound HTTP client, so both of this pipeline's HTTP clients
//! share one retry idiom.

use std::time::Duration;

use rand::Rng;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::health::RpcHealthHandle;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("JSON-RPC error: {0}")]
    JsonRpcError(Value),
    #[error("bad response: {0}")]
    BadResponse(String),
}

/// A normalized block-number parameter (§4.3).
#[derive(Debug, Clone, Copy)]
pub enum BlockParam {
    Number(u64),
    Latest,
    Pending,
    Earliest,
    Safe,
    Finalized,
}

impl BlockParam {
    fn to_param(self) -> String {
        match self {
            BlockParam::Number(n) => format!("0x{n:x}"),
            BlockParam::Latest => "latest".to_string(),
            BlockParam::Pending => "pending".to_string(),
            BlockParam::Earliest => "earliest".to_string(),
            BlockParam::Safe => "safe".to_string(),
            BlockParam::Finalized => "finalized".to_string(),
        }
    }
}

impl From<u64> for BlockParam {
    fn from(n: u64) -> Self {
        BlockParam::Number(n)
    }
}

#[derive(Debug, Clone)]
pub struct EthRpcClient {
    url: Url,
    client: ClientWithMiddleware,
    health: RpcHealthHandle,
}

impl EthRpcClient {
    pub fn new(url: Url, health: RpcHealthHandle) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().expect("reqwest client");
        let client = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { url, client, health }
    }

    /// `eth_getBlockByNumber("latest", false)` → `(block_number, unix_seconds)`.
    pub async fn latest_block_info(&self) -> Result<(u64, i64), RpcError> {
        let result = self
            .call("eth_getBlockByNumber", json!([BlockParam::Latest.to_param(), false]))
            .await?;

        let number = parse_hex_u64(&result, "number")?;
        let timestamp = parse_hex_u64(&result, "timestamp")? as i64;

        Ok((number, timestamp))
    }

    /// `eth_getBlockByNumber(block, true)`, re-encoded as raw JSON bytes for
    /// the (external) input builder.
    pub async fn block_json(&self, block: BlockParam) -> Result<Vec<u8>, RpcError> {
        let result = self.call("eth_getBlockByNumber", json!([block.to_param(), true])).await?;
        serde_json::to_vec(&result).map_err(|e| RpcError::BadResponse(e.to_string()))
    }

    /// `debug_executionWitness(block)`, re-encoded as raw JSON bytes.
    pub async fn execution_witness(&self, block: BlockParam) -> Result<Vec<u8>, RpcError> {
        let result = self.call("debug_executionWitness", json!([block.to_param()])).await?;
        serde_json::to_vec(&result).map_err(|e| RpcError::BadResponse(e.to_string()))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id: u64 = rand::thread_rng().gen_range(1..9_999_999);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let now_ms = now_ms();

        let outcome = self.send(body).await;

        match &outcome {
            Ok(_) => self.health.record_success(now_ms),
            Err(RpcError::JsonRpcError(_)) => self.health.record_success(now_ms),
            Err(err) => self.health.record_failure(now_ms, err.to_string()),
        }

        outcome
    }

    async fn send(&self, body: Value) -> Result<Value, RpcError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.to_string().to_lowercase().contains("timed out") {
                    RpcError::Timeout
                } else {
                    RpcError::Transport(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(RpcError::Transport(format!("HTTP {}", response.status())));
        }

        let envelope: Value = response
            .error_for_status()
            .map_err(|e| RpcError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| RpcError::BadResponse(e.to_string()))?;

        if let Some(error) = envelope.get("error") {
            return Err(RpcError::JsonRpcError(error.clone()));
        }

        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::BadResponse("missing `result` field".to_string()))
    }
}

fn parse_hex_u64(value: &Value, field: &str) -> Result<u64, RpcError> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::BadResponse(format!("missing `{field}` field")))?;

    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::BadResponse(format!("invalid `{field}` hex: {e}")))
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Parses `gasUsed` and `transactions.len()` out of a raw block JSON body,
/// for [`ethp_types::BlockMeta`] (§4.1, §4.7 step 2).
pub fn parse_block_meta(block_json: &[u8]) -> Result<ethp_types::BlockMeta, RpcError> {
    #[derive(Deserialize)]
    struct RawBlock {
        #[serde(rename = "gasUsed")]
        gas_used: String,
        transactions: Vec<Value>,
    }

    let raw: RawBlock =
        serde_json::from_slice(block_json).map_err(|e| RpcError::BadResponse(e.to_string()))?;

    let gas_used = u64::from_str_radix(raw.gas_used.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::BadResponse(e.to_string()))?;

    Ok(ethp_types::BlockMeta { gas_used, tx_count: raw.transactions.len() as u32 })
}
