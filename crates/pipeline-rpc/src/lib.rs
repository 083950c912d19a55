#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod client;
mod health;

pub use client::{parse_block_meta, BlockParam, EthRpcClient, RpcError};
pub use health::{HealthEvent, RpcHealthHandle, RpcHealthTracker, DOWN_THRESHOLD_MS};
