use std::fmt;

use serde::{Deserialize, Serialize};

/// `{gas_used, tx_count}` derived from a fetched block, cached for the
/// lifetime of the process so later notifications can describe a block
/// without re-fetching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub gas_used: u64,
    pub tx_count: u32,
}

/// A [`BlockMeta`] lookup result. Formats as `"unknown"` on a cache miss so
/// callers building log lines and webhook fields never need a branch.
#[derive(Debug, Clone, Copy)]
pub enum BlockMetaView {
    Known(BlockMeta),
    Unknown,
}

impl fmt::Display for BlockMetaView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockMetaView::Known(meta) => {
                write!(f, "gas_used={} tx_count={}", meta.gas_used, meta.tx_count)
            }
            BlockMetaView::Unknown => write!(f, "unknown"),
        }
    }
}

/// What the prover produced for a single block, read back off disk after a
/// clean subprocess exit.
#[derive(Debug, Clone)]
pub struct ProofArtifact {
    pub cycles: u64,
    pub time_ms: u64,
    pub proof_b64: String,
    pub verifier_id: String,
}
