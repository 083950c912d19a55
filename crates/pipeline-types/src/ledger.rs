use serde::{Deserialize, Serialize};

use crate::BlockId;

/// Which stage a missed block failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedStage {
    InputGen,
    Proving,
    Unknown,
}

impl MissedStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissedStage::InputGen => "input_gen",
            MissedStage::Proving => "proving",
            MissedStage::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for MissedStage {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input_gen" => Ok(MissedStage::InputGen),
            "proving" => Ok(MissedStage::Proving),
            _ => Ok(MissedStage::Unknown),
        }
    }
}

/// A successful proof, as recorded by the [`ProvedLedger`](crate) contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvedRecord {
    pub block: BlockId,
    pub proved_at: i64,
    pub proving_seconds: Option<u32>,
    pub input_gen_seconds: Option<u32>,
}

/// A terminal failure, as recorded by the `MissedLedger` contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedRecord {
    pub block: BlockId,
    pub failed_at: i64,
    pub stage: MissedStage,
    pub reason: String,
}

impl MissedRecord {
    /// Defaults applied when the caller supplies sparse metadata (§4.6).
    pub fn with_defaults(block: BlockId, now: i64, stage: Option<MissedStage>, reason: Option<String>) -> Self {
        Self {
            block,
            failed_at: now,
            stage: stage.unwrap_or(MissedStage::Unknown),
            reason: reason.unwrap_or_else(|| "Unknown error".to_string()),
        }
    }
}
