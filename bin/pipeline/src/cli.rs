use std::path::PathBuf;

use clap::Parser;
use ethp_core::{SupervisorConfig, DEFAULT_PROVER_STUCK_THRESHOLD_SECONDS};
use url::Url;

/// The arguments for the cli.
#[derive(Debug, Clone, Parser)]
pub struct Args {
    /// The Ethereum JSON-RPC endpoint to poll for new blocks and fetch block
    /// data/witnesses from.
    #[clap(long, env)]
    pub eth_rpc_url: Url,

    /// The SQLite connection string backing the proved/missed ledgers, e.g.
    /// `sqlite://./data/pipeline.sqlite3`.
    #[clap(long, env)]
    pub database_url: String,

    /// Path to the zkVM ELF binary `cargo-zisk prove` executes.
    #[clap(long, env)]
    pub elf_path: PathBuf,

    /// Path to the `cargo-zisk` binary.
    #[clap(long, env, default_value = "cargo-zisk")]
    pub cargo_zisk_path: PathBuf,

    /// Directory under which per-block prover output (`result.json`, proof
    /// binaries) is written.
    #[clap(long, env, default_value = "output")]
    pub output_dir: PathBuf,

    /// Path to the external input-building helper executable.
    #[clap(long, env)]
    pub input_builder_executable: PathBuf,

    /// Directory the input builder uses to cache intermediate block/witness
    /// JSON and the built input artifact.
    #[clap(long, env, default_value = "cache")]
    pub input_cache_dir: PathBuf,

    /// Run in development mode: `cargo-zisk execute` replaces `prove`, and
    /// EthProofs API calls are skipped rather than sent.
    #[clap(long, env)]
    pub dev: bool,

    /// EthProofs submission API endpoint.
    #[clap(long, env)]
    pub ethproofs_rpc_url: String,

    /// EthProofs API bearer token.
    #[clap(long, env)]
    pub ethproofs_api_key: String,

    /// EthProofs cluster ID this pipeline reports under. Required unless
    /// `--dev` is set (§6) — left optional here so a missing value is
    /// caught by `as_config`'s validation pass rather than silently
    /// defaulted.
    #[clap(long, env)]
    pub ethproofs_cluster_id: Option<u64>,

    /// Slack-compatible webhook URL for operational notifications.
    #[clap(long, env)]
    pub slack_webhook: Option<String>,

    /// Port the StatusSurface's health endpoints listen on.
    #[clap(long, env, default_value_t = 4000)]
    pub health_port: u16,

    /// Seconds a single block may occupy the Prover before `/health` reports
    /// it unhealthy.
    #[clap(long, env, default_value_t = DEFAULT_PROVER_STUCK_THRESHOLD_SECONDS)]
    pub prover_stuck_threshold_seconds: u64,
}

impl Args {
    /// Validates conditionally-required configuration and converts into a
    /// [`SupervisorConfig`]. All missing keys are collected into a single
    /// error rather than failing on the first one, so a misconfigured
    /// deployment can be fixed in one pass (§6).
    pub fn as_config(&self) -> eyre::Result<SupervisorConfig> {
        let mut missing = Vec::new();

        if !self.dev {
            if self.ethproofs_rpc_url.trim().is_empty() {
                missing.push("--ethproofs-rpc-url");
            }
            if self.ethproofs_api_key.trim().is_empty() {
                missing.push("--ethproofs-api-key");
            }
            if self.ethproofs_cluster_id.is_none() {
                missing.push("--ethproofs-cluster-id");
            }
        }

        if !missing.is_empty() {
            eyre::bail!("missing required configuration: {}", missing.join(", "));
        }

        Ok(SupervisorConfig {
            eth_rpc_url: self.eth_rpc_url.clone(),
            database_url: self.database_url.clone(),
            elf_path: self.elf_path.clone(),
            cargo_zisk_path: self.cargo_zisk_path.clone(),
            output_dir: self.output_dir.clone(),
            dev: self.dev,
            input_builder_executable: self.input_builder_executable.clone(),
            input_cache_dir: self.input_cache_dir.clone(),
            ethproofs_rpc_url: self.ethproofs_rpc_url.clone(),
            ethproofs_api_key: self.ethproofs_api_key.clone(),
            ethproofs_cluster_id: self.ethproofs_cluster_id.unwrap_or_default(),
            slack_webhook: self.slack_webhook.clone(),
            health_port: self.health_port,
            prover_stuck_threshold_seconds: self.prover_stuck_threshold_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            eth_rpc_url: Url::parse("https://example.invalid").unwrap(),
            database_url: "sqlite::memory:".to_string(),
            elf_path: PathBuf::from("guest.elf"),
            cargo_zisk_path: PathBuf::from("cargo-zisk"),
            output_dir: PathBuf::from("output"),
            input_builder_executable: PathBuf::from("build-input"),
            input_cache_dir: PathBuf::from("cache"),
            dev: false,
            ethproofs_rpc_url: String::new(),
            ethproofs_api_key: String::new(),
            ethproofs_cluster_id: None,
            slack_webhook: None,
            health_port: 4000,
            prover_stuck_threshold_seconds: 3600,
        }
    }

    #[test]
    fn dev_mode_does_not_require_ethproofs_keys() {
        let args = Args { dev: true, ..base_args() };
        assert!(args.as_config().is_ok());
    }

    #[test]
    fn missing_ethproofs_keys_lists_all_of_them() {
        let args = base_args();
        let err = args.as_config().unwrap_err().to_string();
        assert!(err.contains("--ethproofs-rpc-url"));
        assert!(err.contains("--ethproofs-api-key"));
        assert!(err.contains("--ethproofs-cluster-id"));
    }

    #[test]
    fn fully_configured_non_dev_succeeds() {
        let args = Args {
            ethproofs_rpc_url: "https://ethproofs.example".to_string(),
            ethproofs_api_key: "secret".to_string(),
            ethproofs_cluster_id: Some(7),
            ..base_args()
        };
        let config = args.as_config().unwrap();
        assert_eq!(config.ethproofs_cluster_id, 7);
    }
}
