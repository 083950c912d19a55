//! The external, pure-function ZK input-building codec (§1, §6): out of
//! scope to implement, but the pipeline owns calling it. Modeled as a
//! generic trait bound rather than a trait object, mirroring
//! `ExecutionHooks`/`BlockExecutionStrategyFactory`'s generic-parameter
//! style in `full_executor.rs` (native `async fn` in a trait used only
//! behind a generic, never as `dyn`).

use std::path::{Path, PathBuf};

use ethp_types::BlockId;
use tokio::process::Command;

pub trait InputBuilder: Send + Sync + 'static {
    fn build_input(
        &self,
        block: BlockId,
        block_json: &[u8],
        witness: &[u8],
    ) -> impl std::future::Future<Output = Result<PathBuf, String>> + Send;

    /// If a previous run already produced `block`'s input (the `"<n>.bin"`
    /// marker from §9), return its path so the InputGenerator
    /// can hand it straight to the Prover instead of rebuilding it.
    fn existing_marker(&self, block: BlockId) -> Option<PathBuf> {
        let _ = block;
        None
    }
}

/// Production implementation: shells out to an external helper binary that
/// wraps the native input-building library, since the library itself is
/// explicitly out of scope (§1, §6). Writes the intermediate block/witness
/// JSON next to the eventual input artifact, under `cache_dir`.
#[derive(Debug, Clone)]
pub struct CliInputBuilder {
    executable: PathBuf,
    cache_dir: PathBuf,
}

impl CliInputBuilder {
    pub fn new(executable: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self { executable: executable.into(), cache_dir: cache_dir.into() }
    }

    /// The `"<n>.bin"` marker path the InputGenerator's poll consults
    /// (§9): this builder is the marker's writer.
    pub fn marker_path(cache_dir: &Path, block: BlockId) -> PathBuf {
        cache_dir.join(format!("{block}.bin"))
    }
}

impl InputBuilder for CliInputBuilder {
    async fn build_input(&self, block: BlockId, block_json: &[u8], witness: &[u8]) -> Result<PathBuf, String> {
        tokio::fs::create_dir_all(&self.cache_dir).await.map_err(|e| e.to_string())?;

        let block_json_path = self.cache_dir.join(format!("{block}.block.json"));
        let witness_path = self.cache_dir.join(format!("{block}.witness.json"));
        tokio::fs::write(&block_json_path, block_json).await.map_err(|e| e.to_string())?;
        tokio::fs::write(&witness_path, witness).await.map_err(|e| e.to_string())?;

        let output_path = Self::marker_path(&self.cache_dir, block);

        let output = Command::new(&self.executable)
            .arg(&block_json_path)
            .arg(&witness_path)
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| format!("failed to spawn input builder: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "input builder exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Ok(output_path)
    }

    fn existing_marker(&self, block: BlockId) -> Option<PathBuf> {
        let path = Self::marker_path(&self.cache_dir, block);
        path.exists().then_some(path)
    }
}
