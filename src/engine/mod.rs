/// Execution engine seam
///
/// The orchestrator submits one batch of staged records per pass; everything
/// about how notebooks actually run (parallelism, kernels, sandboxing) lives
/// behind this trait.
pub mod process;

pub use process::ProcessEngine;

use anyhow::{Context, Result};

use crate::cache::NotebookCache;
use crate::config::RunnerConfig;

/// Aggregate result of one batch
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs a batch of staged notebooks
///
/// Per-item success lands as a new cache record; per-item failure lands as a
/// traceback on the staged record, retrievable afterwards by path. An `Err`
/// from `run_batch` means the batch itself could not be processed, not that
/// an individual notebook failed.
pub trait ExecutionEngine {
    fn run_batch(&self, cache: &mut NotebookCache, pks: &[u64]) -> Result<BatchSummary>;
}

/// Resolve the configured runner into a [`ProcessEngine`]
///
/// A runner that cannot be found on PATH is the configuration-error case:
/// the caller logs it and continues the pass without an engine.
pub fn load_engine(runner: &RunnerConfig) -> Result<ProcessEngine> {
    let command = which::which(&runner.command).with_context(|| {
        format!(
            "execution runner '{}' not found; install it or point [runner] command at it",
            runner.command
        )
    })?;
    Ok(ProcessEngine::new(
        command,
        runner.args.clone(),
        runner.worker_count(),
    ))
}
