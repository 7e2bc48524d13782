/// Execution decision logic for one incremental build pass
///
/// For every added or changed document this module decides between three
/// actions: leave untouched (exclusion pattern), record directly as cached
/// (outputs already present and no rerun requested), or stage for execution.
/// All staged documents are then submitted to the execution engine as one
/// batch.
use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, error, info};

use crate::cache::NotebookCache;
use crate::engine::{BatchSummary, ExecutionEngine};
use crate::notebook::Notebook;

/// Per-pass execution settings
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Re-execute even when a document already carries outputs
    pub force_run: bool,
    /// Path substrings; a matching document is neither staged nor cached
    pub exclude_patterns: Vec<String>,
}

/// What happened to the staged batch
#[derive(Debug)]
pub enum EngineStatus {
    /// The engine ran the batch
    Completed(BatchSummary),
    /// Nothing was staged, so the engine was never invoked
    NothingStaged,
    /// The engine could not be loaded; staged decisions remain in effect
    Unavailable,
}

/// Outcome of one `decide_and_run` pass
#[derive(Debug)]
pub struct PassOutcome {
    pub staged: Vec<u64>,
    pub cached_direct: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
    pub engine: EngineStatus,
}

/// Decide per document, then run the staged batch through the engine
///
/// `engine` is `None` when the execution engine could not be loaded. That is
/// a non-fatal configuration error: it is logged, the outcome reports
/// [`EngineStatus::Unavailable`], and the staging and direct-cache decisions
/// already applied stay in effect.
pub fn decide_and_run(
    cache: &mut NotebookCache,
    documents: &[PathBuf],
    opts: &ExecutionOptions,
    engine: Option<&dyn ExecutionEngine>,
) -> Result<PassOutcome> {
    let mut staged = Vec::new();
    let mut cached_direct = Vec::new();
    let mut excluded = Vec::new();

    for doc in documents {
        let doc_str = doc.to_string_lossy();
        if opts
            .exclude_patterns
            .iter()
            .any(|pattern| doc_str.contains(pattern.as_str()))
        {
            debug!(uri = %doc.display(), "document matches an exclusion pattern");
            excluded.push(doc.clone());
            continue;
        }

        let notebook = Notebook::from_file(doc)?;

        if opts.force_run || !notebook.has_outputs() {
            let record = cache.stage_notebook(doc);
            staged.push(record.pk);
        } else {
            cache.cache_notebook(doc, true)?;
            info!(
                uri = %doc.display(),
                "notebook carries pre-populated outputs, caching directly without execution"
            );
            cached_direct.push(doc.clone());
        }
    }

    // An empty batch means "run nothing": the engine is only ever invoked
    // with an explicit, non-empty set of staged records.
    if staged.is_empty() {
        return Ok(PassOutcome {
            staged,
            cached_direct,
            excluded,
            engine: EngineStatus::NothingStaged,
        });
    }

    let engine_status = match engine {
        Some(engine) => {
            let summary = engine.run_batch(cache, &staged)?;
            info!(
                staged = staged.len(),
                succeeded = summary.succeeded,
                failed = summary.failed,
                "batch execution finished"
            );
            EngineStatus::Completed(summary)
        }
        None => {
            error!(
                staged = staged.len(),
                "execution engine unavailable; staged notebooks will not run"
            );
            EngineStatus::Unavailable
        }
    };

    Ok(PassOutcome {
        staged,
        cached_direct,
        excluded,
        engine: engine_status,
    })
}
