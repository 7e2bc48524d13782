/// `nbcache build` command implementation
///
/// Drives one incremental build pass: discover documents, decide and run
/// executions, merge cached outputs back, collect glued artifacts, and
/// export the glue snapshot.
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use walkdir::{DirEntry, WalkDir};

use crate::cache::merge::{self, MergeSource};
use crate::cache::orchestrator::{self, EngineStatus, ExecutionOptions};
use crate::cache::NotebookCache;
use crate::cli::BuildArgs;
use crate::config::{NbcacheConfig, RunnerConfig};
use crate::engine::{self, ExecutionEngine};
use crate::glue::GlueStore;
use crate::notebook::Notebook;

/// Build settings after merging CLI args over the config file
/// (precedence: CLI > env (already handled by clap) > config file > defaults)
#[derive(Debug, Clone)]
struct MergedBuildConfig {
    execute: bool,
    cache_dir: Option<PathBuf>,
    force_run: bool,
    exclude_patterns: Vec<String>,
    runner: RunnerConfig,
}

impl MergedBuildConfig {
    fn merge(args: &BuildArgs, file: NbcacheConfig, source_dir: &Path) -> Self {
        let cache_dir = match &args.cache_dir {
            Some(path) => Some(path.clone()),
            None => file.execute.cache.resolve(source_dir),
        };

        let mut runner = file.runner;
        if let Some(command) = &args.runner {
            runner.command = command.clone();
        }

        Self {
            execute: file.execute.enabled,
            cache_dir,
            force_run: args.force || file.execute.force,
            exclude_patterns: if args.exclude.is_empty() {
                file.execute.exclude_patterns
            } else {
                args.exclude.clone()
            },
            runner,
        }
    }
}

pub fn run(args: &BuildArgs) -> Result<()> {
    anyhow::ensure!(
        args.source_dir.is_dir(),
        "source directory not found: {}",
        args.source_dir.display()
    );

    let file_config = NbcacheConfig::load_or_default(args.config.as_deref(), &args.source_dir)?;
    let config = MergedBuildConfig::merge(args, file_config, &args.source_dir);

    let documents = discover_notebooks(&args.source_dir, config.cache_dir.as_deref())?;
    println!("Found {} notebook document(s).", documents.len());

    let mut cache = match &config.cache_dir {
        Some(dir) => Some(NotebookCache::open(dir)?),
        None => None,
    };

    if config.execute {
        if let Some(cache) = cache.as_mut() {
            let engine = match engine::load_engine(&config.runner) {
                Ok(engine) => Some(engine),
                Err(err) => {
                    error!(error = %err, "failed to load execution engine");
                    None
                }
            };
            let opts = ExecutionOptions {
                force_run: config.force_run,
                exclude_patterns: config.exclude_patterns.clone(),
            };
            let outcome = orchestrator::decide_and_run(
                cache,
                &documents,
                &opts,
                engine.as_ref().map(|e| e as &dyn ExecutionEngine),
            )?;

            println!(
                "Staged {} for execution, cached {} directly, excluded {}.",
                outcome.staged.len(),
                outcome.cached_direct.len(),
                outcome.excluded.len()
            );
            match outcome.engine {
                EngineStatus::Completed(summary) => println!(
                    "Execution finished: {} succeeded, {} failed.",
                    summary.succeeded, summary.failed
                ),
                EngineStatus::NothingStaged => {}
                EngineStatus::Unavailable => {
                    println!("Execution engine unavailable; staged notebooks were not run.")
                }
            }
        }
    }

    // Merge cached outputs back, collect glue, write the merged documents
    let reports_dir = args.dest.join("reports");
    let mut glue = GlueStore::new();
    let mut unmerged = 0;

    for doc in &documents {
        let notebook = Notebook::from_file(doc)?;
        let merged = match cache.as_ref() {
            Some(cache) => {
                let report = merge::merge_outputs(cache, doc, notebook, &reports_dir)?;
                if let MergeSource::TracebackReported { report } = &report.source {
                    warn!(
                        uri = %doc.display(),
                        report = %report.display(),
                        "notebook outputs could not be produced"
                    );
                    unmerged += 1;
                }
                report.notebook
            }
            None => notebook,
        };

        let docname = docname_for(&args.source_dir, doc);
        glue.add_notebook(&merged, &docname);

        let dest_path = match doc.strip_prefix(&args.source_dir) {
            Ok(relative) => args.dest.join(relative),
            Err(_) => args.dest.join(doc.file_name().unwrap_or_default()),
        };
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
        merged.write_file(&dest_path)?;
    }

    let snapshot_path = args.dest.join("glue_cache.json");
    glue.write_snapshot(&snapshot_path)?;
    println!("Glue snapshot written to {}.", snapshot_path.display());

    if unmerged > 0 {
        println!(
            "{unmerged} notebook(s) have no outputs; see {} for tracebacks.",
            reports_dir.display()
        );
    }
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

fn discover_notebooks(source_dir: &Path, cache_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut documents = Vec::new();
    let walker = WalkDir::new(source_dir)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry) && Some(entry.path()) != cache_dir);

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .map_or(false, |ext| ext == "ipynb")
        {
            documents.push(entry.into_path());
        }
    }
    documents.sort();
    Ok(documents)
}

/// Document name: source-relative path without the extension
fn docname_for(source_dir: &Path, doc: &Path) -> String {
    doc.strip_prefix(source_dir)
        .unwrap_or(doc)
        .with_extension("")
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_skips_hidden_and_cache_dirs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("chapter")).unwrap();
        fs::create_dir_all(temp.path().join(".nbcache")).unwrap();
        fs::write(temp.path().join("a.ipynb"), "{}").unwrap();
        fs::write(temp.path().join("chapter/b.ipynb"), "{}").unwrap();
        fs::write(temp.path().join("notes.md"), "").unwrap();
        fs::write(temp.path().join(".nbcache/stale.ipynb"), "{}").unwrap();

        let docs = discover_notebooks(temp.path(), Some(&temp.path().join(".nbcache"))).unwrap();
        let names: Vec<String> = docs
            .iter()
            .map(|d| docname_for(temp.path(), d))
            .collect();
        assert_eq!(names, vec!["a", "chapter/b"]);
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let temp = TempDir::new().unwrap();
        let args = BuildArgs {
            source_dir: temp.path().to_path_buf(),
            dest: temp.path().join("_build"),
            config: None,
            cache_dir: Some(temp.path().join("custom-cache")),
            force: true,
            exclude: vec!["skip-me".to_string()],
            runner: Some("papermill".to_string()),
        };
        let file = NbcacheConfig::default();

        let merged = MergedBuildConfig::merge(&args, file, temp.path());
        assert_eq!(merged.cache_dir, Some(temp.path().join("custom-cache")));
        assert!(merged.force_run);
        assert_eq!(merged.exclude_patterns, vec!["skip-me"]);
        assert_eq!(merged.runner.command, "papermill");
    }
}
