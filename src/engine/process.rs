/// Subprocess execution engine
///
/// Fans a staged batch out over a bounded pool of worker threads. Each
/// worker invokes the runner as `command [args...] <input>` and reads the
/// executed notebook from its stdout; a non-zero exit, a spawn failure, or
/// unparseable output becomes the traceback on the staged record.
use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use tracing::{debug, info, warn};

use super::{BatchSummary, ExecutionEngine};
use crate::cache::{CacheError, NotebookCache};
use crate::notebook::Notebook;

#[derive(Debug)]
pub struct ProcessEngine {
    command: PathBuf,
    args: Vec<String>,
    workers: usize,
}

struct Job {
    pk: u64,
    uri: PathBuf,
}

enum JobResult {
    Executed {
        pk: u64,
        uri: PathBuf,
        notebook: Notebook,
    },
    Failed {
        pk: u64,
        uri: PathBuf,
        traceback: String,
    },
}

impl ProcessEngine {
    pub fn new(command: PathBuf, args: Vec<String>, workers: usize) -> Self {
        Self {
            command,
            args,
            workers: workers.max(1),
        }
    }

    fn run_one(&self, job: Job) -> JobResult {
        debug!(pk = job.pk, uri = %job.uri.display(), "running notebook");
        let output = match Command::new(&self.command)
            .args(&self.args)
            .arg(&job.uri)
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                return JobResult::Failed {
                    pk: job.pk,
                    uri: job.uri,
                    traceback: format!(
                        "failed to spawn runner {}: {}",
                        self.command.display(),
                        err
                    ),
                }
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let traceback = if stderr.trim().is_empty() {
                format!("runner exited with {}", output.status)
            } else {
                stderr.into_owned()
            };
            return JobResult::Failed {
                pk: job.pk,
                uri: job.uri,
                traceback,
            };
        }

        match serde_json::from_slice::<Notebook>(&output.stdout) {
            Ok(notebook) => JobResult::Executed {
                pk: job.pk,
                uri: job.uri,
                notebook,
            },
            Err(err) => JobResult::Failed {
                pk: job.pk,
                uri: job.uri,
                traceback: format!("runner produced unparseable notebook output: {err}"),
            },
        }
    }
}

impl ExecutionEngine for ProcessEngine {
    fn run_batch(&self, cache: &mut NotebookCache, pks: &[u64]) -> Result<BatchSummary> {
        let mut jobs = Vec::with_capacity(pks.len());
        for &pk in pks {
            let uri = cache
                .staged_uri(pk)
                .ok_or(CacheError::UnknownStagedRecord(pk))?
                .to_path_buf();
            jobs.push(Job { pk, uri });
        }
        if jobs.is_empty() {
            return Ok(BatchSummary::default());
        }

        let worker_count = self.workers.min(jobs.len());
        let (job_tx, job_rx) = bounded::<Job>(jobs.len());
        let (result_tx, result_rx) = bounded::<JobResult>(jobs.len());
        for job in jobs {
            job_tx
                .send(job)
                .map_err(|_| anyhow!("worker pool channel closed"))?;
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..worker_count {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        let result = self.run_one(job);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut summary = BatchSummary::default();
        while let Ok(result) = result_rx.try_recv() {
            match result {
                JobResult::Executed { pk, uri, notebook } => {
                    cache.cache_executed(&uri, &notebook)?;
                    info!(
                        service = "engine",
                        status = "success",
                        pk,
                        uri = %uri.display(),
                        "notebook executed and cached"
                    );
                    summary.succeeded += 1;
                }
                JobResult::Failed { pk, uri, traceback } => {
                    warn!(
                        service = "engine",
                        status = "error",
                        pk,
                        uri = %uri.display(),
                        "notebook execution failed"
                    );
                    cache.set_traceback(pk, traceback)?;
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_notebook(dir: &Path, name: &str) -> PathBuf {
        let value = json!({
            "cells": [
                {"cell_type": "code", "source": "1 + 1", "outputs": [
                    {"output_type": "execute_result", "data": {"text/plain": "2"}}
                ]}
            ]
        });
        let path = dir.join(name);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_batch_success_creates_cache_records() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();
        let doc = write_notebook(temp.path(), "a.ipynb");

        let staged = cache.stage_notebook(&doc);
        // `cat <input>` echoes the notebook back, standing in for a runner
        let engine = ProcessEngine::new(PathBuf::from("cat"), Vec::new(), 2);
        let summary = engine.run_batch(&mut cache, &[staged.pk]).unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(cache.records_for_path(&doc).unwrap().len(), 1);
        assert!(cache.get_staged_record(&doc).unwrap().traceback.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_batch_failure_sets_traceback() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();
        let doc = write_notebook(temp.path(), "a.ipynb");

        let staged = cache.stage_notebook(&doc);
        let engine = ProcessEngine::new(PathBuf::from("false"), Vec::new(), 1);
        let summary = engine.run_batch(&mut cache, &[staged.pk]).unwrap();

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 1);
        let traceback = cache
            .get_staged_record(&doc)
            .unwrap()
            .traceback
            .clone()
            .unwrap();
        assert!(traceback.contains("runner exited"));
        assert!(cache.records_for_path(&doc).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_unparseable_runner_output_is_a_failure() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();
        let garbage = temp.path().join("garbage.ipynb");
        fs::write(&garbage, "this is not json").unwrap();

        let staged = cache.stage_notebook(&garbage);
        let engine = ProcessEngine::new(PathBuf::from("cat"), Vec::new(), 1);
        let summary = engine.run_batch(&mut cache, &[staged.pk]).unwrap();

        assert_eq!(summary.failed, 1);
        let traceback = cache
            .get_staged_record(&garbage)
            .unwrap()
            .traceback
            .clone()
            .unwrap();
        assert!(traceback.contains("unparseable"));
    }

    #[test]
    fn test_unknown_pk_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();

        let engine = ProcessEngine::new(PathBuf::from("cat"), Vec::new(), 1);
        let err = engine.run_batch(&mut cache, &[42]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::UnknownStagedRecord(42))
        ));
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();

        let engine = ProcessEngine::new(PathBuf::from("cat"), Vec::new(), 4);
        let summary = engine.run_batch(&mut cache, &[]).unwrap();
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 0);
    }
}
