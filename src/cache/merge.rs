/// Output merge and traceback reporting
///
/// Pulls cached outputs back into a parsed notebook, or, when execution
/// failed, persists the traceback as a report file beside the build output.
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cache::NotebookCache;
use crate::notebook::Notebook;

/// Where the merged outputs came from
#[derive(Debug)]
pub enum MergeSource {
    /// Outputs merged from the cache record with this pk
    Cache { pk: u64 },
    /// No cache record, but a failed execution left a traceback; it was
    /// written to `report`
    TracebackReported { report: PathBuf },
    /// Neither a record nor a traceback; the notebook is unchanged
    Unmodified,
}

#[derive(Debug)]
pub struct MergeReport {
    pub notebook: Notebook,
    pub source: MergeSource,
}

/// Merge cached outputs into `notebook`, parsed from `path`
///
/// Absence at every lookup is the normal first-build case and falls through
/// to the next strategy; nothing here treats "not found" as an error. When a
/// staged record carries a traceback, it is persisted as
/// `<reports_dir>/<basename>.log` as a durable pointer at the root cause.
pub fn merge_outputs(
    cache: &NotebookCache,
    path: &Path,
    mut notebook: Notebook,
    reports_dir: &Path,
) -> Result<MergeReport> {
    let records = cache.records_for_key(&notebook.content_key())?;

    // Several records can exist for one identity (re-execution history);
    // the newest one is the current record.
    if let Some(record) = records.into_iter().max_by_key(|record| record.created) {
        let slots = notebook.code_outputs_mut();
        if slots.len() != record.cell_outputs.len() {
            warn!(
                uri = %path.display(),
                document_cells = slots.len(),
                record_cells = record.cell_outputs.len(),
                "cached record does not line up with the document's code cells"
            );
        }
        for (slot, outputs) in slots.into_iter().zip(record.cell_outputs.iter()) {
            *slot = outputs.clone();
        }
        debug!(uri = %path.display(), pk = record.pk, "merged cached outputs");
        return Ok(MergeReport {
            notebook,
            source: MergeSource::Cache { pk: record.pk },
        });
    }

    if let Some(staged) = cache.get_staged_record(path) {
        if let Some(traceback) = staged.traceback.as_deref().filter(|t| !t.is_empty()) {
            fs::create_dir_all(reports_dir).with_context(|| {
                format!("Failed to create reports directory: {}", reports_dir.display())
            })?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "notebook".to_string());
            let report = reports_dir.join(format!("{stem}.log"));
            fs::write(&report, traceback).with_context(|| {
                format!("Failed to write traceback report: {}", report.display())
            })?;
            info!(
                uri = %path.display(),
                report = %report.display(),
                "execution traceback saved"
            );
            return Ok(MergeReport {
                notebook,
                source: MergeSource::TracebackReported { report },
            });
        }
    }

    Ok(MergeReport {
        notebook,
        source: MergeSource::Unmodified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRecord;
    use crate::notebook::Output;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn three_cell_notebook() -> Notebook {
        serde_json::from_value(json!({
            "cells": [
                {"cell_type": "markdown", "source": "# intro"},
                {"cell_type": "code", "source": "a = 1", "outputs": []},
                {"cell_type": "code", "source": "b = 2", "outputs": []},
                {"cell_type": "code", "source": "a + b", "outputs": []},
            ]
        }))
        .unwrap()
    }

    fn result_output(text: &str) -> Output {
        serde_json::from_value(json!({
            "output_type": "execute_result",
            "data": {"text/plain": text}
        }))
        .unwrap()
    }

    fn record_for(
        cache: &mut NotebookCache,
        notebook: &Notebook,
        created_offset_secs: i64,
        outputs: Vec<Vec<Output>>,
    ) -> CacheRecord {
        let record = CacheRecord {
            pk: cache.alloc_pk(),
            uri: PathBuf::from("a.ipynb"),
            hashkey: notebook.content_key(),
            created: Utc::now() + Duration::seconds(created_offset_secs),
            cell_outputs: outputs,
        };
        cache.write_record(&record).unwrap();
        record
    }

    #[test]
    fn test_merge_fills_every_code_cell() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();
        let notebook = three_cell_notebook();

        record_for(
            &mut cache,
            &notebook,
            0,
            vec![
                vec![result_output("1")],
                vec![result_output("2")],
                vec![result_output("3")],
            ],
        );

        let report = merge_outputs(
            &cache,
            Path::new("a.ipynb"),
            notebook,
            &temp.path().join("reports"),
        )
        .unwrap();

        assert!(matches!(report.source, MergeSource::Cache { .. }));
        let merged: Vec<usize> = report.notebook.code_outputs().map(|o| o.len()).collect();
        assert_eq!(merged, vec![1, 1, 1]);
        // no traceback report written
        assert!(!temp.path().join("reports").exists());
    }

    #[test]
    fn test_merge_selects_newest_record() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();
        let notebook = three_cell_notebook();

        let older = record_for(
            &mut cache,
            &notebook,
            -3600,
            vec![
                vec![result_output("old")],
                vec![result_output("old")],
                vec![result_output("old")],
            ],
        );
        let newer = record_for(
            &mut cache,
            &notebook,
            0,
            vec![
                vec![result_output("new")],
                vec![result_output("new")],
                vec![result_output("new")],
            ],
        );
        assert!(older.created < newer.created);

        let report = merge_outputs(
            &cache,
            Path::new("a.ipynb"),
            notebook,
            &temp.path().join("reports"),
        )
        .unwrap();

        match report.source {
            MergeSource::Cache { pk } => assert_eq!(pk, newer.pk),
            other => panic!("expected cache merge, got {:?}", other),
        }
        let first = report.notebook.code_outputs().next().unwrap();
        let data = first[0].mimebundle().unwrap();
        assert_eq!(data["text/plain"], json!("new"));
    }

    #[test]
    fn test_traceback_written_as_report_file() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();
        let doc = temp.path().join("broken.ipynb");

        let staged = cache.stage_notebook(&doc);
        cache
            .set_traceback(staged.pk, "ZeroDivisionError: division by zero".to_string())
            .unwrap();

        let reports_dir = temp.path().join("reports");
        let report = merge_outputs(&cache, &doc, three_cell_notebook(), &reports_dir).unwrap();

        match report.source {
            MergeSource::TracebackReported { report } => {
                assert_eq!(report, reports_dir.join("broken.log"));
                let contents = fs::read_to_string(&report).unwrap();
                assert!(contents.contains("ZeroDivisionError"));
            }
            other => panic!("expected traceback report, got {:?}", other),
        }
    }

    #[test]
    fn test_no_record_no_traceback_returns_unmodified() {
        let temp = TempDir::new().unwrap();
        let cache = NotebookCache::open(&temp.path().join("cache")).unwrap();

        let report = merge_outputs(
            &cache,
            Path::new("a.ipynb"),
            three_cell_notebook(),
            &temp.path().join("reports"),
        )
        .unwrap();

        assert!(matches!(report.source, MergeSource::Unmodified));
        assert!(report.notebook.code_outputs().all(|o| o.is_empty()));
    }

    #[test]
    fn test_staged_without_traceback_is_unmodified() {
        let temp = TempDir::new().unwrap();
        let mut cache = NotebookCache::open(&temp.path().join("cache")).unwrap();
        let doc = temp.path().join("pending.ipynb");
        cache.stage_notebook(&doc);

        let report = merge_outputs(
            &cache,
            &doc,
            three_cell_notebook(),
            &temp.path().join("reports"),
        )
        .unwrap();

        assert!(matches!(report.source, MergeSource::Unmodified));
    }
}
