/// Execution cache storage
///
/// Persists one JSON record per executed notebook under the cache directory
/// and tracks the notebooks staged for execution during the current build
/// pass. Staged records are deliberately in-memory only: they exist for one
/// pass, while cache records survive across builds.
pub mod merge;
pub mod orchestrator;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::notebook::{Notebook, Output};

const RECORDS_DIR: &str = "records";

/// Immutable record of a previously executed notebook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub pk: u64,
    /// Source path at the time the record was written
    pub uri: PathBuf,
    /// Content-derived identity key, see [`Notebook::content_key`]
    pub hashkey: String,
    pub created: DateTime<Utc>,
    /// Outputs per code cell, in document order
    pub cell_outputs: Vec<Vec<Output>>,
}

/// A pending-execution request for one notebook path
#[derive(Debug, Clone)]
pub struct StagedRecord {
    pub pk: u64,
    pub uri: PathBuf,
    pub assigned: DateTime<Utc>,
    /// Failure traceback, set by the engine when execution fails
    pub traceback: Option<String>,
}

/// Typed cache failures; lookups signalling plain absence return `Option` or
/// an empty collection instead
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("notebook {uri} is already cached under identity {hashkey}")]
    AlreadyCached { uri: PathBuf, hashkey: String },

    #[error("no staged record with pk {0}")]
    UnknownStagedRecord(u64),
}

/// Cache statistics, for the CLI surface
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_records: usize,
    pub total_bytes: u64,
    pub cache_dir: PathBuf,
}

/// Record store plus per-pass staging state
pub struct NotebookCache {
    root: PathBuf,
    records_dir: PathBuf,
    staged: HashMap<PathBuf, StagedRecord>,
    next_pk: u64,
}

impl NotebookCache {
    /// Open (or create) the cache at `root`
    ///
    /// Scans existing records so newly allocated pks never collide with
    /// records written by earlier builds.
    pub fn open(root: &Path) -> Result<Self> {
        let records_dir = root.join(RECORDS_DIR);
        fs::create_dir_all(&records_dir).with_context(|| {
            format!("Failed to create cache directory: {}", records_dir.display())
        })?;

        let mut max_pk = 0;
        for entry in fs::read_dir(&records_dir).with_context(|| {
            format!("Failed to read cache directory: {}", records_dir.display())
        })? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if let Ok(pk) = stem.parse::<u64>() {
                    max_pk = max_pk.max(pk);
                }
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            records_dir,
            staged: HashMap::new(),
            next_pk: max_pk + 1,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn alloc_pk(&mut self) -> u64 {
        let pk = self.next_pk;
        self.next_pk += 1;
        pk
    }

    fn record_path(&self, pk: u64) -> PathBuf {
        self.records_dir.join(format!("{pk}.json"))
    }

    fn write_record(&self, record: &CacheRecord) -> Result<()> {
        let path = self.record_path(record.pk);
        let json =
            serde_json::to_string_pretty(record).context("Failed to serialize cache record")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write cache record: {}", path.display()))
    }

    /// Mark a notebook as a pending execution candidate
    ///
    /// Idempotent per path within a pass: staging the same document twice
    /// returns the record allocated the first time.
    pub fn stage_notebook(&mut self, path: &Path) -> StagedRecord {
        if let Some(existing) = self.staged.get(path) {
            return existing.clone();
        }
        let record = StagedRecord {
            pk: self.alloc_pk(),
            uri: path.to_path_buf(),
            assigned: Utc::now(),
            traceback: None,
        };
        debug!(pk = record.pk, uri = %path.display(), "staged notebook");
        self.staged.insert(path.to_path_buf(), record.clone());
        record
    }

    pub fn get_staged_record(&self, path: &Path) -> Option<&StagedRecord> {
        self.staged.get(path)
    }

    pub fn staged_uri(&self, pk: u64) -> Option<&Path> {
        self.staged
            .values()
            .find(|record| record.pk == pk)
            .map(|record| record.uri.as_path())
    }

    /// Attach a failure traceback to a staged record
    pub fn set_traceback(&mut self, pk: u64, traceback: String) -> Result<(), CacheError> {
        let record = self
            .staged
            .values_mut()
            .find(|record| record.pk == pk)
            .ok_or(CacheError::UnknownStagedRecord(pk))?;
        record.traceback = Some(traceback);
        Ok(())
    }

    /// Record the notebook at `path` as cached, using the outputs it already
    /// carries
    ///
    /// With `overwrite`, any prior record for the same identity is replaced,
    /// so the direct-cache path keeps at most one record per identity.
    /// Without it, an existing record for the identity is a
    /// [`CacheError::AlreadyCached`].
    pub fn cache_notebook(&mut self, path: &Path, overwrite: bool) -> Result<CacheRecord> {
        let notebook = Notebook::from_file(path)?;
        let hashkey = notebook.content_key();

        let existing = self.records_for_key(&hashkey)?;
        if !existing.is_empty() {
            if !overwrite {
                return Err(CacheError::AlreadyCached {
                    uri: path.to_path_buf(),
                    hashkey,
                }
                .into());
            }
            for record in &existing {
                let record_path = self.record_path(record.pk);
                fs::remove_file(&record_path).with_context(|| {
                    format!("Failed to remove cache record: {}", record_path.display())
                })?;
            }
        }

        self.insert_record(path, &notebook, hashkey)
    }

    /// Record an executed notebook produced by the engine
    ///
    /// Prior records for the identity are kept as re-execution history; the
    /// merge step picks the newest by creation time.
    pub fn cache_executed(&mut self, uri: &Path, executed: &Notebook) -> Result<CacheRecord> {
        let hashkey = executed.content_key();
        self.insert_record(uri, executed, hashkey)
    }

    fn insert_record(
        &mut self,
        uri: &Path,
        notebook: &Notebook,
        hashkey: String,
    ) -> Result<CacheRecord> {
        let record = CacheRecord {
            pk: self.alloc_pk(),
            uri: uri.to_path_buf(),
            hashkey,
            created: Utc::now(),
            cell_outputs: notebook.code_outputs().cloned().collect(),
        };
        self.write_record(&record)?;
        debug!(
            pk = record.pk,
            hashkey = %record.hashkey,
            uri = %uri.display(),
            "cache record written"
        );
        Ok(record)
    }

    /// All records matching the content key of the notebook at `path`
    ///
    /// An empty result is the normal "not yet executed" case, not an error.
    pub fn records_for_path(&self, path: &Path) -> Result<Vec<CacheRecord>> {
        let notebook = Notebook::from_file(path)?;
        self.records_for_key(&notebook.content_key())
    }

    /// All records with the given identity key
    pub fn records_for_key(&self, hashkey: &str) -> Result<Vec<CacheRecord>> {
        Ok(self
            .read_all_records()?
            .into_iter()
            .filter(|record| record.hashkey == hashkey)
            .collect())
    }

    pub fn get_record(&self, pk: u64) -> Result<Option<CacheRecord>> {
        let path = self.record_path(pk);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache record: {}", path.display()))?;
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse cache record: {}", path.display()))?;
        Ok(Some(record))
    }

    /// All records, sorted by pk
    pub fn list_records(&self) -> Result<Vec<CacheRecord>> {
        let mut records = self.read_all_records()?;
        records.sort_by_key(|record| record.pk);
        Ok(records)
    }

    fn read_all_records(&self) -> Result<Vec<CacheRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.records_dir).with_context(|| {
            format!("Failed to read cache directory: {}", self.records_dir.display())
        })? {
            let entry = entry?;
            if entry.path().extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let raw = fs::read_to_string(entry.path())?;
            match serde_json::from_str::<CacheRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(
                        path = %entry.path().display(),
                        error = %err,
                        "skipping unreadable cache record"
                    );
                }
            }
        }
        Ok(records)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut total_records = 0;
        let mut total_bytes = 0;
        for entry in fs::read_dir(&self.records_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total_records += 1;
                total_bytes += entry.metadata()?.len();
            }
        }
        Ok(CacheStats {
            total_records,
            total_bytes,
            cache_dir: self.root.clone(),
        })
    }

    /// Remove every record and all staging state
    pub fn clean_all(&mut self) -> Result<()> {
        if self.records_dir.exists() {
            fs::remove_dir_all(&self.records_dir).with_context(|| {
                format!(
                    "Failed to remove cache directory: {}",
                    self.records_dir.display()
                )
            })?;
        }
        fs::create_dir_all(&self.records_dir).with_context(|| {
            format!(
                "Failed to recreate cache directory: {}",
                self.records_dir.display()
            )
        })?;
        self.staged.clear();
        self.next_pk = 1;
        Ok(())
    }
}
