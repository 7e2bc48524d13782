/// Glue store
///
/// A build-pass-scoped mapping from glue key to artifact, plus the docmap
/// recording which documents own which keys. The store is created fresh at
/// build start, mutated only through its own methods, and torn down by
/// snapshot export or discard.
pub mod extract;
pub mod paste;

pub use extract::GLUE_PREFIX;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::notebook::{Mimebundle, Notebook};

/// A keyed artifact: the mimebundle plus the document that emitted it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlueEntry {
    pub data: Mimebundle,
    /// Document that last emitted this key
    pub source: String,
}

#[derive(Debug, Error)]
pub enum GlueError {
    #[error("parallel builds are unsupported for the glue store; refusing to merge worker data for {docnames:?}")]
    ParallelMergeUnsupported { docnames: Vec<String> },
}

/// Key→artifact cache plus document→key-set ownership map
///
/// Ownership is multi-valued: several documents may own one key after a
/// collision (the stored value is the latest emission), and the key leaves
/// the cache only when its last owning document is cleared.
#[derive(Debug, Default)]
pub struct GlueStore {
    cache: BTreeMap<String, GlueEntry>,
    docmap: BTreeMap<String, BTreeSet<String>>,
}

impl GlueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract all glued values from `notebook` and register them under
    /// `docname`
    ///
    /// The docmap entry for `docname` is replaced, not extended: keys the
    /// document no longer emits lose this document as an owner.
    pub fn add_notebook(&mut self, notebook: &Notebook, docname: &str) {
        let existing: BTreeMap<String, String> = self
            .docmap
            .iter()
            .flat_map(|(doc, keys)| keys.iter().map(move |key| (key.clone(), doc.clone())))
            .collect();

        let entries = extract::find_glue_entries(notebook, &existing, docname);
        let new_keys: BTreeSet<String> = entries.keys().cloned().collect();
        debug!(doc = docname, keys = new_keys.len(), "glue keys registered");

        let old_keys = self
            .docmap
            .insert(docname.to_string(), new_keys.clone())
            .unwrap_or_default();
        for key in old_keys.difference(&new_keys) {
            if !self.owned_by_any(key) {
                self.cache.remove(key);
            }
        }

        self.cache.extend(entries);
    }

    /// Remove every trace of `docname`; a no-op when the document is unknown
    ///
    /// A key is dropped from the cache only if no other document still owns
    /// it, so a collision survivor keeps its (latest) value.
    pub fn clear_doc(&mut self, docname: &str) {
        let Some(keys) = self.docmap.remove(docname) else {
            return;
        };
        for key in keys {
            if !self.owned_by_any(&key) {
                self.cache.remove(&key);
            }
        }
    }

    fn owned_by_any(&self, key: &str) -> bool {
        self.docmap.values().any(|keys| keys.contains(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Borrowed view of the artifact under `key`
    pub fn get(&self, key: &str) -> Option<&GlueEntry> {
        self.cache.get(key)
    }

    /// Owned copy of the artifact under `key`, safe for the caller to mutate
    ///
    /// With `strip_prefix`, internal reservation prefixes are removed from
    /// the mimebundle keys before the entry is exposed.
    pub fn resolve(&self, key: &str, strip_prefix: bool) -> Option<GlueEntry> {
        let mut entry = self.cache.get(key)?.clone();
        if strip_prefix {
            entry.data = entry
                .data
                .into_iter()
                .map(|(mime, value)| match mime.strip_prefix(GLUE_PREFIX) {
                    Some(stripped) => (stripped.to_string(), value),
                    None => (mime, value),
                })
                .collect();
        }
        Some(entry)
    }

    /// The keys currently attributed to `docname`
    pub fn doc_keys(&self, docname: &str) -> Option<&BTreeSet<String>> {
        self.docmap.get(docname)
    }

    /// Write the snapshot JSON: document name → key → mimebundle
    ///
    /// Documents owning zero keys are omitted entirely.
    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot: BTreeMap<&String, BTreeMap<&String, &Mimebundle>> = self
            .docmap
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(doc, keys)| {
                let bundles = keys
                    .iter()
                    .filter_map(|key| self.cache.get(key).map(|entry| (key, &entry.data)))
                    .collect();
                (doc, bundles)
            })
            .collect();

        let file = fs::File::create(path)
            .with_context(|| format!("Failed to create glue snapshot: {}", path.display()))?;
        serde_json::to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write glue snapshot: {}", path.display()))
    }

    /// Merging store data produced by another build worker is unsupported
    /// and must fail loudly rather than lose keys silently.
    pub fn merge_from_parallel_worker(
        &mut self,
        docnames: &[String],
        _other: &GlueStore,
    ) -> Result<(), GlueError> {
        Err(GlueError::ParallelMergeUnsupported {
            docnames: docnames.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn glued_notebook(entries: &[(&str, &str)]) -> Notebook {
        let outputs: Vec<Value> = entries
            .iter()
            .map(|(key, value)| {
                json!({
                    "output_type": "display_data",
                    "data": {(format!("{GLUE_PREFIX}text/plain")): value},
                    "metadata": {"scrapbook": {"name": key}}
                })
            })
            .collect();
        serde_json::from_value(json!({
            "cells": [{"cell_type": "code", "source": "glue(...)", "outputs": outputs}]
        }))
        .unwrap()
    }

    #[test]
    fn test_clear_doc_removes_exactly_its_keys() {
        let mut store = GlueStore::new();
        store.add_notebook(&glued_notebook(&[("a", "1"), ("b", "2")]), "docA");
        store.add_notebook(&glued_notebook(&[("c", "3")]), "docB");

        store.clear_doc("docA");

        assert!(!store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
        assert!(store.doc_keys("docA").is_none());
    }

    #[test]
    fn test_clear_unknown_doc_is_a_no_op() {
        let mut store = GlueStore::new();
        store.add_notebook(&glued_notebook(&[("a", "1")]), "docA");
        store.clear_doc("never-seen");
        assert!(store.contains("a"));
    }

    #[test]
    fn test_add_notebook_ownership_is_idempotent() {
        let mut store = GlueStore::new();
        store.add_notebook(&glued_notebook(&[("a", "1"), ("b", "2")]), "docA");
        store.add_notebook(&glued_notebook(&[("b", "2"), ("c", "3")]), "docA");

        let keys = store.doc_keys("docA").unwrap();
        assert_eq!(
            keys.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
        // the key no longer emitted by its only owner is gone
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("c"));
    }

    #[test]
    fn test_collision_keeps_latest_value_and_both_owners() {
        let mut store = GlueStore::new();
        store.add_notebook(&glued_notebook(&[("x", "1")]), "docA");
        store.add_notebook(&glued_notebook(&[("x", "2")]), "docB");

        let entry = store.get("x").unwrap();
        assert_eq!(entry.data[&format!("{GLUE_PREFIX}text/plain")], json!("2"));
        assert_eq!(entry.source, "docB");

        // clearing the earlier emitter removes nothing: docB still owns x
        store.clear_doc("docA");
        assert!(store.contains("x"));

        // clearing the last owner finally drops the key
        store.clear_doc("docB");
        assert!(!store.contains("x"));
    }

    #[test]
    fn test_resolve_strips_reservation_prefix() {
        let mut store = GlueStore::new();
        store.add_notebook(&glued_notebook(&[("a", "1")]), "docA");

        let stripped = store.resolve("a", true).unwrap();
        assert_eq!(stripped.data["text/plain"], json!("1"));

        let raw = store.resolve("a", false).unwrap();
        assert!(raw.data.contains_key(&format!("{GLUE_PREFIX}text/plain")));

        assert!(store.resolve("missing", true).is_none());
    }

    #[test]
    fn test_snapshot_omits_empty_docs_and_matches_lookups() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut store = GlueStore::new();
        store.add_notebook(&glued_notebook(&[("a", "1"), ("b", "2")]), "docA");
        // docB contributes nothing
        store.add_notebook(&glued_notebook(&[]), "docB");

        let path = temp.path().join("glue_cache.json");
        store.write_snapshot(&path).unwrap();

        let snapshot: BTreeMap<String, BTreeMap<String, Mimebundle>> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["docA"]);
        for (key, bundle) in &snapshot["docA"] {
            assert_eq!(bundle, &store.get(key).unwrap().data);
        }
    }

    #[test]
    fn test_parallel_merge_always_fails() {
        let mut store = GlueStore::new();
        let other = GlueStore::new();

        let err = store
            .merge_from_parallel_worker(&["docA".to_string()], &other)
            .unwrap_err();
        assert!(matches!(err, GlueError::ParallelMergeUnsupported { .. }));

        // still fails with no docnames at all
        let err = store.merge_from_parallel_worker(&[], &other).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }
}
