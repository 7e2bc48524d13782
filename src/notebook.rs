/// Notebook document model
///
/// Models the externally-defined notebook JSON format (ordered cells; code
/// cells carry zero-or-more output objects) and derives the content-addressed
/// identity key used to match a document to its execution records.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Mapping from MIME type to the corresponding representation of one value
pub type Mimebundle = BTreeMap<String, Value>;

/// A parsed notebook document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    #[serde(default)]
    pub nbformat_minor: u32,
}

fn default_nbformat() -> u32 {
    4
}

/// A single notebook cell, discriminated by `cell_type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Code {
        #[serde(default)]
        source: SourceText,
        #[serde(default)]
        outputs: Vec<Output>,
        #[serde(default)]
        execution_count: Option<u64>,
        #[serde(default)]
        metadata: Value,
    },
    Markdown {
        #[serde(default)]
        source: SourceText,
        #[serde(default)]
        metadata: Value,
    },
    Raw {
        #[serde(default)]
        source: SourceText,
        #[serde(default)]
        metadata: Value,
    },
}

/// Cell source, which the format encodes either as one string or as a list
/// of line strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceText {
    Text(String),
    Lines(Vec<String>),
}

impl SourceText {
    pub fn joined(&self) -> String {
        match self {
            SourceText::Text(text) => text.clone(),
            SourceText::Lines(lines) => lines.concat(),
        }
    }
}

impl Default for SourceText {
    fn default() -> Self {
        SourceText::Text(String::new())
    }
}

/// A single cell output, discriminated by `output_type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    ExecuteResult {
        #[serde(default)]
        data: Mimebundle,
        #[serde(default)]
        metadata: Value,
        #[serde(default)]
        execution_count: Option<u64>,
    },
    DisplayData {
        #[serde(default)]
        data: Mimebundle,
        #[serde(default)]
        metadata: Value,
    },
    Stream {
        name: String,
        #[serde(default)]
        text: SourceText,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    /// The mimebundle of this output, for the output kinds that carry one
    pub fn mimebundle(&self) -> Option<&Mimebundle> {
        match self {
            Output::ExecuteResult { data, .. } | Output::DisplayData { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Output-level metadata, for the output kinds that carry it
    pub fn output_metadata(&self) -> Option<&Value> {
        match self {
            Output::ExecuteResult { metadata, .. } | Output::DisplayData { metadata, .. } => {
                Some(metadata)
            }
            _ => None,
        }
    }
}

impl Notebook {
    /// Read and parse a notebook document from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read notebook: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse notebook: {}", path.display()))
    }

    /// Write the notebook back out as pretty-printed JSON
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize notebook")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write notebook: {}", path.display()))
    }

    /// Iterate over the output lists of the code cells, in document order
    pub fn code_outputs(&self) -> impl Iterator<Item = &Vec<Output>> {
        self.cells.iter().filter_map(|cell| match cell {
            Cell::Code { outputs, .. } => Some(outputs),
            _ => None,
        })
    }

    /// Mutable variant of [`code_outputs`](Self::code_outputs), used when
    /// merging cached outputs back into a parsed document
    pub fn code_outputs_mut(&mut self) -> Vec<&mut Vec<Output>> {
        self.cells
            .iter_mut()
            .filter_map(|cell| match cell {
                Cell::Code { outputs, .. } => Some(outputs),
                _ => None,
            })
            .collect()
    }

    /// True iff every code cell already carries at least one output
    ///
    /// Vacuously true for a document without code cells, so such documents
    /// take the direct-cache path rather than being staged.
    pub fn has_outputs(&self) -> bool {
        self.code_outputs().all(|outputs| !outputs.is_empty())
    }

    /// Content-derived identity key: `nb-` plus the first 16 hex characters
    /// of the SHA-256 over the code-cell sources.
    ///
    /// Derived from content, not path, so moving or renaming a file with
    /// identical code does not change its identity. Outputs are excluded so
    /// an executed copy keeps the identity of its source.
    pub fn content_key(&self) -> String {
        let mut hasher = Sha256::new();
        for cell in &self.cells {
            if let Cell::Code { source, .. } = cell {
                hasher.update(source.joined().as_bytes());
                hasher.update(b"\x00");
            }
        }
        let hash = hex::encode(hasher.finalize());
        format!("nb-{}", &hash[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notebook_from_json(value: Value) -> Notebook {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_source_accepts_string_and_lines() {
        let nb = notebook_from_json(json!({
            "cells": [
                {"cell_type": "code", "source": "x = 1\ny = 2", "outputs": []},
                {"cell_type": "code", "source": ["x = 1\n", "y = 2"], "outputs": []},
            ],
            "nbformat": 4,
            "nbformat_minor": 5
        }));

        let sources: Vec<String> = nb
            .cells
            .iter()
            .map(|cell| match cell {
                Cell::Code { source, .. } => source.joined(),
                _ => unreachable!(),
            })
            .collect();

        assert_eq!(sources[0], sources[1]);
    }

    #[test]
    fn test_has_outputs() {
        let populated = notebook_from_json(json!({
            "cells": [
                {"cell_type": "markdown", "source": "# title"},
                {"cell_type": "code", "source": "1 + 1", "outputs": [
                    {"output_type": "execute_result", "data": {"text/plain": "2"}, "execution_count": 1}
                ]},
            ]
        }));
        assert!(populated.has_outputs());

        let missing = notebook_from_json(json!({
            "cells": [
                {"cell_type": "code", "source": "1 + 1", "outputs": [
                    {"output_type": "execute_result", "data": {"text/plain": "2"}}
                ]},
                {"cell_type": "code", "source": "2 + 2", "outputs": []},
            ]
        }));
        assert!(!missing.has_outputs());
    }

    #[test]
    fn test_has_outputs_without_code_cells() {
        let prose_only = notebook_from_json(json!({
            "cells": [{"cell_type": "markdown", "source": "just prose"}]
        }));
        // No code cells means nothing to execute
        assert!(prose_only.has_outputs());
    }

    #[test]
    fn test_content_key_ignores_outputs_and_format() {
        let bare = notebook_from_json(json!({
            "cells": [{"cell_type": "code", "source": "print('hi')", "outputs": []}]
        }));
        let executed = notebook_from_json(json!({
            "cells": [{"cell_type": "code", "source": ["print('hi')"], "outputs": [
                {"output_type": "stream", "name": "stdout", "text": "hi\n"}
            ], "execution_count": 3}]
        }));

        assert_eq!(bare.content_key(), executed.content_key());
        assert!(bare.content_key().starts_with("nb-"));
    }

    #[test]
    fn test_content_key_changes_with_code() {
        let a = notebook_from_json(json!({
            "cells": [{"cell_type": "code", "source": "x = 1", "outputs": []}]
        }));
        let b = notebook_from_json(json!({
            "cells": [{"cell_type": "code", "source": "x = 2", "outputs": []}]
        }));
        assert_ne!(a.content_key(), b.content_key());
    }

    #[test]
    fn test_cell_boundaries_affect_identity() {
        let split = notebook_from_json(json!({
            "cells": [
                {"cell_type": "code", "source": "a", "outputs": []},
                {"cell_type": "code", "source": "b", "outputs": []},
            ]
        }));
        let joined = notebook_from_json(json!({
            "cells": [{"cell_type": "code", "source": "ab", "outputs": []}]
        }));
        assert_ne!(split.content_key(), joined.content_key());
    }
}
