/// Glue-key extraction
///
/// Glued values travel inside notebook outputs as scrapbook-named
/// mimebundles whose MIME keys carry an internal reservation prefix. This
/// module scans a notebook's code-cell outputs and collects those entries.
use std::collections::BTreeMap;
use tracing::warn;

use super::GlueEntry;
use crate::notebook::Notebook;

/// Reservation prefix on the MIME keys of glued mimebundles
pub const GLUE_PREFIX: &str = "application/papermill.record/";

/// Collect every glued entry from `notebook`'s outputs
///
/// `existing` maps already-known keys to their owning document and is only
/// consulted to warn about cross-document collisions; the returned map still
/// contains the colliding entry, because the later emission wins.
pub fn find_glue_entries(
    notebook: &Notebook,
    existing: &BTreeMap<String, String>,
    docname: &str,
) -> BTreeMap<String, GlueEntry> {
    let mut entries = BTreeMap::new();

    for outputs in notebook.code_outputs() {
        for output in outputs {
            let Some(data) = output.mimebundle() else {
                continue;
            };
            let Some(key) = output
                .output_metadata()
                .and_then(|meta| meta.get("scrapbook"))
                .and_then(|scrapbook| scrapbook.get("name"))
                .and_then(|name| name.as_str())
            else {
                continue;
            };

            if let Some(prior_doc) = existing.get(key).filter(|doc| doc.as_str() != docname) {
                warn!(
                    key,
                    prior_doc = prior_doc.as_str(),
                    doc = docname,
                    "glue key already registered by another document; later value replaces it"
                );
            }

            entries.insert(
                key.to_string(),
                GlueEntry {
                    data: data.clone(),
                    source: docname.to_string(),
                },
            );
        }
    }

    entries
}
