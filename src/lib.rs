// Library interface for nbcache
// This allows integration tests and embedding build drivers to use nbcache's modules

pub mod cache;
pub mod config;
pub mod engine;
pub mod glue;
pub mod logging;
pub mod notebook;

// Re-export commonly used types
pub use cache::{CacheRecord, NotebookCache, StagedRecord};
pub use glue::{GlueEntry, GlueStore};
pub use notebook::Notebook;
