use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// nbcache - Execution cache and glue store for notebook builds
///
/// nbcache decides which notebook documents need re-execution, runs only
/// those through the configured runner, caches the results, and maintains
/// the store of glued artifacts referenced elsewhere in the documents.
#[derive(Parser, Debug)]
#[command(name = "nbcache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Execution cache and glue store for notebook builds", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one incremental build pass over a source tree
    Build(BuildArgs),

    /// Manage cached execution records
    Cache(CacheArgs),
}

#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Source directory containing notebook documents
    pub source_dir: PathBuf,

    /// Destination for merged notebooks, reports and the glue snapshot
    #[arg(long, default_value = "_build")]
    pub dest: PathBuf,

    /// Config file path
    #[arg(short = 'c', long, env = "NBCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides the config file)
    #[arg(long, env = "NBCACHE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Re-execute notebooks even when they already carry outputs
    #[arg(long, env = "NBCACHE_FORCE")]
    pub force: bool,

    /// Exclude documents whose path contains this substring (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Execution runner command (overrides the config file)
    #[arg(long, env = "NBCACHE_RUNNER")]
    pub runner: Option<String>,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Cache directory
    #[arg(long, env = "NBCACHE_CACHE_DIR", default_value = ".nbcache")]
    pub cache_dir: PathBuf,

    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List cached execution records
    List,

    /// Show cache statistics
    Stats,

    /// Remove every cached record
    Clean,
}
