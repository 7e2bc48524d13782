/// `nbcache cache` command implementation
///
/// Manages cached execution records (list, stats, clean).
use anyhow::{Context, Result};

use crate::cache::NotebookCache;
use crate::cli::{CacheArgs, CacheCommands};

pub fn run(args: &CacheArgs) -> Result<()> {
    let mut cache =
        NotebookCache::open(&args.cache_dir).context("Failed to open notebook cache")?;

    match args.command {
        CacheCommands::List => list(&cache),
        CacheCommands::Stats => stats(&cache),
        CacheCommands::Clean => clean(&mut cache),
    }
}

fn list(cache: &NotebookCache) -> Result<()> {
    let records = cache.list_records()?;
    if records.is_empty() {
        println!("Cache is empty.");
        return Ok(());
    }

    for record in records {
        println!(
            "{:>4}  {}  {}  {}",
            record.pk,
            record.hashkey,
            record.created.format("%Y-%m-%d %H:%M:%S"),
            record.uri.display()
        );
    }
    Ok(())
}

fn stats(cache: &NotebookCache) -> Result<()> {
    let stats = cache.stats()?;
    println!("Cache directory: {}", stats.cache_dir.display());
    println!("Records: {}", stats.total_records);
    println!(
        "Size: {:.2} KB",
        stats.total_bytes as f64 / 1024.0
    );
    Ok(())
}

fn clean(cache: &mut NotebookCache) -> Result<()> {
    cache.clean_all()?;
    println!("Cache cleared.");
    Ok(())
}
