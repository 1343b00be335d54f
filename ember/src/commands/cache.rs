//! `ember cache stats` / `ember cache clear`: inspect or reset the on-disk
//! cache tiers without running a build, grounded in the same
//! `CacheCoordinator` facade `ember build` drives.

use crate::error::EmberResult;
use ember_cache::{CacheCoordinator, CoordinatorStats};
use std::path::Path;

/// Open the cache at `cache_dir` and return its current statistics.
///
/// # Errors
///
/// Returns [`crate::error::EmberError`] if the cache cannot be opened.
pub fn stats(cache_dir: &Path) -> EmberResult<CoordinatorStats> {
    let cache = CacheCoordinator::open(cache_dir, 0)?;
    let stats = cache.get_stats();
    cache.close()?;
    Ok(stats)
}

/// Print a [`CoordinatorStats`] summary in the same voice as a build's
/// closing `BuildSummary::display`.
pub fn display_stats(stats: &CoordinatorStats) {
    println!("📦 Cache Stats:");
    println!(
        "  target cache: {} entries, {} hits, {} misses, {} bytes",
        stats.target.entries, stats.target.hits, stats.target.misses, stats.target.bytes
    );
    println!(
        "  action cache: {} entries, {} hits, {} misses, {} bytes",
        stats.action.entries, stats.action.hits, stats.action.misses, stats.action.bytes
    );
}

/// Remove every entry from both cache tiers at `cache_dir`.
///
/// # Errors
///
/// Returns [`crate::error::EmberError`] if the cache cannot be opened or
/// cleared.
pub fn clear(cache_dir: &Path) -> EmberResult<()> {
    let cache = CacheCoordinator::open(cache_dir, 0)?;
    cache.clear()?;
    cache.close()?;
    Ok(())
}
