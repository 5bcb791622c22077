// Cache hygiene command
//
// Strips leaked length labels and separators from cached narration and
// rewrites every cache file with one valid row per fingerprint.

use anyhow::{Context, Result};
use castline_core::cache::cache_file_name;
use castline_core::{FileGenerationCache, SourceCategory};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::output::{print_table_header, print_table_row, OutputFormat};

#[derive(Debug, Clone, Args)]
pub struct CleanCacheArgs {
    /// Cache directory holding <category>_gen_cache.jsonl files
    pub dir: PathBuf,
}

/// Result of cleaning one cache file
#[derive(Debug, Clone, Serialize)]
pub struct CleanedCache {
    pub category: SourceCategory,
    pub rows: usize,
    /// Entries whose narration was rewritten
    pub changed: usize,
    /// Unreadable lines dropped from the file
    pub corrupt: usize,
    /// Repeated fingerprints dropped from the file
    pub duplicates: usize,
}

pub async fn run(args: CleanCacheArgs, format: OutputFormat) -> Result<()> {
    let cleaned = execute(&args.dir).await?;

    if format.is_text() {
        if cleaned.is_empty() {
            println!("No cache files found in {}", args.dir.display());
            return Ok(());
        }
        print_table_header(&[("SOURCE", 14), ("ROWS", 6), ("CHANGED", 8), ("CORRUPT", 8), ("DUPLICATES", 10)]);
        for cache in &cleaned {
            print_table_row(&[
                (cache.category.as_str(), 14),
                (&cache.rows.to_string(), 6),
                (&cache.changed.to_string(), 8),
                (&cache.corrupt.to_string(), 8),
                (&cache.duplicates.to_string(), 10),
            ]);
        }
    } else {
        format.print_value(&cleaned)?;
    }
    Ok(())
}

/// Sanitize and compact every category cache present in `dir`
pub async fn execute(dir: &Path) -> Result<Vec<CleanedCache>> {
    if !dir.is_dir() {
        anyhow::bail!("Cache directory {} does not exist", dir.display());
    }

    let mut cleaned = Vec::new();
    for category in SourceCategory::ALL {
        if !dir.join(cache_file_name(category)).exists() {
            continue;
        }
        let cache = FileGenerationCache::open(dir, category)
            .await
            .with_context(|| format!("Failed to open {} cache", category))?;
        let changed = cache
            .sanitize()
            .await
            .with_context(|| format!("Failed to rewrite {} cache", category))?;
        let report = cache.load_report();

        cleaned.push(CleanedCache {
            category,
            rows: cache.entries().len(),
            changed,
            corrupt: report.corrupt,
            duplicates: report.duplicates,
        });
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use castline_core::{
        CacheOrigin, Event, GenerationCache, GenerationCacheEntry, Narration, NativeTimestamp,
        RawEvent,
    };
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_strips_labels_and_drops_corrupt_lines() {
        let dir = TempDir::new().unwrap();
        let event = Event::from_raw(
            SourceCategory::Kill,
            RawEvent::new("ZywOo", 4, NativeTimestamp::Seconds(30.0), 7),
        );
        {
            let cache = FileGenerationCache::open(dir.path(), SourceCategory::Kill).await.unwrap();
            cache
                .append(GenerationCacheEntry::new(
                    &event,
                    Narration::new("AWP pick", "medium version: ZywOo wins the duel\n---", "ZywOo wins the duel at mid"),
                    CacheOrigin::Generated,
                ))
                .await
                .unwrap();
        }
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(cache_file_name(SourceCategory::Kill)))
            .unwrap();
        writeln!(file, "{{\"fingerprint\": ").unwrap();

        let cleaned = execute(dir.path()).await.unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].category, SourceCategory::Kill);
        assert_eq!(cleaned[0].rows, 1);
        assert_eq!(cleaned[0].changed, 1);
        assert_eq!(cleaned[0].corrupt, 1);

        let reopened = FileGenerationCache::open(dir.path(), SourceCategory::Kill).await.unwrap();
        assert_eq!(reopened.load_report().corrupt, 0);
        let entry = reopened.lookup(&event.fingerprint).await.unwrap();
        assert_eq!(entry.medium_text, "ZywOo wins the duel");
    }

    #[tokio::test]
    async fn test_missing_dir_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(execute(&dir.path().join("nope")).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_dir_has_nothing_to_clean() {
        let dir = TempDir::new().unwrap();
        assert!(execute(dir.path()).await.unwrap().is_empty());
    }
}
