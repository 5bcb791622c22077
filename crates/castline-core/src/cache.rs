// Generation Cache
//
// Append-only store from event fingerprint to generated narration. A missing
// entry means "not generated yet"; an entry with empty narration means
// "generation failed or had nothing to say, do not retry".
//
// The file-backed store keeps one JSON object per line. Appends go through a
// single writer lock and are flushed and synced before the entry becomes
// visible to lookups. Unparseable lines (including a torn final line after a
// crash) are skipped on load.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CastlineError, Result};
use crate::event::{Event, Fingerprint, Narration, SourceCategory};

/// How an entry's narration was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    /// Parsed from a text-generation reply
    Generated,
    /// Built from the template after retries were exhausted
    Fallback,
}

/// Persisted generation result for one fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationCacheEntry {
    pub fingerprint: Fingerprint,
    pub source_category: SourceCategory,
    pub round_number: u32,
    pub priority: i32,
    #[serde(default)]
    pub short_text: String,
    #[serde(default)]
    pub medium_text: String,
    #[serde(default)]
    pub long_text: String,
    pub origin: CacheOrigin,
    pub generated_at: DateTime<Utc>,
}

impl GenerationCacheEntry {
    pub fn new(event: &Event, narration: Narration, origin: CacheOrigin) -> Self {
        Self {
            fingerprint: event.fingerprint.clone(),
            source_category: event.category,
            round_number: event.round_number,
            priority: event.priority,
            short_text: narration.short,
            medium_text: narration.medium,
            long_text: narration.long,
            origin,
            generated_at: Utc::now(),
        }
    }

    pub fn narration(&self) -> Narration {
        Narration::new(
            self.short_text.clone(),
            self.medium_text.clone(),
            self.long_text.clone(),
        )
    }

    /// True when the entry records a generation that produced nothing
    pub fn is_empty(&self) -> bool {
        self.narration().is_empty()
    }
}

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// An entry for this fingerprint already existed; nothing was written
    AlreadyPresent,
}

/// Keyed store of generated narration for one source category
#[async_trait]
pub trait GenerationCache: Send + Sync {
    /// Previously generated entry for `fingerprint`, if any
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<GenerationCacheEntry>;

    /// Durably persist `entry` and make it visible to subsequent lookups
    async fn append(&self, entry: GenerationCacheEntry) -> Result<AppendOutcome>;

    /// Number of distinct fingerprints stored
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Opens the cache of a source category
#[async_trait]
pub trait GenerationCacheFactory: Send + Sync {
    async fn open(&self, category: SourceCategory) -> Result<Arc<dyn GenerationCache>>;
}

/// Outcome of loading a cache file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheLoadReport {
    pub loaded: usize,
    /// Lines that could not be parsed
    pub corrupt: usize,
    /// Parseable lines whose fingerprint was already loaded
    pub duplicates: usize,
}

/// Cache file name for a category
pub fn cache_file_name(category: SourceCategory) -> String {
    format!("{}_gen_cache.jsonl", category)
}

/// JSON Lines backed generation cache
pub struct FileGenerationCache {
    path: PathBuf,
    category: SourceCategory,
    index: RwLock<HashMap<Fingerprint, GenerationCacheEntry>>,
    writer: Mutex<File>,
    report: CacheLoadReport,
}

impl FileGenerationCache {
    /// Open (or create) the cache file of `category` under `dir`
    pub async fn open(dir: impl AsRef<Path>, category: SourceCategory) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let path = dir.join(cache_file_name(category));

        let (entries, report, torn_tail) = load_entries(&path).await?;
        if report.corrupt > 0 {
            warn!(
                path = %path.display(),
                corrupt = report.corrupt,
                "Skipped unreadable cache lines; their events will be regenerated"
            );
        }
        info!(
            category = %category,
            loaded = report.loaded,
            duplicates = report.duplicates,
            "Loaded generation cache"
        );

        let mut writer = open_append(&path).await?;
        if torn_tail {
            // Start the next append on a fresh line
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(Self {
            path,
            category,
            index: RwLock::new(entries),
            writer: Mutex::new(writer),
            report,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn category(&self) -> SourceCategory {
        self.category
    }

    pub fn load_report(&self) -> CacheLoadReport {
        self.report
    }

    /// Snapshot of all entries, ordered by fingerprint
    pub fn entries(&self) -> Vec<GenerationCacheEntry> {
        let mut entries: Vec<_> = self.index.read().values().cloned().collect();
        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        entries
    }

    /// Rewrite the file with exactly one valid line per fingerprint
    ///
    /// Returns the number of rows written.
    pub async fn compact(&self) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        self.rewrite(&mut writer).await
    }

    /// Strip leaked labels and separators from every entry, then compact
    ///
    /// Returns the number of entries whose narration changed.
    pub async fn sanitize(&self) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        let changed = {
            let mut index = self.index.write();
            let mut changed = 0;
            for entry in index.values_mut() {
                let cleaned = entry.narration().sanitize();
                if cleaned != entry.narration() {
                    entry.short_text = cleaned.short;
                    entry.medium_text = cleaned.medium;
                    entry.long_text = cleaned.long;
                    changed += 1;
                }
            }
            changed
        };
        self.rewrite(&mut writer).await?;
        info!(category = %self.category, changed, "Sanitized generation cache");
        Ok(changed)
    }

    async fn rewrite(&self, writer: &mut File) -> Result<usize> {
        let entries = self.entries();
        let mut body = Vec::new();
        for entry in &entries {
            serde_json::to_writer(&mut body, entry)?;
            body.push(b'\n');
        }

        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut tmp = File::create(&tmp_path).await?;
        tmp.write_all(&body).await?;
        tmp.flush().await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).await?;
        *writer = open_append(&self.path).await?;

        debug!(path = %self.path.display(), rows = entries.len(), "Compacted cache file");
        Ok(entries.len())
    }
}

#[async_trait]
impl GenerationCache for FileGenerationCache {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<GenerationCacheEntry> {
        self.index.read().get(fingerprint).cloned()
    }

    async fn append(&self, entry: GenerationCacheEntry) -> Result<AppendOutcome> {
        if entry.source_category != self.category {
            return Err(CastlineError::cache(format!(
                "entry of category {} appended to {} cache",
                entry.source_category, self.category
            )));
        }

        let mut writer = self.writer.lock().await;
        if self.index.read().contains_key(&entry.fingerprint) {
            return Ok(AppendOutcome::AlreadyPresent);
        }

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        writer.sync_data().await?;

        self.index.write().insert(entry.fingerprint.clone(), entry);
        Ok(AppendOutcome::Inserted)
    }

    async fn len(&self) -> usize {
        self.index.read().len()
    }
}

/// Opens file-backed caches under one directory
#[derive(Debug, Clone)]
pub struct FileCacheFactory {
    dir: PathBuf,
}

impl FileCacheFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl GenerationCacheFactory for FileCacheFactory {
    async fn open(&self, category: SourceCategory) -> Result<Arc<dyn GenerationCache>> {
        let cache = FileGenerationCache::open(&self.dir, category).await?;
        Ok(Arc::new(cache))
    }
}

async fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

/// Parse every line of a cache file; a missing file is an empty cache
async fn load_entries(
    path: &Path,
) -> Result<(HashMap<Fingerprint, GenerationCacheEntry>, CacheLoadReport, bool)> {
    let mut entries = HashMap::new();
    let mut report = CacheLoadReport::default();

    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok((entries, report, false))
        }
        Err(err) => return Err(err.into()),
    };
    let torn_tail = bytes.last().is_some_and(|b| *b != b'\n');

    for (line_no, raw_line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line = String::from_utf8_lossy(raw_line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<GenerationCacheEntry>(line) {
            Ok(entry) => {
                if entries.contains_key(&entry.fingerprint) {
                    report.duplicates += 1;
                    continue;
                }
                entries.insert(entry.fingerprint.clone(), entry);
                report.loaded += 1;
            }
            Err(err) => {
                debug!(line = line_no + 1, error = %err, "Unreadable cache line");
                report.corrupt += 1;
            }
        }
    }

    Ok((entries, report, torn_tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{NativeTimestamp, RawEvent};
    use tempfile::TempDir;

    fn entry(entity: &str, text: &str) -> GenerationCacheEntry {
        let event = Event::from_raw(
            SourceCategory::Utility,
            RawEvent::new(entity, 2, NativeTimestamp::Ticks(1280), 5),
        );
        GenerationCacheEntry::new(&event, Narration::uniform(text), CacheOrigin::Generated)
    }

    #[tokio::test]
    async fn test_append_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
            .await
            .unwrap();

        let e = entry("g1", "smoke on B");
        assert_eq!(cache.append(e.clone()).await.unwrap(), AppendOutcome::Inserted);
        assert_eq!(cache.lookup(&e.fingerprint).await, Some(e));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_second_append_is_ignored() {
        let dir = TempDir::new().unwrap();
        let cache = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
            .await
            .unwrap();

        let first = entry("g1", "first");
        let second = entry("g1", "second");
        cache.append(first.clone()).await.unwrap();
        assert_eq!(
            cache.append(second).await.unwrap(),
            AppendOutcome::AlreadyPresent
        );
        assert_eq!(
            cache.lookup(&first.fingerprint).await.unwrap().medium_text,
            "first"
        );

        let content = std::fs::read_to_string(cache.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let e = entry("g1", "persisted");
        {
            let cache = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
                .await
                .unwrap();
            cache.append(e.clone()).await.unwrap();
        }

        let reopened = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
            .await
            .unwrap();
        assert_eq!(reopened.load_report().loaded, 1);
        assert_eq!(reopened.lookup(&e.fingerprint).await, Some(e));
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let good = entry("g1", "good");
        let path = dir.path().join(cache_file_name(SourceCategory::Utility));
        let mut content = serde_json::to_string(&good).unwrap();
        content.push_str("\nnot json at all\n{\"fingerprint\": \"2_utility_g2");
        std::fs::write(&path, content).unwrap();

        let cache = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
            .await
            .unwrap();
        let report = cache.load_report();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.corrupt, 2);

        // The torn tail must not swallow the next append
        let next = entry("g3", "after crash");
        cache.append(next.clone()).await.unwrap();
        drop(cache);

        let reopened = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
            .await
            .unwrap();
        assert_eq!(reopened.load_report().loaded, 2);
        assert!(reopened.lookup(&next.fingerprint).await.is_some());
    }

    #[tokio::test]
    async fn test_compact_removes_garbage_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let first = entry("g1", "first");
        let dup = entry("g1", "dup");
        let path = dir.path().join(cache_file_name(SourceCategory::Utility));
        let content = format!(
            "{}\n{}\ngarbage\n",
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&dup).unwrap()
        );
        std::fs::write(&path, content).unwrap();

        let cache = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
            .await
            .unwrap();
        assert_eq!(cache.load_report().duplicates, 1);
        assert_eq!(cache.compact().await.unwrap(), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("first"));
    }

    #[tokio::test]
    async fn test_sanitize_rewrites_labels() {
        let dir = TempDir::new().unwrap();
        let cache = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
            .await
            .unwrap();
        let e = entry("g1", "中版：烟雾封住A点");
        cache.append(e.clone()).await.unwrap();

        assert_eq!(cache.sanitize().await.unwrap(), 1);
        let cleaned = cache.lookup(&e.fingerprint).await.unwrap();
        assert_eq!(cleaned.medium_text, "烟雾封住A点");

        let reopened = FileGenerationCache::open(dir.path(), SourceCategory::Utility)
            .await
            .unwrap();
        assert_eq!(
            reopened.lookup(&e.fingerprint).await.unwrap().long_text,
            "烟雾封住A点"
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(
            FileGenerationCache::open(dir.path(), SourceCategory::Utility)
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                // Two writers race per fingerprint
                cache.append(entry(&format!("g{}", i / 2), "x")).await.unwrap()
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == AppendOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 8);

        let content = std::fs::read_to_string(cache.path()).unwrap();
        assert_eq!(content.lines().count(), 8);
    }
}
