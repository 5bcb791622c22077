// File-backed event input
//
// Each analysis component leaves `<input>/<category>.json` (a JSON array of
// raw events) and the demo parser leaves `<input>/rounds.json`, either as
// finished round timings or as per-tick round clock samples.

use anyhow::{Context, Result};
use async_trait::async_trait;
use castline_core::{CastlineError, RawEvent, RawEventProvider, RoundTable, RoundTiming, SourceCategory};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ROUNDS_FILE: &str = "rounds.json";

/// Reads one category's raw events from a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileProvider {
    path: PathBuf,
    category: SourceCategory,
}

impl JsonFileProvider {
    pub fn new(dir: &Path, category: SourceCategory) -> Self {
        Self {
            path: dir.join(format!("{}.json", category)),
            category,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RawEventProvider for JsonFileProvider {
    fn category(&self) -> SourceCategory {
        self.category
    }

    async fn fetch(&self) -> castline_core::Result<Vec<RawEvent>> {
        let unavailable = |reason: String| {
            CastlineError::source_unavailable(self.category, format!("{}: {}", self.path.display(), reason))
        };

        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let rows: Vec<RawEvent> =
            serde_json::from_slice(&bytes).map_err(|e| unavailable(e.to_string()))?;

        debug!(category = %self.category, rows = rows.len(), "Read raw events");
        Ok(rows)
    }
}

/// One demo tick with the round clock at that tick
#[derive(Debug, Deserialize)]
struct TickSample {
    round_number: u32,
    tick: u64,
    /// Seconds since freeze time ended
    seconds: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RoundsFile {
    Timings(Vec<RoundTiming>),
    Samples(Vec<TickSample>),
}

/// Load the round timing table from a JSON array of rounds or tick samples
pub fn load_rounds(path: &Path) -> Result<RoundTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read round table {}", path.display()))?;
    let file: RoundsFile = serde_json::from_str(&text)
        .with_context(|| format!("Invalid round table {}", path.display()))?;

    let table = match file {
        RoundsFile::Timings(rounds) => RoundTable::new(rounds),
        RoundsFile::Samples(samples) => {
            debug!(samples = samples.len(), "Deriving round table from tick samples");
            RoundTable::from_samples(
                samples
                    .into_iter()
                    .map(|sample| (sample.round_number, sample.tick, sample.seconds)),
            )
        }
    };
    Ok(table)
}
