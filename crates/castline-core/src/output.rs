// Persisted schedule
//
// One CSV per half (start, end, round, time_range, text) plus a JSON dump of
// the whole schedule including dropped events.

use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::scheduler::{Schedule, Slot};

pub const UPPER_HALF_FILE: &str = "final_upper_half.csv";
pub const LOWER_HALF_FILE: &str = "final_lower_half.csv";
pub const SCHEDULE_JSON_FILE: &str = "schedule.json";

#[derive(Serialize)]
struct SlotRow<'a> {
    start: String,
    end: String,
    round: u32,
    time_range: String,
    text: &'a str,
}

impl<'a> From<&'a Slot> for SlotRow<'a> {
    fn from(slot: &'a Slot) -> Self {
        Self {
            start: format!("{:.2}", slot.start_time),
            end: format!("{:.2}", slot.end_time),
            round: slot.round_number,
            time_range: slot.time_range(),
            text: &slot.text,
        }
    }
}

/// Write one row per slot with a `start,end,round,time_range,text` header
pub fn write_schedule_csv(slots: &[Slot], path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    if slots.is_empty() {
        writer.write_record(["start", "end", "round", "time_range", "text"])?;
    }
    for slot in slots {
        writer.serialize(SlotRow::from(slot))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the full schedule as pretty JSON
pub fn write_schedule_json(schedule: &Schedule, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, schedule)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Write both half CSVs and the JSON dump into `dir`, returning the paths
pub fn write_schedule(schedule: &Schedule, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let upper = dir.join(UPPER_HALF_FILE);
    let lower = dir.join(LOWER_HALF_FILE);
    let json = dir.join(SCHEDULE_JSON_FILE);

    write_schedule_csv(&schedule.upper, &upper)?;
    write_schedule_csv(&schedule.lower, &lower)?;
    write_schedule_json(schedule, &json)?;

    info!(
        dir = %dir.display(),
        upper = schedule.upper.len(),
        lower = schedule.lower.len(),
        "Wrote schedule"
    );
    Ok(vec![upper, lower, json])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Fingerprint, SourceCategory};
    use tempfile::TempDir;

    fn slot(start: f64, end: f64, text: &str) -> Slot {
        Slot {
            round_number: 3,
            category: SourceCategory::Kill,
            fingerprint: Fingerprint::new(format!("3_kill_{}", start)),
            start_time: start,
            end_time: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_csv_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upper.csv");
        write_schedule_csv(&[slot(12.0, 15.5, "ZywOo, opening pick"), slot(16.0, 18.5, "smoke")], &path)
            .unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["start", "end", "round", "time_range", "text"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][3], "12.0-15.5s");
        assert_eq!(&rows[0][4], "ZywOo, opening pick");
    }

    #[test]
    fn test_empty_half_still_has_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lower.csv");
        write_schedule_csv(&[], &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), "start,end,round,time_range,text");
    }

    #[test]
    fn test_write_schedule_files() {
        let dir = TempDir::new().unwrap();
        let schedule = Schedule {
            upper: vec![slot(1.0, 3.5, "a")],
            ..Default::default()
        };
        let paths = write_schedule(&schedule, dir.path().join("out")).unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.exists()));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths[2]).unwrap()).unwrap();
        assert_eq!(json["upper"][0]["text"], "a");
    }
}
