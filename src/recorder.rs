//! JSON-lines recording of telemetry frames and procedure events.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Result, TutorError};

/// Appends one JSON document per line, flushing after every record so a
/// crashed session still leaves a readable log.
#[derive(Debug)]
pub struct JsonlWriter<T> {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    _record: PhantomData<fn(&T)>,
}

impl<T: Serialize> JsonlWriter<T> {
    /// Create or truncate `path`, creating parent directories as needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path.as_ref(), false)
    }

    /// Open `path` for appending.
    pub fn append_to(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path.as_ref(), true)
    }

    fn open(path: &Path, append: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TutorError::file_error(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|e| TutorError::file_error(path, e))?;
        info!(path = %path.display(), append, "Opened JSONL log");
        Ok(Self { path: path.to_path_buf(), writer: BufWriter::new(file), written: 0, _record: PhantomData })
    }

    pub fn append(&mut self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| TutorError::parse_error("JSONL record", e.to_string()))?;
        writeln!(self.writer, "{}", line).map_err(|e| TutorError::file_error(&self.path, e))?;
        self.writer.flush().map_err(|e| TutorError::file_error(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.written
    }
}

/// Read every non-blank line of `path` as a `T`.
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| TutorError::file_error(path, e))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| TutorError::file_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            TutorError::parse_error(format!("{} line {}", path.display(), index + 1), e.to_string())
        })?;
        records.push(record);
    }
    debug!(path = %path.display(), records = records.len(), "Read JSONL log");
    Ok(records)
}

/// Check recorded telemetry logs: within each file `seq` must be strictly
/// increasing and `t_wall` non-decreasing. The error names the file and the
/// offending value.
pub fn verify_telemetry_log<P: AsRef<Path>>(paths: &[P]) -> std::result::Result<(), String> {
    for path in paths {
        let path = path.as_ref();
        let frames: Vec<JsonValue> =
            read_jsonl(path).map_err(|e| format!("{} failed to read: {}", path.display(), e))?;

        let mut last_seq: Option<u64> = None;
        let mut last_t_wall: Option<f64> = None;
        for frame in &frames {
            let seq = frame
                .get("seq")
                .and_then(JsonValue::as_u64)
                .ok_or_else(|| format!("{} missing seq", path.display()))?;
            let t_wall = frame
                .get("t_wall")
                .and_then(JsonValue::as_f64)
                .ok_or_else(|| format!("{} missing t_wall", path.display()))?;
            if last_seq.is_some_and(|last| seq <= last) {
                return Err(format!("{} non-monotonic seq at {}", path.display(), seq));
            }
            if last_t_wall.is_some_and(|last| t_wall < last) {
                return Err(format!("{} non-monotonic t_wall at {}", path.display(), t_wall));
            }
            last_seq = Some(seq);
            last_t_wall = Some(t_wall);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{ProcedureEngine, ProcedureEvent};
    use crate::types::TelemetryFrame;

    #[test]
    fn frames_round_trip_through_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/telemetry.jsonl");

        let mut writer = JsonlWriter::create(&path).unwrap();
        for seq in 1..=3 {
            writer.append(&TelemetryFrame::new(seq, seq as f64, "dcs_bios_raw")).unwrap();
        }
        assert_eq!(writer.records_written(), 3);

        let frames: Vec<TelemetryFrame> = read_jsonl(&path).unwrap();
        assert_eq!(frames.iter().map(|f| f.seq).collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(verify_telemetry_log(&[&path]), Ok(()));
    }

    #[test]
    fn append_mode_keeps_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut engine = ProcedureEngine::new(["S01"]).unwrap();
        engine.activate_next().unwrap();
        engine.complete_active().unwrap();

        JsonlWriter::create(&path).unwrap().append(&engine.events()[0]).unwrap();
        JsonlWriter::append_to(&path).unwrap().append(&engine.events()[1]).unwrap();

        let events: Vec<ProcedureEvent> = read_jsonl(&path).unwrap();
        assert_eq!(events, engine.events());
    }

    #[test]
    fn verification_reports_non_monotonic_values() {
        let dir = tempfile::tempdir().unwrap();

        let seq_path = dir.path().join("seq.jsonl");
        fs::write(&seq_path, "{\"seq\": 2, \"t_wall\": 1.0}\n{\"seq\": 2, \"t_wall\": 2.0}\n").unwrap();
        let err = verify_telemetry_log(&[&seq_path]).unwrap_err();
        assert!(err.ends_with("non-monotonic seq at 2"), "{}", err);

        let time_path = dir.path().join("time.jsonl");
        fs::write(&time_path, "{\"seq\": 1, \"t_wall\": 5.0}\n\n{\"seq\": 2, \"t_wall\": 4.5}\n").unwrap();
        let err = verify_telemetry_log(&[&time_path]).unwrap_err();
        assert!(err.ends_with("non-monotonic t_wall at 4.5"), "{}", err);

        let missing_path = dir.path().join("missing.jsonl");
        fs::write(&missing_path, "{\"t_wall\": 5.0}\n").unwrap();
        assert!(verify_telemetry_log(&[&missing_path]).unwrap_err().ends_with("missing seq"));
    }

    #[test]
    fn unreadable_log_fails_verification() {
        let err = verify_telemetry_log(&["/nonexistent/telemetry.jsonl"]).unwrap_err();
        assert!(err.contains("failed to read"));

        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.jsonl");
        fs::write(&garbage, "not json\n").unwrap();
        assert!(matches!(read_jsonl::<JsonValue>(&garbage), Err(TutorError::Parse { .. })));
    }
}
