//! JSON-lines publication of committed sinks.
//!
//! After each tick every published sink is written as one JSON object per
//! line. Output is segmented by hour:
//!
//! ```text
//! <output_dir>/lustre_fulldump_20231114_22.jsonl
//! {"timestamp":1700000000,"name":"node1/lustre_fulldump/testfs/OST0000/osc_stats","schema":"lustre_osc_stats",...}
//! ```
//!
//! An output directory of `-` writes to stdout instead.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::SinkSnapshot;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One output line.
#[derive(Serialize)]
struct Line<'a> {
    timestamp: i64,
    #[serde(flatten)]
    sink: &'a SinkSnapshot,
}

enum Target {
    Stdout,
    Directory {
        base_path: PathBuf,
        /// Open hourly file and its path.
        current: Option<(PathBuf, BufWriter<File>)>,
    },
}

/// Appends sink snapshots to hourly JSON-lines files.
pub struct JsonLinesWriter {
    target: Target,
    lines_written: u64,
}

impl JsonLinesWriter {
    /// # Arguments
    /// * `output` - Output directory, or `-` for stdout. The directory is
    ///   created on first write.
    pub fn new(output: &str) -> Self {
        let target = if output == "-" {
            Target::Stdout
        } else {
            Target::Directory {
                base_path: PathBuf::from(output),
                current: None,
            }
        };
        Self {
            target,
            lines_written: 0,
        }
    }

    /// File name of the hour containing `time`.
    pub fn file_name(time: DateTime<Utc>) -> String {
        format!("lustre_fulldump_{}.jsonl", time.format("%Y%m%d_%H"))
    }

    /// Path of the file currently open, if writing to a directory.
    pub fn current_path(&self) -> Option<&Path> {
        match &self.target {
            Target::Directory {
                current: Some((path, _)),
                ..
            } => Some(path),
            _ => None,
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Writes one line per sink, stamped with `time`, and flushes.
    pub fn write(&mut self, time: DateTime<Utc>, sinks: &[SinkSnapshot]) -> Result<usize, StorageError> {
        let timestamp = time.timestamp();
        let mut buf = Vec::new();
        for sink in sinks {
            serde_json::to_writer(&mut buf, &Line { timestamp, sink })?;
            buf.push(b'\n');
        }

        match &mut self.target {
            Target::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(&buf)
                    .and_then(|()| out.flush())
                    .map_err(|source| StorageError::Io {
                        path: "-".to_string(),
                        source,
                    })?;
            }
            Target::Directory { base_path, current } => {
                let path = base_path.join(Self::file_name(time));
                if !matches!(current, Some((open, _)) if *open == path) {
                    let io_error = |source| StorageError::Io {
                        path: path.display().to_string(),
                        source,
                    };
                    std::fs::create_dir_all(base_path.as_path()).map_err(io_error)?;
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .map_err(io_error)?;
                    if let Some((previous, mut writer)) = current.take() {
                        match writer.flush() {
                            Ok(()) => debug!("closed {}", previous.display()),
                            Err(e) => warn!("failed to flush {}: {}", previous.display(), e),
                        }
                    }
                    info!("writing to {}", path.display());
                    *current = Some((path.clone(), BufWriter::new(file)));
                }
                if let Some((_, writer)) = current {
                    writer
                        .write_all(&buf)
                        .and_then(|()| writer.flush())
                        .map_err(|source| StorageError::Io {
                            path: path.display().to_string(),
                            source,
                        })?;
                }
            }
        }

        self.lines_written += sinks.len() as u64;
        Ok(sinks.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::registry::Value;

    fn snapshot(name: &str) -> SinkSnapshot {
        let mut fields = BTreeMap::new();
        fields.insert("snapshot_sec".to_string(), Value::U64(1700000000));
        let mut record = BTreeMap::new();
        record.insert("metric_name".to_string(), Value::from("read_bytes"));
        record.insert("count".to_string(), Value::U64(3));
        SinkSnapshot {
            name: name.to_string(),
            schema: "lustre_osc_stats".to_string(),
            commits: 1,
            fields,
            records: vec![record],
        }
    }

    #[test]
    fn test_file_name() {
        let time = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        assert_eq!(JsonLinesWriter::file_name(time), "lustre_fulldump_20231114_22.jsonl");
    }

    #[test]
    fn test_write_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data");
        let mut writer = JsonLinesWriter::new(out.to_str().unwrap());
        let time = Utc.with_ymd_and_hms(2023, 11, 14, 22, 0, 0).unwrap();

        writer.write(time, &[snapshot("a"), snapshot("b")]).unwrap();
        writer.write(time, &[snapshot("a")]).unwrap();
        assert_eq!(writer.lines_written(), 3);

        let path = out.join("lustre_fulldump_20231114_22.jsonl");
        assert_eq!(writer.current_path(), Some(path.as_path()));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["timestamp"], 1699999200);
        assert_eq!(first["name"], "a");
        assert_eq!(first["fields"]["snapshot_sec"], 1700000000u64);
        assert_eq!(first["records"][0]["metric_name"], "read_bytes");
    }

    #[test]
    fn test_hour_change_rotates_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path().to_str().unwrap());
        let first = Utc.with_ymd_and_hms(2023, 11, 14, 22, 59, 59).unwrap();
        let second = Utc.with_ymd_and_hms(2023, 11, 14, 23, 0, 1).unwrap();

        writer.write(first, &[snapshot("a")]).unwrap();
        writer.write(second, &[snapshot("a")]).unwrap();

        assert_eq!(
            writer.current_path(),
            Some(dir.path().join("lustre_fulldump_20231114_23.jsonl").as_path())
        );
        for hour in ["22", "23"] {
            let path = dir.path().join(format!("lustre_fulldump_20231114_{hour}.jsonl"));
            assert_eq!(std::fs::read_to_string(path).unwrap().lines().count(), 1);
        }
    }
}
