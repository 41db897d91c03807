//! Job identity stamped into every commit.
//!
//! When enabled, each sink schema carries `job_id`, `app_id`, `job_start`
//! and `job_end`, refreshed at the start of every transaction from the job
//! info file a resource manager prolog writes:
//!
//! ```text
//! JOBID=4242
//! APPID=7
//! JOB_START=1700000000
//! JOB_END=0
//! JOB_USER=alice
//! ```
//!
//! All four fields are zero while no job runs (file absent).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::collector::traits::FileSystem;
use crate::registry::{FieldDef, SchemaTemplate, Value};
use crate::util::LogOnce;

pub const DEFAULT_JOB_INFO_PATH: &str = "/var/run/ldms_jobinfo.data";

/// Job fields added to every schema, in `JobInfo::fields` order.
pub const JOB_FIELDS: [&str; 4] = ["job_id", "app_id", "job_start", "job_end"];

/// Numeric job identity of the running job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub job_id: u64,
    pub app_id: u64,
    pub job_start: u64,
    pub job_end: u64,
}

impl JobInfo {
    pub fn fields(&self) -> [(&'static str, Value); 4] {
        [
            (JOB_FIELDS[0], Value::U64(self.job_id)),
            (JOB_FIELDS[1], Value::U64(self.app_id)),
            (JOB_FIELDS[2], Value::U64(self.job_start)),
            (JOB_FIELDS[3], Value::U64(self.job_end)),
        ]
    }
}

/// Parses `KEY=value` lines. Unknown keys and non-numeric values are
/// ignored.
pub fn parse_job_info(content: &str) -> JobInfo {
    let mut info = JobInfo::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        match key.trim().to_ascii_uppercase().as_str() {
            "JOBID" | "JOB_ID" => info.job_id = value,
            "APPID" | "APP_ID" => info.app_id = value,
            "JOB_START" | "START" => info.job_start = value,
            "JOB_END" | "END" => info.job_end = value,
            _ => {}
        }
    }
    info
}

/// Appends the job fields to a schema.
pub fn with_job_fields(schema: SchemaTemplate) -> SchemaTemplate {
    JOB_FIELDS
        .iter()
        .fold(schema, |schema, name| schema.field(FieldDef::u64(*name)))
}

/// Supplies the current job identity.
pub trait JobSource: Send + Sync {
    fn current(&self) -> JobInfo;
}

/// Reads the job info file on each call.
pub struct JobInfoFile<F: FileSystem> {
    fs: F,
    path: PathBuf,
    missing: Mutex<LogOnce>,
}

impl<F: FileSystem> fmt::Debug for JobInfoFile<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobInfoFile").field("path", &self.path).finish()
    }
}

impl<F: FileSystem> JobInfoFile<F> {
    pub fn new(fs: F, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
            missing: Mutex::new(LogOnce::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<F: FileSystem> JobSource for JobInfoFile<F> {
    fn current(&self) -> JobInfo {
        let mut missing = self.missing.lock().unwrap_or_else(|e| e.into_inner());
        match self.fs.read_to_string(&self.path) {
            Ok(content) => {
                if missing.reset() {
                    debug!("job info {} is readable again", self.path.display());
                }
                parse_job_info(&content)
            }
            Err(e) => {
                if missing.trigger() {
                    debug!("no job info at {}: {}", self.path.display(), e);
                }
                JobInfo::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    #[test]
    fn test_parse_job_info() {
        let info = parse_job_info("JOBID=4242\nAPPID=7\nJOB_START=1700000000\nJOB_USER=alice\n");
        assert_eq!(
            info,
            JobInfo {
                job_id: 4242,
                app_id: 7,
                job_start: 1700000000,
                job_end: 0,
            }
        );
        assert_eq!(parse_job_info("garbage\nJOBID=x\n"), JobInfo::default());
    }

    #[test]
    fn test_job_info_file_follows_job() {
        let fs = MockFs::new();
        let source = JobInfoFile::new(fs.clone(), DEFAULT_JOB_INFO_PATH);
        assert_eq!(source.current(), JobInfo::default());

        fs.add_file(DEFAULT_JOB_INFO_PATH, "JOBID=12\n");
        assert_eq!(source.current().job_id, 12);

        fs.remove_file(DEFAULT_JOB_INFO_PATH);
        assert_eq!(source.current().job_id, 0);
    }

    #[test]
    fn test_with_job_fields() {
        let schema = with_job_fields(SchemaTemplate::new("lustre_osc_stats"));
        for name in JOB_FIELDS {
            assert!(schema.field_def(name).is_some());
        }
        assert!(schema.validate().is_ok());
    }
}
