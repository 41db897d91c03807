//! Parsers for Lustre stat files.
//!
//! Each on-disk grammar has a line-level parser (pure functions over `&str`,
//! easy to test with string inputs) and a `StatFormat` implementation that
//! turns a whole file into one transaction on a sink:
//!
//! - `stats` - `snapshot_time` header and one counter line per operation
//! - `histogram` - `rpc_stats` sections and `brw_stats` labeled-bin sections
//! - `timeouts` - `last reply` header and per-portal timeout triplets
//! - `peers` - LNet peer table
//!
//! A format validates the header before opening a transaction. Any
//! malformed line afterwards aborts the transaction, so readers keep the
//! previous tick's values. Running out of records commits what was already
//! appended and reports `SampleError::Exhausted`.

mod histogram;
mod peers;
mod stats;
mod timeouts;

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::collector::binder::{Sink, SinkBinder, SinkNaming, Transaction};
use crate::collector::identity::Identity;
use crate::registry::{FieldDef, Record, RegistryError, SchemaTemplate};

pub use histogram::{
    BinLineError, BrwHistogramFormat, HistogramBin, RPC_SECTIONS, RpcHistogramFormat, parse_bin_label,
    parse_labeled_bin_line, parse_rpc_bin_line,
};
pub use peers::{PeerRow, PeersFormat, parse_peer_row};
pub use stats::{StatLine, StatsFormat, parse_stat_line};
pub use timeouts::{TimeoutLine, TimeoutsFormat, parse_last_reply, parse_timeout_line};

/// Error type for parsing failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number, 0 when the file is empty.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, msg: impl Into<String>) -> Self {
        Self {
            line,
            message: msg.into(),
        }
    }
}

/// Error classes of the sampling path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Source file or directory absent; retried next tick.
    TransientMissing,
    /// Header or field mismatch; the file's transaction was rolled back.
    MalformedInput,
    /// Record pool full; records appended so far were committed.
    ResourceExhausted,
    /// Registry refused to create or write a sink.
    AllocationFailure,
}

/// Failure to sample one file.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("not found")]
    NotFound,
    #[error("read failed: {0}")]
    Io(#[source] io::Error),
    #[error("malformed: {0}")]
    Malformed(#[from] ParseError),
    #[error("record pool exhausted after {appended} records")]
    Exhausted { appended: usize },
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
}

impl SampleError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SampleError::NotFound | SampleError::Io(_) => ErrorClass::TransientMissing,
            SampleError::Malformed(_) => ErrorClass::MalformedInput,
            SampleError::Exhausted { .. } => ErrorClass::ResourceExhausted,
            SampleError::Registry(_) => ErrorClass::AllocationFailure,
        }
    }

    /// Maps a failed read of a stat file.
    pub fn from_io(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            SampleError::NotFound
        } else {
            SampleError::Io(e)
        }
    }
}

/// Result of one successfully parsed file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleOutcome {
    /// Records appended and committed.
    pub records: usize,
    /// Data lines rejected individually without aborting the file.
    pub skipped_lines: usize,
    /// `false` when the file held no data and no sink was written.
    pub committed: bool,
}

/// Sink of an entity, created on first use when the sampler binds lazily.
pub struct SinkSlot<'a> {
    slot: &'a mut Option<Sink>,
    binder: &'a SinkBinder,
    identity: &'a Identity,
}

impl<'a> SinkSlot<'a> {
    pub fn new(slot: &'a mut Option<Sink>, binder: &'a SinkBinder, identity: &'a Identity) -> Self {
        Self {
            slot,
            binder,
            identity,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.slot.is_some()
    }

    /// Returns the sink, creating it if this is its first use.
    pub fn get_or_create(&mut self) -> Result<&Sink, RegistryError> {
        let sink = match self.slot.take() {
            Some(sink) => sink,
            None => self.binder.create_sink(self.identity)?,
        };
        Ok(self.slot.insert(sink))
    }
}

/// One on-disk grammar.
pub trait StatFormat: Send + Sync {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Schema for sinks holding this format.
    ///
    /// # Arguments
    /// * `name` - Schema name
    /// * `naming` - Sink layout, decides which identity fields are declared
    /// * `capacity` - Record pool size of each sink
    fn schema(&self, name: &str, naming: SinkNaming, capacity: usize) -> SchemaTemplate;

    /// Parses file content and commits it to the entity's sink.
    fn sample(&self, content: &str, sink: &mut SinkSlot<'_>) -> Result<SampleOutcome, SampleError>;
}

/// Schema holding the identity fields a sink with this layout carries.
pub(crate) fn identity_schema(name: &str, naming: SinkNaming) -> SchemaTemplate {
    let mut schema = SchemaTemplate::new(name).field(FieldDef::u64("component_id"));
    if naming != SinkNaming::SingleSource {
        schema = schema.field(FieldDef::str("fs_name"));
    }
    if naming == SinkNaming::PerServer {
        schema = schema.field(FieldDef::u64("server_idx"));
    }
    schema
}

/// `snapshot_time` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub sec: u64,
    pub nsec: u64,
}

/// Parses `snapshot_time <sec>.<nsec> [secs.nsecs]`.
///
/// The key may carry a trailing colon (`snapshot_time:`), as `rpc_stats`
/// and `brw_stats` print it.
pub fn parse_snapshot_line(line: &str) -> Result<Snapshot, String> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("snapshot_time") | Some("snapshot_time:") => {}
        Some(other) => return Err(format!("expected snapshot_time, got '{other}'")),
        None => return Err("expected snapshot_time, got empty line".to_string()),
    }
    let value = tokens
        .next()
        .ok_or_else(|| "snapshot_time without value".to_string())?;
    parse_timestamp(value).ok_or_else(|| format!("invalid snapshot_time '{value}'"))
}

/// Parses `<sec>.<nsec>`; a missing fraction reads as zero nanoseconds.
fn parse_timestamp(value: &str) -> Option<Snapshot> {
    let (sec, nsec) = value.split_once('.').unwrap_or((value, "0"));
    Some(Snapshot {
        sec: sec.parse().ok()?,
        nsec: nsec.parse().ok()?,
    })
}

/// `start_time` / `elapsed_time` lines printed after the header by newer
/// Lustre releases.
pub(crate) fn is_timestamp_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    let _key = tokens.next();
    match (tokens.next(), tokens.next()) {
        (Some(value), Some(unit)) => {
            unit.trim_matches(|c| c == '(' || c == ')') == "secs.nsecs"
                && parse_timestamp(value).is_some()
        }
        _ => false,
    }
}

/// Iterator over non-blank lines with 1-based line numbers.
pub(crate) fn numbered_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
}

/// Reads the first non-blank line as a `snapshot_time` header.
pub(crate) fn read_snapshot_header<'a, I>(lines: &mut I) -> Result<Snapshot, ParseError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let (no, line) = lines
        .next()
        .ok_or_else(|| ParseError::new(0, "empty file"))?;
    parse_snapshot_line(line).map_err(|msg| ParseError::new(no, msg))
}

/// Takes the next record from the sink's pool, `None` once it is used up.
pub(crate) fn next_record(tx: &Transaction<'_>) -> Result<Option<Record>, RegistryError> {
    match tx.allocate() {
        Ok(record) => Ok(Some(record)),
        Err(RegistryError::Exhausted(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Commits the records appended before the pool ran out.
pub(crate) fn commit_exhausted(tx: Transaction<'_>, appended: usize) -> SampleError {
    match tx.commit() {
        Ok(()) => SampleError::Exhausted { appended },
        Err(e) => SampleError::Registry(e),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::StatFormat;
    use crate::collector::binder::{SinkBinder, SinkNaming};
    use crate::registry::{MemoryRegistry, MetricRegistry};

    /// Registry and binder for exercising one format.
    pub(crate) fn bind(
        format: &dyn StatFormat,
        naming: SinkNaming,
        capacity: usize,
    ) -> (MemoryRegistry, SinkBinder) {
        let registry = MemoryRegistry::new();
        let schema = registry
            .define_schema(format.schema("test_schema", naming, capacity))
            .unwrap();
        let binder = SinkBinder::new(
            Arc::new(registry.clone()),
            schema,
            "node1",
            "lustre_fulldump",
            "test",
            naming,
            0,
        );
        (registry, binder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_line_variants() {
        assert_eq!(
            parse_snapshot_line("snapshot_time 100.200"),
            Ok(Snapshot { sec: 100, nsec: 200 })
        );
        assert_eq!(
            parse_snapshot_line("snapshot_time:         1700000000.123456789 (secs.nsecs)"),
            Ok(Snapshot {
                sec: 1700000000,
                nsec: 123456789
            })
        );
        assert_eq!(
            parse_snapshot_line("snapshot_time 42"),
            Ok(Snapshot { sec: 42, nsec: 0 })
        );
        assert!(parse_snapshot_line("read_bytes 1 samples").is_err());
        assert!(parse_snapshot_line("snapshot_time abc").is_err());
        assert!(parse_snapshot_line("").is_err());
    }

    #[test]
    fn test_timestamp_lines() {
        assert!(is_timestamp_line(
            "start_time                1699990000.000000000 secs.nsecs"
        ));
        assert!(!is_timestamp_line("read_bytes 12 samples [bytes] 1 2 3 4"));
    }

    #[test]
    fn test_read_snapshot_header_skips_blank_lines() {
        let mut lines = numbered_lines("\n\nsnapshot_time 5.6\nx 1\n");
        let snap = read_snapshot_header(&mut lines).unwrap();
        assert_eq!(snap, Snapshot { sec: 5, nsec: 6 });
        assert_eq!(lines.next(), Some((4, "x 1")));

        let err = read_snapshot_header(&mut numbered_lines("")).unwrap_err();
        assert_eq!(err.line, 0);
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(SampleError::NotFound.class(), ErrorClass::TransientMissing);
        assert_eq!(
            SampleError::from_io(io::Error::new(io::ErrorKind::NotFound, "x")).class(),
            ErrorClass::TransientMissing
        );
        assert_eq!(
            SampleError::Malformed(ParseError::new(1, "x")).class(),
            ErrorClass::MalformedInput
        );
        assert_eq!(
            SampleError::Exhausted { appended: 3 }.class(),
            ErrorClass::ResourceExhausted
        );
        assert_eq!(
            SampleError::Registry(RegistryError::Exhausted("sinks".into())).class(),
            ErrorClass::AllocationFailure
        );
    }
}
