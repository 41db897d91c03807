//! Multi-section histogram files: `rpc_stats` and `brw_stats`.
//!
//! `rpc_stats` sections are found by their label:
//!
//! ```text
//! snapshot_time:         1700000000.123456789 (secs.nsecs)
//! read RPCs in flight:  0
//!
//!                         read                    write
//! pages per rpc         rpcs   % cum % |       rpcs   % cum %
//! 1:                       0   0   0   |          2  50  50
//! 256:                     1 100 100   |          2  50 100
//! ```
//!
//! `brw_stats` sections start after a `read | write` banner and name
//! themselves; bins may carry a K/M/G suffix:
//!
//! ```text
//!                            read      |     write
//! disk I/O size          ios   % cum % |  ios         % cum %
//! 4K:                      0   0   0   |    5  50  50
//! 1M:                      1 100 100   |    5  50 100
//! ```

use crate::collector::binder::{SinkNaming, Transaction};
use crate::collector::parser::{
    ParseError, SampleError, SampleOutcome, SinkSlot, Snapshot, StatFormat, commit_exhausted,
    identity_schema, is_timestamp_line, next_record, parse_snapshot_line,
};
use crate::registry::{FieldDef, RecordTemplate, SchemaTemplate};

/// Sections of `rpc_stats`, in file order.
pub const RPC_SECTIONS: &[&str] = &["pages per rpc", "rpcs in flight", "offset"];

const BRW_BANNER: &str = "read | write";

/// One histogram data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramBin {
    pub bin: u64,
    pub read_count: u64,
    pub write_count: u64,
}

/// Why a labeled-bin line was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinLineError {
    /// Bin label with an unknown unit; only this line is dropped.
    UnknownSuffix(String),
    /// Line does not have the histogram shape.
    Malformed(String),
}

/// Collapses whitespace runs to single spaces and trims the ends.
fn normalize(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_u64(text: &str) -> Option<u64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Parses the `<read> ... | <write> ...` counters after the bin.
fn parse_counts(rest: &str) -> Result<(u64, u64), String> {
    let (read, write) = rest
        .split_once('|')
        .ok_or_else(|| "missing '|' separator".to_string())?;
    let read_count = first_u64(read).ok_or_else(|| "invalid read count".to_string())?;
    let write_count = first_u64(write).ok_or_else(|| "invalid write count".to_string())?;
    Ok((read_count, write_count))
}

/// Parses an `rpc_stats` data line: `<bin>: <read> ... | <write> ...`.
pub fn parse_rpc_bin_line(line: &str) -> Result<HistogramBin, String> {
    let (bin, rest) = line
        .split_once(':')
        .ok_or_else(|| format!("missing ':' in '{}'", line.trim()))?;
    let bin = bin
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid bin '{}'", bin.trim()))?;
    let (read_count, write_count) = parse_counts(rest)?;
    Ok(HistogramBin {
        bin,
        read_count,
        write_count,
    })
}

/// Scales a bin value by its label: `:` is 1, `K`, `M` and `G` are powers
/// of 1024.
pub fn parse_bin_label(value: u64, label: &str) -> Result<u64, String> {
    let multiplier: u64 = match label.chars().next() {
        Some(':') => 1,
        Some('K') => 1 << 10,
        Some('M') => 1 << 20,
        Some('G') => 1 << 30,
        _ => return Err(format!("unknown bin suffix '{label}'")),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("bin {value}{label} overflows"))
}

/// Parses a `brw_stats` data line: `<n><suffix> <read> ... | <write> ...`.
pub fn parse_labeled_bin_line(line: &str) -> Result<HistogramBin, BinLineError> {
    let line = line.trim_start();
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(BinLineError::Malformed(format!(
            "no bin value in '{}'",
            line.trim_end()
        )));
    }
    let value = line[..digits]
        .parse::<u64>()
        .map_err(|_| BinLineError::Malformed(format!("bin '{}' out of range", &line[..digits])))?;

    let rest = line[digits..].trim_start();
    let label_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let (label, counts) = rest.split_at(label_len);
    if label.is_empty() {
        return Err(BinLineError::Malformed("missing bin label".to_string()));
    }
    let (read_count, write_count) = parse_counts(counts).map_err(BinLineError::Malformed)?;
    let bin = parse_bin_label(value, label).map_err(BinLineError::UnknownSuffix)?;
    Ok(HistogramBin {
        bin,
        read_count,
        write_count,
    })
}

/// Metric name of a `brw_stats` section: text before the first `%`, with
/// every whitespace run turned into `_`. The run before the `%` is kept, so
/// names end in `_` (`pages_per_bulk_r/w_rpcs_`).
fn section_name(line: &str) -> String {
    let head = line.split('%').next().unwrap_or("");
    let mut name = String::with_capacity(head.len());
    let mut in_space = false;
    for c in head.chars() {
        if c.is_whitespace() {
            if !in_space {
                name.push('_');
            }
            in_space = true;
        } else {
            name.push(c);
            in_space = false;
        }
    }
    name
}

fn raw_lines(content: &str) -> impl Iterator<Item = (usize, &str)> + Clone {
    content.lines().enumerate().map(|(idx, line)| (idx + 1, line))
}

/// Reads the header. Also reports whether anything but the header and
/// timestamp lines follows it.
fn open_histogram(
    content: &str,
) -> Result<(Snapshot, bool, impl Iterator<Item = (usize, &str)> + Clone), ParseError> {
    let mut lines = raw_lines(content);
    let (no, header) = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or_else(|| ParseError::new(0, "empty file"))?;
    let snapshot = parse_snapshot_line(header).map_err(|msg| ParseError::new(no, msg))?;
    let has_data = lines
        .clone()
        .any(|(_, l)| !l.trim().is_empty() && !is_timestamp_line(l));
    Ok((snapshot, has_data, lines))
}

fn begin_histogram(tx: &Transaction<'_>, snapshot: Snapshot) -> Result<(), SampleError> {
    tx.set("snapshot_sec", snapshot.sec)?;
    tx.set("snapshot_ns", snapshot.nsec)?;
    tx.clear_list()?;
    Ok(())
}

fn histogram_schema(name: &str, naming: SinkNaming, capacity: usize) -> SchemaTemplate {
    identity_schema(name, naming)
        .field(FieldDef::u64("snapshot_sec"))
        .field(FieldDef::u64("snapshot_ns"))
        .list(
            "metric_list",
            RecordTemplate::new(vec![
                FieldDef::str("metric_name"),
                FieldDef::u64("bin"),
                FieldDef::u64("read_count"),
                FieldDef::u64("write_count"),
            ]),
            capacity,
        )
}

/// Appends one bin record. `Ok(false)` means the pool is exhausted.
fn append_bin(tx: &Transaction<'_>, metric: &str, bin: HistogramBin) -> Result<bool, SampleError> {
    let Some(mut record) = next_record(tx)? else {
        return Ok(false);
    };
    record.set("metric_name", metric)?;
    record.set("bin", bin.bin)?;
    record.set("read_count", bin.read_count)?;
    record.set("write_count", bin.write_count)?;
    tx.append(record)?;
    Ok(true)
}

/// `rpc_stats`: fixed, ordered section labels.
#[derive(Debug, Clone, Copy)]
pub struct RpcHistogramFormat {
    sections: &'static [&'static str],
}

impl RpcHistogramFormat {
    pub fn new(sections: &'static [&'static str]) -> Self {
        Self { sections }
    }
}

impl Default for RpcHistogramFormat {
    fn default() -> Self {
        Self::new(RPC_SECTIONS)
    }
}

impl StatFormat for RpcHistogramFormat {
    fn kind(&self) -> &'static str {
        "rpc_stats"
    }

    fn schema(&self, name: &str, naming: SinkNaming, capacity: usize) -> SchemaTemplate {
        histogram_schema(name, naming, capacity)
    }

    fn sample(&self, content: &str, sink: &mut SinkSlot<'_>) -> Result<SampleOutcome, SampleError> {
        let (snapshot, has_data, mut lines) = open_histogram(content)?;
        if !has_data && !sink.is_bound() {
            return Ok(SampleOutcome::default());
        }

        let sink = sink.get_or_create()?;
        let tx = sink.begin()?;
        begin_histogram(&tx, snapshot)?;

        let mut outcome = SampleOutcome::default();
        'sections: for label in self.sections {
            // Running out of lines before a section is a clean end.
            let found = lines
                .by_ref()
                .any(|(_, l)| l.starts_with(label) || normalize(l).starts_with(label));
            if !found {
                break 'sections;
            }
            let metric = label.replace(' ', "_");
            for (no, line) in lines.by_ref() {
                if line.trim().is_empty() {
                    continue 'sections;
                }
                let bin = parse_rpc_bin_line(line).map_err(|msg| ParseError::new(no, msg))?;
                if !append_bin(&tx, &metric, bin)? {
                    return Err(commit_exhausted(tx, outcome.records));
                }
                outcome.records += 1;
            }
        }

        tx.commit()?;
        outcome.committed = true;
        Ok(outcome)
    }
}

/// `brw_stats`: self-named sections with suffixed bins.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrwHistogramFormat;

impl StatFormat for BrwHistogramFormat {
    fn kind(&self) -> &'static str {
        "brw_stats"
    }

    fn schema(&self, name: &str, naming: SinkNaming, capacity: usize) -> SchemaTemplate {
        histogram_schema(name, naming, capacity)
    }

    fn sample(&self, content: &str, sink: &mut SinkSlot<'_>) -> Result<SampleOutcome, SampleError> {
        let (snapshot, has_data, mut lines) = open_histogram(content)?;
        if !has_data && !sink.is_bound() {
            return Ok(SampleOutcome::default());
        }

        let sink = sink.get_or_create()?;
        let tx = sink.begin()?;
        begin_histogram(&tx, snapshot)?;

        let mut outcome = SampleOutcome::default();
        'sections: loop {
            if !lines.by_ref().any(|(_, l)| normalize(l) == BRW_BANNER) {
                break;
            }
            let Some((no, title)) = lines.next() else {
                break;
            };
            let metric = section_name(title);
            if metric.trim_matches('_').is_empty() {
                return Err(ParseError::new(no, "histogram without a name").into());
            }
            for (no, line) in lines.by_ref() {
                if line.trim().is_empty() {
                    continue 'sections;
                }
                let bin = match parse_labeled_bin_line(line) {
                    Ok(bin) => bin,
                    Err(BinLineError::UnknownSuffix(_)) => {
                        outcome.skipped_lines += 1;
                        continue;
                    }
                    Err(BinLineError::Malformed(msg)) => {
                        return Err(ParseError::new(no, msg).into());
                    }
                };
                if !append_bin(&tx, &metric, bin)? {
                    return Err(commit_exhausted(tx, outcome.records));
                }
                outcome.records += 1;
            }
            break;
        }

        tx.commit()?;
        outcome.committed = true;
        Ok(outcome)
    }
}
