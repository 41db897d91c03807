//! `stats` and `md_stats` files.
//!
//! ```text
//! snapshot_time             1700000000.123456789 secs.nsecs
//! read_bytes                12 samples [bytes] 4096 1048576 8388608 6291456000
//! write_bytes               3 samples [bytes] 4096 4096 12288 50331648
//! ost_setattr               2 samples [reqs]
//! ```

use crate::collector::binder::SinkNaming;
use crate::collector::parser::{
    ParseError, SampleError, SampleOutcome, SinkSlot, StatFormat, commit_exhausted,
    identity_schema, is_timestamp_line, next_record, numbered_lines, read_snapshot_header,
};
use crate::registry::{FieldDef, RecordTemplate, SchemaTemplate};

/// One counter line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatLine {
    pub name: String,
    pub count: u64,
    pub sum: u64,
    pub sum2: u64,
}

/// Parses `<name> <count> [samples [<unit>] <min> <max> [<sum> [<sum2>]]]`.
///
/// Only the name and count are required. Parsing of the optional tail stops
/// at the first token that does not fit, leaving the remaining values zero.
pub fn parse_stat_line(line: &str) -> Result<StatLine, String> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next().ok_or_else(|| "empty line".to_string())?;
    let count_token = tokens
        .next()
        .ok_or_else(|| format!("'{name}' has no count"))?;
    let count = count_token
        .parse::<u64>()
        .map_err(|_| format!("'{name}' has invalid count '{count_token}'"))?;

    let mut stat = StatLine {
        name: name.to_string(),
        count,
        sum: 0,
        sum2: 0,
    };

    let rest: Vec<&str> = tokens.collect();
    if rest.first() != Some(&"samples") || !rest.get(1).is_some_and(|t| t.starts_with('[')) {
        return Ok(stat);
    }
    let Some(unit_end) = rest.iter().skip(1).position(|t| t.ends_with(']')) else {
        return Ok(stat);
    };
    // min and max precede sum and sum2
    let mut values = rest[unit_end + 2..].iter().skip(2).map(|t| t.parse::<u64>());
    if let Some(Ok(sum)) = values.next() {
        stat.sum = sum;
        if let Some(Ok(sum2)) = values.next() {
            stat.sum2 = sum2;
        }
    }
    Ok(stat)
}

/// Snapshot header plus one record per counter line.
#[derive(Debug, Clone, Copy)]
pub struct StatsFormat {
    /// Whether records carry the sum of squares.
    pub with_sum2: bool,
}

impl StatsFormat {
    pub fn new(with_sum2: bool) -> Self {
        Self { with_sum2 }
    }
}

impl StatFormat for StatsFormat {
    fn kind(&self) -> &'static str {
        "stats"
    }

    fn schema(&self, name: &str, naming: SinkNaming, capacity: usize) -> SchemaTemplate {
        let mut record = vec![
            FieldDef::str("metric_name"),
            FieldDef::u64("count"),
            FieldDef::u64("sum"),
        ];
        if self.with_sum2 {
            record.push(FieldDef::u64("sum2"));
        }
        identity_schema(name, naming)
            .field(FieldDef::u64("snapshot_sec"))
            .field(FieldDef::u64("snapshot_ns"))
            .list("metric_list", RecordTemplate::new(record), capacity)
    }

    fn sample(&self, content: &str, sink: &mut SinkSlot<'_>) -> Result<SampleOutcome, SampleError> {
        let mut lines = numbered_lines(content);
        let snapshot = read_snapshot_header(&mut lines)?;
        let mut data = lines.filter(|(_, line)| !is_timestamp_line(line)).peekable();

        if data.peek().is_none() && !sink.is_bound() {
            return Ok(SampleOutcome::default());
        }

        let sink = sink.get_or_create()?;
        let tx = sink.begin()?;
        tx.set("snapshot_sec", snapshot.sec)?;
        tx.set("snapshot_ns", snapshot.nsec)?;
        tx.clear_list()?;

        let mut outcome = SampleOutcome::default();
        for (no, line) in data {
            let stat = parse_stat_line(line).map_err(|msg| ParseError::new(no, msg))?;
            let Some(mut record) = next_record(&tx)? else {
                return Err(commit_exhausted(tx, outcome.records));
            };
            record.set("metric_name", stat.name)?;
            record.set("count", stat.count)?;
            record.set("sum", stat.sum)?;
            if self.with_sum2 {
                record.set("sum2", stat.sum2)?;
            }
            tx.append(record)?;
            outcome.records += 1;
        }

        tx.commit()?;
        outcome.committed = true;
        Ok(outcome)
    }
}
