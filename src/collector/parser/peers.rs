//! LNet `peers` table.
//!
//! ```text
//! nid                      refs state  last   max   rtr   min    tx   min queue
//! 0@lo                        1    NA    -1     0     0     0     0     0 0
//! 10.0.0.2@tcp                2    up    45     8     8     8     8     6 0
//! ```

use crate::collector::binder::SinkNaming;
use crate::collector::parser::{
    ParseError, SampleError, SampleOutcome, SinkSlot, StatFormat, commit_exhausted,
    identity_schema, next_record, numbered_lines,
};
use crate::registry::{FieldDef, RecordTemplate, SchemaTemplate};

const COLUMNS: usize = 10;

/// Integer columns after `state`, in file order.
const COUNTERS: [&str; 7] = ["last", "max", "rtr", "min_rtr", "tx", "min_tx", "queue"];

/// One peer row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRow {
    pub nid: String,
    pub refs: i64,
    pub state: String,
    /// Values of `COUNTERS`, in order.
    pub counters: [i64; 7],
}

/// Parses one row of exactly ten whitespace-separated columns.
pub fn parse_peer_row(line: &str) -> Result<PeerRow, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != COLUMNS {
        return Err(format!(
            "expected {COLUMNS} columns, got {}",
            tokens.len()
        ));
    }
    let int = |idx: usize| {
        tokens[idx]
            .parse::<i64>()
            .map_err(|_| format!("column {} of '{}' is not an integer", idx + 1, tokens[0]))
    };

    let mut counters = [0i64; 7];
    for (offset, value) in counters.iter_mut().enumerate() {
        *value = int(3 + offset)?;
    }
    Ok(PeerRow {
        nid: tokens[0].to_string(),
        refs: int(1)?,
        state: tokens[2].to_string(),
        counters,
    })
}

/// Ignored header line plus one record per peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeersFormat;

impl StatFormat for PeersFormat {
    fn kind(&self) -> &'static str {
        "peers"
    }

    fn schema(&self, name: &str, naming: SinkNaming, capacity: usize) -> SchemaTemplate {
        let mut record = vec![
            FieldDef::str("nid"),
            FieldDef::s64("refs"),
            FieldDef::str("state"),
        ];
        record.extend(COUNTERS.iter().map(|name| FieldDef::s64(*name)));
        identity_schema(name, naming).list("metric_list", RecordTemplate::new(record), capacity)
    }

    fn sample(&self, content: &str, sink: &mut SinkSlot<'_>) -> Result<SampleOutcome, SampleError> {
        let mut lines = numbered_lines(content);
        if lines.next().is_none() {
            return Err(ParseError::new(0, "empty file").into());
        }

        let sink = sink.get_or_create()?;
        let tx = sink.begin()?;
        tx.clear_list()?;

        let mut outcome = SampleOutcome::default();
        for (no, line) in lines {
            let row = parse_peer_row(line).map_err(|msg| ParseError::new(no, msg))?;
            let Some(mut record) = next_record(&tx)? else {
                return Err(commit_exhausted(tx, outcome.records));
            };
            record.set("nid", row.nid)?;
            record.set("refs", row.refs)?;
            record.set("state", row.state)?;
            for (name, value) in COUNTERS.iter().zip(row.counters) {
                record.set(name, value)?;
            }
            tx.append(record)?;
            outcome.records += 1;
        }

        tx.commit()?;
        outcome.committed = true;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::identity::Identity;
    use crate::collector::parser::testing::bind;
    use crate::registry::Value;

    const PEERS: &str = "\
nid                      refs state  last   max   rtr   min    tx   min queue
0@lo                        1    NA    -1     0     0     0     0     0 0
10.0.0.2@tcp                2    up    45     8     8     8     8     6 0
";

    #[test]
    fn test_parse_peer_row() {
        let row = parse_peer_row("10.0.0.2@tcp 2 up 45 8 8 8 8 6 0").unwrap();
        assert_eq!(row.nid, "10.0.0.2@tcp");
        assert_eq!(row.refs, 2);
        assert_eq!(row.state, "up");
        assert_eq!(row.counters, [45, 8, 8, 8, 8, 6, 0]);

        let row = parse_peer_row("0@lo 1 NA -1 0 0 0 0 0 0").unwrap();
        assert_eq!(row.counters[0], -1);
    }

    #[test]
    fn test_parse_peer_row_rejects_column_mismatch() {
        assert!(parse_peer_row("0@lo 1 NA -1 0 0 0 0 0").is_err());
        assert!(parse_peer_row("0@lo 1 NA -1 0 0 0 0 0 0 9").is_err());
        assert!(parse_peer_row("0@lo one NA -1 0 0 0 0 0 0").is_err());
    }

    #[test]
    fn test_sample_peers_creates_sink_lazily() {
        let format = PeersFormat;
        let (registry, binder) = bind(&format, SinkNaming::SingleSource, 8);
        let identity = Identity::single_source();
        let mut slot = None;

        let outcome = format
            .sample(PEERS, &mut SinkSlot::new(&mut slot, &binder, &identity))
            .unwrap();
        assert_eq!(outcome.records, 2);

        let sink = slot.as_ref().unwrap();
        assert_eq!(sink.name(), "node1/lustre_fulldump");
        let snap = registry.snapshot(sink.id()).unwrap();
        assert_eq!(snap.records[1].get("state"), Some(&Value::from("up")));
        assert_eq!(snap.records[1].get("min_tx"), Some(&Value::S64(6)));
        assert!(!snap.fields.contains_key("fs_name"));
    }

    #[test]
    fn test_short_row_rolls_back() {
        let format = PeersFormat;
        let (registry, binder) = bind(&format, SinkNaming::SingleSource, 8);
        let identity = Identity::single_source();
        let mut slot = None;

        let err = format
            .sample(
                "nid refs state last max rtr min tx min queue\n0@lo 1 NA\n",
                &mut SinkSlot::new(&mut slot, &binder, &identity),
            )
            .unwrap_err();
        assert!(matches!(err, SampleError::Malformed(ParseError { line: 2, .. })));
        let snap = registry.snapshot(slot.as_ref().unwrap().id()).unwrap();
        assert_eq!(snap.commits, 0);
        assert_eq!(registry.open_transactions(), 0);
    }

    #[test]
    fn test_empty_file_is_malformed() {
        let format = PeersFormat;
        let (registry, binder) = bind(&format, SinkNaming::SingleSource, 8);
        let identity = Identity::single_source();
        let mut slot = None;
        let err = format
            .sample("", &mut SinkSlot::new(&mut slot, &binder, &identity))
            .unwrap_err();
        assert_eq!(err.class(), crate::collector::parser::ErrorClass::MalformedInput);
        assert_eq!(registry.live_sinks(), 0);
    }
}
