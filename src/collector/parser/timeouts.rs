//! `timeouts` files of client imports.
//!
//! ```text
//! last reply : 1700000000, 5s ago
//! network    : cur   5  worst   5 (at 1699999000, 1000s ago)   5   5   5   5
//! portal 28  : cur  10  worst  15 (at 1699999000, 1000s ago)  10   5   5   5
//! ```

use tracing::warn;

use crate::collector::binder::SinkNaming;
use crate::collector::parser::{
    ParseError, SampleError, SampleOutcome, SinkSlot, StatFormat, commit_exhausted,
    identity_schema, next_record, numbered_lines,
};
use crate::registry::{FieldDef, RecordTemplate, SchemaTemplate};

/// Portal number stored for keys that are neither `network` nor `portal N`.
pub const UNKNOWN_PORTAL: i64 = -1;

/// One per-portal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutLine {
    pub key: String,
    pub portal: i64,
    pub current: u64,
    pub last: u64,
}

/// Parses the `last reply : <sec>` header.
pub fn parse_last_reply(line: &str) -> Result<u64, String> {
    let (key, value) = line
        .split_once(':')
        .ok_or_else(|| "expected 'last reply :' header".to_string())?;
    if key.trim() != "last reply" {
        return Err(format!("expected 'last reply', got '{}'", key.trim()));
    }
    let digits: String = value
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits
        .parse()
        .map_err(|_| format!("invalid last reply time '{}'", value.trim()))
}

fn portal_of(key: &str) -> i64 {
    if key == "network" {
        return 0;
    }
    key.strip_prefix("portal")
        .and_then(|n| n.trim().parse::<i64>().ok())
        .unwrap_or(UNKNOWN_PORTAL)
}

/// Parses `<key> : cur <n> worst <n> (at <t>, <age> ago) <a> <b> <c> <d>`.
///
/// `current` is the value after `cur`; `last` is the fourth value after
/// the closing parenthesis.
pub fn parse_timeout_line(line: &str) -> Result<TimeoutLine, String> {
    let (key, rest) = line
        .split_once(':')
        .ok_or_else(|| format!("missing ':' in '{}'", line.trim()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("missing key".to_string());
    }

    let mut tokens = rest.split_whitespace();
    if tokens.next() != Some("cur") {
        return Err(format!("'{key}' has no 'cur' value"));
    }
    let current = tokens
        .next()
        .and_then(|t| t.parse::<u64>().ok())
        .ok_or_else(|| format!("'{key}' has invalid 'cur' value"))?;

    let (_, history) = rest
        .split_once(')')
        .ok_or_else(|| format!("'{key}' has no ')'"))?;
    let last = history
        .split_whitespace()
        .nth(3)
        .and_then(|t| t.parse::<u64>().ok())
        .ok_or_else(|| format!("'{key}' has no last value"))?;

    Ok(TimeoutLine {
        key: key.to_string(),
        portal: portal_of(key),
        current,
        last,
    })
}

/// `last reply` header plus one record per portal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutsFormat;

impl StatFormat for TimeoutsFormat {
    fn kind(&self) -> &'static str {
        "timeouts"
    }

    fn schema(&self, name: &str, naming: SinkNaming, capacity: usize) -> SchemaTemplate {
        identity_schema(name, naming)
            .field(FieldDef::u64("snapshot_sec"))
            .list(
                "metric_list",
                RecordTemplate::new(vec![
                    FieldDef::s64("portal"),
                    FieldDef::u64("current"),
                    FieldDef::u64("last"),
                ]),
                capacity,
            )
    }

    fn sample(&self, content: &str, sink: &mut SinkSlot<'_>) -> Result<SampleOutcome, SampleError> {
        let mut lines = numbered_lines(content);
        let (no, header) = lines
            .next()
            .ok_or_else(|| ParseError::new(0, "empty file"))?;
        let last_reply = parse_last_reply(header).map_err(|msg| ParseError::new(no, msg))?;

        let sink = sink.get_or_create()?;
        let tx = sink.begin()?;
        tx.set("snapshot_sec", last_reply)?;
        tx.clear_list()?;

        let mut outcome = SampleOutcome::default();
        for (no, line) in lines {
            let timeout = parse_timeout_line(line).map_err(|msg| ParseError::new(no, msg))?;
            if timeout.portal == UNKNOWN_PORTAL {
                warn!(
                    "{}: unrecognized portal '{}', stored as {}",
                    sink.name(),
                    timeout.key,
                    UNKNOWN_PORTAL
                );
            }
            let Some(mut record) = next_record(&tx)? else {
                return Err(commit_exhausted(tx, outcome.records));
            };
            record.set("portal", timeout.portal)?;
            record.set("current", timeout.current)?;
            record.set("last", timeout.last)?;
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
    use crate::collector::identity::parse_server_name;
    use crate::collector::parser::testing::bind;
    use crate::registry::Value;

    const TIMEOUTS: &str = "\
last reply : 1700000000, 5s ago
network    : cur   5  worst   5 (at 1699999000, 1000s ago)   5   5   5   5
portal 28  : cur  10  worst  15 (at 1699999000, 1000s ago)  10   5   5   7
ldlm_cbd   : cur   1  worst   1 (at 1699999000, 1000s ago)   1   1   1   1
";

    #[test]
    fn test_parse_last_reply() {
        assert_eq!(parse_last_reply("last reply : 1700000000, 5s ago"), Ok(1700000000));
        assert!(parse_last_reply("network : cur 5").is_err());
        assert!(parse_last_reply("last reply : never").is_err());
    }

    #[test]
    fn test_parse_timeout_line() {
        let line = parse_timeout_line(
            "portal 28  : cur  10  worst  15 (at 1699999000, 1000s ago)  10   5   5   7",
        )
        .unwrap();
        assert_eq!(line.portal, 28);
        assert_eq!(line.current, 10);
        assert_eq!(line.last, 7);

        let line = parse_timeout_line(
            "network    : cur   5  worst   5 (at 1699999000, 1000s ago)   5   5   5   5",
        )
        .unwrap();
        assert_eq!(line.portal, 0);
        assert_eq!(portal_of("ldlm_cbd"), UNKNOWN_PORTAL);
    }

    #[test]
    fn test_parse_timeout_line_errors() {
        assert!(parse_timeout_line("portal 28 cur 10").is_err());
        assert!(parse_timeout_line(" : cur 1 (at 1, 1s ago) 1 1 1 1").is_err());
        assert!(parse_timeout_line("network : cur 5 worst 5 (at 1, 1s ago) 5 5").is_err());
    }

    #[test]
    fn test_sample_timeouts() {
        let format = TimeoutsFormat;
        let (registry, binder) = bind(&format, SinkNaming::PerServer, 16);
        let identity = parse_server_name("testfs-OST0000-osc-ffff").unwrap();
        let mut slot = None;

        let outcome = format
            .sample(TIMEOUTS, &mut SinkSlot::new(&mut slot, &binder, &identity))
            .unwrap();
        assert_eq!(outcome.records, 3);

        let snap = registry.snapshot(slot.as_ref().unwrap().id()).unwrap();
        assert_eq!(snap.fields.get("snapshot_sec"), Some(&Value::U64(1700000000)));
        assert_eq!(snap.records[1].get("portal"), Some(&Value::S64(28)));
        assert_eq!(snap.records[2].get("portal"), Some(&Value::S64(-1)));
    }

    #[test]
    fn test_bad_header_opens_no_transaction() {
        let format = TimeoutsFormat;
        let (registry, binder) = bind(&format, SinkNaming::PerServer, 16);
        let identity = parse_server_name("testfs-OST0000-osc-ffff").unwrap();
        let mut slot = None;

        let err = format
            .sample(
                "network : cur 5\n",
                &mut SinkSlot::new(&mut slot, &binder, &identity),
            )
            .unwrap_err();
        assert!(matches!(err, SampleError::Malformed(ParseError { line: 1, .. })));
        assert!(slot.is_none());
        assert_eq!(registry.open_transactions(), 0);
    }
}
