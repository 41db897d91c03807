//! In-memory metric registry.
//!
//! Keeps a committed view and, while a transaction is open, a staged copy of
//! each sink. Readers only ever see committed data.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::trace;

use super::schema::{Record, SchemaHandle, SchemaId, SchemaTemplate, Value};
use super::{MetricRegistry, RegistryError, SinkId, TxOutcome};

type RecordData = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
struct SinkData {
    fields: BTreeMap<String, Value>,
    records: Vec<RecordData>,
}

#[derive(Debug)]
struct SinkState {
    name: String,
    schema: Arc<SchemaTemplate>,
    committed: SinkData,
    staged: Option<SinkData>,
    /// Records handed out by allocate_record but not yet appended.
    outstanding: usize,
    commits: u64,
}

impl SinkState {
    fn working(&mut self) -> &mut SinkData {
        self.staged.as_mut().unwrap_or(&mut self.committed)
    }

    fn pool_in_use(&self) -> usize {
        let data = self.staged.as_ref().unwrap_or(&self.committed);
        data.records.len() + self.outstanding
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    next_schema: u64,
    next_sink: u64,
    schemas: HashMap<SchemaId, Arc<SchemaTemplate>>,
    sinks: BTreeMap<SinkId, SinkState>,
    names: HashMap<String, SinkId>,
    sink_limit: Option<usize>,
}

impl RegistryState {
    fn sink(&mut self, id: SinkId) -> Result<&mut SinkState, RegistryError> {
        self.sinks.get_mut(&id).ok_or(RegistryError::UnknownSink(id))
    }
}

/// Committed contents of one sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkSnapshot {
    pub name: String,
    pub schema: String,
    /// Number of committed transactions so far.
    pub commits: u64,
    pub fields: BTreeMap<String, Value>,
    pub records: Vec<BTreeMap<String, Value>>,
}

/// Thread-safe in-memory registry. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of live sinks; creation beyond it fails with
    /// `RegistryError::Exhausted`.
    pub fn with_sink_limit(self, limit: usize) -> Self {
        self.state().sink_limit = Some(limit);
        self
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Looks up a live sink by instance name.
    pub fn sink_by_name(&self, name: &str) -> Option<SinkId> {
        self.state().names.get(name).copied()
    }

    /// Committed view of one sink.
    pub fn snapshot(&self, id: SinkId) -> Option<SinkSnapshot> {
        let state = self.state();
        state.sinks.get(&id).map(|sink| SinkSnapshot {
            name: sink.name.clone(),
            schema: sink.schema.name.clone(),
            commits: sink.commits,
            fields: sink.committed.fields.clone(),
            records: sink.committed.records.clone(),
        })
    }

    /// Committed view of a sink by name.
    pub fn snapshot_by_name(&self, name: &str) -> Option<SinkSnapshot> {
        self.sink_by_name(name).and_then(|id| self.snapshot(id))
    }

    /// Committed views of every live sink, in creation order.
    pub fn published(&self) -> Vec<SinkSnapshot> {
        let ids: Vec<SinkId> = self.state().sinks.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.snapshot(id)).collect()
    }

    /// Instance names of all live sinks, sorted.
    pub fn sink_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().names.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn live_sinks(&self) -> usize {
        self.state().sinks.len()
    }

    /// Number of sinks with a transaction currently open.
    pub fn open_transactions(&self) -> usize {
        self.state()
            .sinks
            .values()
            .filter(|s| s.staged.is_some())
            .count()
    }
}

impl MetricRegistry for MemoryRegistry {
    fn define_schema(&self, template: SchemaTemplate) -> Result<SchemaHandle, RegistryError> {
        template.validate()?;
        let mut state = self.state();
        let id = SchemaId(state.next_schema);
        state.next_schema += 1;
        let template = Arc::new(template);
        state.schemas.insert(id, template.clone());
        trace!("defined schema {} ({:?})", template.name, id);
        Ok(SchemaHandle::new(id, template))
    }

    fn create_sink(&self, name: &str, schema: &SchemaHandle) -> Result<SinkId, RegistryError> {
        let mut state = self.state();
        let template = state
            .schemas
            .get(&schema.id())
            .cloned()
            .ok_or(RegistryError::UnknownSchema(schema.id()))?;
        if state.names.contains_key(name) {
            return Err(RegistryError::DuplicateSink(name.to_string()));
        }
        if let Some(limit) = state.sink_limit
            && state.sinks.len() >= limit
        {
            return Err(RegistryError::Exhausted("sink table".to_string()));
        }
        let id = SinkId(state.next_sink);
        state.next_sink += 1;
        state.sinks.insert(
            id,
            SinkState {
                name: name.to_string(),
                schema: template,
                committed: SinkData::default(),
                staged: None,
                outstanding: 0,
                commits: 0,
            },
        );
        state.names.insert(name.to_string(), id);
        Ok(id)
    }

    fn destroy_sink(&self, sink: SinkId) {
        let mut state = self.state();
        if let Some(removed) = state.sinks.remove(&sink) {
            state.names.remove(&removed.name);
        }
    }

    fn begin_transaction(&self, sink: SinkId) -> Result<(), RegistryError> {
        let mut state = self.state();
        let sink_state = state.sink(sink)?;
        if sink_state.staged.is_some() {
            return Err(RegistryError::TransactionActive(sink));
        }
        sink_state.staged = Some(sink_state.committed.clone());
        sink_state.outstanding = 0;
        Ok(())
    }

    fn end_transaction(&self, sink: SinkId, outcome: TxOutcome) -> Result<(), RegistryError> {
        let mut state = self.state();
        let sink_state = state.sink(sink)?;
        let staged = sink_state
            .staged
            .take()
            .ok_or(RegistryError::NoTransaction(sink))?;
        sink_state.outstanding = 0;
        if outcome == TxOutcome::Commit {
            sink_state.committed = staged;
            sink_state.commits += 1;
        }
        Ok(())
    }

    fn set_field(&self, sink: SinkId, field: &str, value: Value) -> Result<(), RegistryError> {
        let mut state = self.state();
        let sink_state = state.sink(sink)?;
        let def = sink_state
            .schema
            .field_def(field)
            .ok_or_else(|| RegistryError::UnknownField {
                schema: sink_state.schema.name.clone(),
                field: field.to_string(),
            })?;
        if def.kind != value.kind() {
            return Err(RegistryError::TypeMismatch {
                field: field.to_string(),
                expected: def.kind,
                actual: value.kind(),
            });
        }
        sink_state.working().fields.insert(field.to_string(), value);
        Ok(())
    }

    fn list_clear(&self, sink: SinkId) -> Result<(), RegistryError> {
        let mut state = self.state();
        let sink_state = state.sink(sink)?;
        if sink_state.schema.list.is_none() {
            return Err(RegistryError::UnknownField {
                schema: sink_state.schema.name.clone(),
                field: "list".to_string(),
            });
        }
        sink_state.working().records.clear();
        Ok(())
    }

    fn allocate_record(&self, sink: SinkId) -> Result<Record, RegistryError> {
        let mut state = self.state();
        let sink_state = state.sink(sink)?;
        let Some(list) = &sink_state.schema.list else {
            return Err(RegistryError::UnknownField {
                schema: sink_state.schema.name.clone(),
                field: "list".to_string(),
            });
        };
        if sink_state.pool_in_use() >= list.capacity {
            return Err(RegistryError::Exhausted(format!(
                "record pool of '{}'",
                sink_state.name
            )));
        }
        let record = Record::blank(sink_state.schema.clone()).ok_or_else(|| {
            RegistryError::UnknownField {
                schema: sink_state.schema.name.clone(),
                field: "list".to_string(),
            }
        })?;
        sink_state.outstanding += 1;
        Ok(record)
    }

    fn list_append_record(&self, sink: SinkId, record: Record) -> Result<(), RegistryError> {
        let mut state = self.state();
        let sink_state = state.sink(sink)?;
        if record.schema_name() != sink_state.schema.name {
            return Err(RegistryError::UnknownField {
                schema: sink_state.schema.name.clone(),
                field: format!("record of '{}'", record.schema_name()),
            });
        }
        sink_state.outstanding = sink_state.outstanding.saturating_sub(1);
        let data: RecordData = record
            .entries()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        sink_state.working().records.push(data);
        Ok(())
    }
}
