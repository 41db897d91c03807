//! Metric registry contract.
//!
//! The sampler never publishes anything itself. It defines schemas, creates
//! named sinks, and writes to them inside transactions; the registry decides
//! what a committed sink looks like to consumers. `MemoryRegistry` is the
//! in-process implementation used by the daemon and the tests.

mod memory;
mod schema;

use thiserror::Error;

pub use memory::{MemoryRegistry, SinkSnapshot};
pub use schema::{
    FieldDef, ListDef, Record, RecordTemplate, SchemaHandle, SchemaId, SchemaTemplate, Value,
    ValueKind,
};

/// Registry-assigned sink identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct SinkId(pub(crate) u64);

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

/// How a transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Commit,
    Rollback,
}

/// Errors reported by a registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown schema {0:?}")]
    UnknownSchema(SchemaId),
    #[error("unknown sink {0}")]
    UnknownSink(SinkId),
    #[error("invalid schema '{schema}': {reason}")]
    InvalidSchema { schema: String, reason: String },
    #[error("sink '{0}' already exists")]
    DuplicateSink(String),
    #[error("no open transaction on {0}")]
    NoTransaction(SinkId),
    #[error("transaction already open on {0}")]
    TransactionActive(SinkId),
    #[error("schema '{schema}' has no field '{field}'")]
    UnknownField { schema: String, field: String },
    #[error("field '{field}' expects {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    /// Pool or sink table is full.
    #[error("{0} exhausted")]
    Exhausted(String),
}

/// Operations a sampler needs from the metric registry.
///
/// Field writes made outside a transaction apply immediately; writes made
/// inside one become visible only when it is committed. Every
/// `begin_transaction` must be paired with exactly one `end_transaction`.
pub trait MetricRegistry: Send + Sync {
    /// Registers a schema template.
    fn define_schema(&self, template: SchemaTemplate) -> Result<SchemaHandle, RegistryError>;

    /// Creates a named sink bound to a schema.
    ///
    /// # Arguments
    /// * `name` - Instance name, unique across live sinks
    /// * `schema` - Previously defined schema
    fn create_sink(&self, name: &str, schema: &SchemaHandle) -> Result<SinkId, RegistryError>;

    /// Destroys a sink. Unknown ids are ignored.
    fn destroy_sink(&self, sink: SinkId);

    fn begin_transaction(&self, sink: SinkId) -> Result<(), RegistryError>;

    fn end_transaction(&self, sink: SinkId, outcome: TxOutcome) -> Result<(), RegistryError>;

    fn set_field(&self, sink: SinkId, field: &str, value: Value) -> Result<(), RegistryError>;

    /// Removes every record from the sink's list.
    fn list_clear(&self, sink: SinkId) -> Result<(), RegistryError>;

    /// Takes a zeroed record from the sink's pool.
    ///
    /// Fails with `RegistryError::Exhausted` once the pool is used up.
    fn allocate_record(&self, sink: SinkId) -> Result<Record, RegistryError>;

    fn list_append_record(&self, sink: SinkId, record: Record) -> Result<(), RegistryError>;
}
