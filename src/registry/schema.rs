//! Schema templates, typed values and records.
//!
//! A schema is a flat set of named scalar fields plus, optionally, one list
//! of records that all share a record template. Templates are plain data;
//! the registry turns them into a `SchemaHandle` when they are defined.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::RegistryError;

/// Scalar type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    U64,
    S64,
    Str,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::U64 => write!(f, "u64"),
            ValueKind::S64 => write!(f, "s64"),
            ValueKind::Str => write!(f, "str"),
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    U64(u64),
    S64(i64),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::U64(_) => ValueKind::U64,
            Value::S64(_) => ValueKind::S64,
            Value::Str(_) => ValueKind::Str,
        }
    }

    /// Zero value for a field kind, used for fields never written.
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::U64 => Value::U64(0),
            ValueKind::S64 => Value::S64(0),
            ValueKind::Str => Value::Str(String::new()),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::S64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::S64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Named, typed field of a schema or record template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: ValueKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn u64(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::U64)
    }

    pub fn s64(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::S64)
    }

    pub fn str(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Str)
    }
}

/// Layout of the records held in a schema's list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTemplate {
    pub fields: Vec<FieldDef>,
}

impl RecordTemplate {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<(usize, &FieldDef)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }
}

/// List attached to a schema: its field name, record layout and the
/// number of records the sink's pool can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDef {
    pub name: String,
    pub record: RecordTemplate,
    pub capacity: usize,
}

/// Declarative schema description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTemplate {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub list: Option<ListDef>,
}

impl SchemaTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            list: None,
        }
    }

    /// Appends a scalar field.
    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    /// Attaches a record list.
    ///
    /// # Arguments
    /// * `name` - List field name
    /// * `record` - Layout shared by every record of the list
    /// * `capacity` - Maximum number of records one sink may hold
    pub fn list(mut self, name: impl Into<String>, record: RecordTemplate, capacity: usize) -> Self {
        self.list = Some(ListDef {
            name: name.into(),
            record,
            capacity,
        });
        self
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks names are unique and the list is usable.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidSchema {
            schema: self.name.clone(),
            reason,
        };
        if self.name.is_empty() {
            return Err(invalid("empty schema name".to_string()));
        }
        let mut names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        if let Some(list) = &self.list {
            if list.capacity == 0 {
                return Err(invalid(format!("list '{}' has zero capacity", list.name)));
            }
            names.push(&list.name);
            let mut record_names: Vec<&str> =
                list.record.fields.iter().map(|f| f.name.as_str()).collect();
            record_names.sort_unstable();
            if let Some(w) = record_names.windows(2).find(|w| w[0] == w[1]) {
                return Err(invalid(format!("duplicate record field '{}'", w[0])));
            }
        }
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(invalid(format!("duplicate field '{}'", w[0])));
        }
        Ok(())
    }
}

/// Registry-assigned schema identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SchemaId(pub(crate) u64);

/// A defined schema. Cheap to clone; the template is shared.
#[derive(Debug, Clone)]
pub struct SchemaHandle {
    id: SchemaId,
    template: Arc<SchemaTemplate>,
}

impl SchemaHandle {
    pub(crate) fn new(id: SchemaId, template: Arc<SchemaTemplate>) -> Self {
        Self { id, template }
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }

    pub fn template(&self) -> &Arc<SchemaTemplate> {
        &self.template
    }
}

/// A record allocated from a sink's pool, filled in and then appended.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    list: Arc<SchemaTemplate>,
    values: Vec<Value>,
}

impl Record {
    /// Builds a zeroed record for the schema's list.
    pub(crate) fn blank(schema: Arc<SchemaTemplate>) -> Option<Self> {
        let values = schema
            .list
            .as_ref()?
            .record
            .fields
            .iter()
            .map(|f| Value::zero(f.kind))
            .collect();
        Some(Self {
            list: schema,
            values,
        })
    }

    fn fields(&self) -> &[FieldDef] {
        self.list
            .list
            .as_ref()
            .map(|l| l.record.fields.as_slice())
            .unwrap_or(&[])
    }

    fn position(&self, field: &str) -> Option<(usize, ValueKind)> {
        self.fields()
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == field)
            .map(|(idx, f)| (idx, f.kind))
    }

    /// Sets a record field, checking its name and type.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), RegistryError> {
        let value = value.into();
        let (idx, kind) = match self.position(field) {
            Some(found) => found,
            None => {
                return Err(RegistryError::UnknownField {
                    schema: self.list.name.clone(),
                    field: field.to_string(),
                });
            }
        };
        if value.kind() != kind {
            return Err(RegistryError::TypeMismatch {
                field: field.to_string(),
                expected: kind,
                actual: value.kind(),
            });
        }
        self.values[idx] = value;
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.position(field).map(|(idx, _)| &self.values[idx])
    }

    pub(crate) fn schema_name(&self) -> &str {
        &self.list.name
    }

    /// Field name and value pairs in template order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields()
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }
}
