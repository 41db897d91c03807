//! Sink creation, naming and transactional writes.
//!
//! A `Sink` owns one registry sink and destroys it when dropped, so an
//! entity releases its sinks exactly once by going out of scope. Writes go
//! through a `Transaction` guard that ends the registry transaction exactly
//! once: `commit()` publishes, dropping the guard rolls back. Sinks bound
//! with a job source get the current job fields at the start of every
//! transaction.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::collector::identity::Identity;
use crate::collector::job::{JOB_FIELDS, JobSource};
use crate::registry::{
    MetricRegistry, Record, RegistryError, SchemaHandle, SinkId, TxOutcome, Value,
};

/// Owned handle to a registry sink.
pub struct Sink {
    id: SinkId,
    name: String,
    registry: Arc<dyn MetricRegistry>,
    job: Option<Arc<dyn JobSource>>,
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl Sink {
    /// Creates a sink in the registry.
    pub fn create(
        registry: Arc<dyn MetricRegistry>,
        name: String,
        schema: &SchemaHandle,
    ) -> Result<Self, RegistryError> {
        let id = registry.create_sink(&name, schema)?;
        debug!("created sink {}", name);
        Ok(Self {
            id,
            name,
            registry,
            job: None,
        })
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes a field outside any transaction.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), RegistryError> {
        self.registry.set_field(self.id, field, value.into())
    }

    /// Opens a transaction on this sink.
    pub fn begin(&self) -> Result<Transaction<'_>, RegistryError> {
        self.registry.begin_transaction(self.id)?;
        let tx = Transaction {
            sink: self,
            open: true,
        };
        if let Some(job) = &self.job {
            for (field, value) in job.current().fields() {
                tx.set(field, value)?;
            }
        }
        Ok(tx)
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        debug!("destroying sink {}", self.name);
        self.registry.destroy_sink(self.id);
    }
}

/// Open transaction on a sink. Rolls back when dropped uncommitted.
pub struct Transaction<'a> {
    sink: &'a Sink,
    open: bool,
}

impl Transaction<'_> {
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), RegistryError> {
        self.sink.registry.set_field(self.sink.id, field, value.into())
    }

    pub fn clear_list(&self) -> Result<(), RegistryError> {
        self.sink.registry.list_clear(self.sink.id)
    }

    pub fn allocate(&self) -> Result<Record, RegistryError> {
        self.sink.registry.allocate_record(self.sink.id)
    }

    pub fn append(&self, record: Record) -> Result<(), RegistryError> {
        self.sink.registry.list_append_record(self.sink.id, record)
    }

    /// Ends the transaction, publishing its writes.
    pub fn commit(mut self) -> Result<(), RegistryError> {
        self.open = false;
        self.sink
            .registry
            .end_transaction(self.sink.id, TxOutcome::Commit)
    }

    /// Ends the transaction, discarding its writes.
    pub fn rollback(mut self) -> Result<(), RegistryError> {
        self.open = false;
        self.sink
            .registry
            .end_transaction(self.sink.id, TxOutcome::Rollback)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open
            && let Err(e) = self
                .sink
                .registry
                .end_transaction(self.sink.id, TxOutcome::Rollback)
        {
            warn!("rollback on {} failed: {}", self.sink.name, e);
        }
    }
}

/// How a sink's instance name is composed from an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkNaming {
    /// `<producer>/<sampler>/<fs>/<server_id>/<category>`
    PerServer,
    /// `<producer>/<sampler>/<fs>/<category>`
    PerFilesystem,
    /// `<producer>/<sampler>`
    SingleSource,
}

/// Creates the sinks of one sub-sampler.
#[derive(Clone)]
pub struct SinkBinder {
    registry: Arc<dyn MetricRegistry>,
    schema: SchemaHandle,
    producer: String,
    sampler: String,
    category: String,
    naming: SinkNaming,
    component_id: u64,
    job: Option<Arc<dyn JobSource>>,
}

impl fmt::Debug for SinkBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkBinder")
            .field("schema", &self.schema.name())
            .field("producer", &self.producer)
            .field("sampler", &self.sampler)
            .field("category", &self.category)
            .field("naming", &self.naming)
            .field("job", &self.job.is_some())
            .finish()
    }
}

impl SinkBinder {
    /// # Arguments
    /// * `registry` - Registry that owns the sinks
    /// * `schema` - Schema every sink of this binder uses
    /// * `producer` - Producer name, usually the host name
    /// * `sampler` - Sampler name segment of the instance name
    /// * `category` - Trailing category segment (unused for single source)
    /// * `naming` - Instance name layout
    /// * `component_id` - Written into every sink that has the field
    pub fn new(
        registry: Arc<dyn MetricRegistry>,
        schema: SchemaHandle,
        producer: impl Into<String>,
        sampler: impl Into<String>,
        category: impl Into<String>,
        naming: SinkNaming,
        component_id: u64,
    ) -> Self {
        Self {
            registry,
            schema,
            producer: producer.into(),
            sampler: sampler.into(),
            category: category.into(),
            naming,
            component_id,
            job: None,
        }
    }

    /// Stamps job fields into every transaction of sinks whose schema
    /// declares them.
    pub fn with_job_source(mut self, job: Arc<dyn JobSource>) -> Self {
        self.job = Some(job);
        self
    }

    /// Binder for the high-frequency companion sinks: same naming, `_hf`
    /// category suffix, its own schema.
    pub fn high_frequency(&self, schema: SchemaHandle) -> Self {
        Self {
            schema,
            category: format!("{}_hf", self.category),
            ..self.clone()
        }
    }

    pub fn schema(&self) -> &SchemaHandle {
        &self.schema
    }

    pub fn naming(&self) -> SinkNaming {
        self.naming
    }

    /// Instance name for an identity.
    pub fn instance_name(&self, identity: &Identity) -> String {
        match self.naming {
            SinkNaming::PerServer => format!(
                "{}/{}/{}/{}/{}",
                self.producer,
                self.sampler,
                identity.fs_name,
                identity.server_id.as_deref().unwrap_or(""),
                self.category
            ),
            SinkNaming::PerFilesystem => format!(
                "{}/{}/{}/{}",
                self.producer, self.sampler, identity.fs_name, self.category
            ),
            SinkNaming::SingleSource => format!("{}/{}", self.producer, self.sampler),
        }
    }

    /// Creates and labels a sink for an identity.
    ///
    /// Identity fields the schema does not declare are skipped.
    pub fn create_sink(&self, identity: &Identity) -> Result<Sink, RegistryError> {
        let mut sink = Sink::create(
            self.registry.clone(),
            self.instance_name(identity),
            &self.schema,
        )?;

        let mut labels: Vec<(&str, Value)> = vec![("component_id", Value::U64(self.component_id))];
        if self.naming != SinkNaming::SingleSource {
            labels.push(("fs_name", Value::Str(identity.fs_name.clone())));
        }
        if let Some(idx) = identity.server_idx {
            labels.push(("server_idx", Value::U64(u64::from(idx))));
        }
        for (field, value) in labels {
            if self.schema.template().field_def(field).is_none() {
                debug!("schema {} has no {} field", self.schema.name(), field);
                continue;
            }
            sink.set(field, value)?;
        }
        if JOB_FIELDS
            .iter()
            .all(|field| self.schema.template().field_def(field).is_some())
        {
            sink.job = self.job.clone();
        } else if self.job.is_some() {
            debug!("schema {} has no job fields", self.schema.name());
        }
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::identity::{parse_fs_name, parse_server_name};
    use crate::collector::job::{JobInfo, with_job_fields};
    use crate::registry::{FieldDef, MemoryRegistry, RecordTemplate, SchemaTemplate};

    struct FixedJob(u64);

    impl JobSource for FixedJob {
        fn current(&self) -> JobInfo {
            JobInfo {
                job_id: self.0,
                app_id: 1,
                ..JobInfo::default()
            }
        }
    }

    fn setup(naming: SinkNaming) -> (MemoryRegistry, SinkBinder) {
        let registry = MemoryRegistry::new();
        let schema = registry
            .define_schema(
                SchemaTemplate::new("lustre_osc_stats")
                    .field(FieldDef::u64("component_id"))
                    .field(FieldDef::str("fs_name"))
                    .field(FieldDef::u64("server_idx"))
                    .field(FieldDef::u64("snapshot_sec"))
                    .list(
                        "metric_list",
                        RecordTemplate::new(vec![FieldDef::u64("count")]),
                        4,
                    ),
            )
            .unwrap();
        let binder = SinkBinder::new(
            Arc::new(registry.clone()),
            schema,
            "node1",
            "lustre_fulldump",
            "osc_stats",
            naming,
            7,
        );
        (registry, binder)
    }

    #[test]
    fn test_instance_names() {
        let (_, binder) = setup(SinkNaming::PerServer);
        let id = parse_server_name("testfs-OST0001-osc-ffff").unwrap();
        assert_eq!(
            binder.instance_name(&id),
            "node1/lustre_fulldump/testfs/OST0001/osc_stats"
        );

        let (registry, binder) = setup(SinkNaming::PerFilesystem);
        let id = parse_fs_name("testfs-ffff");
        assert_eq!(
            binder.instance_name(&id),
            "node1/lustre_fulldump/testfs/osc_stats"
        );

        let hf = binder.high_frequency(binder.schema().clone());
        assert_eq!(
            hf.instance_name(&id),
            "node1/lustre_fulldump/testfs/osc_stats_hf"
        );
        drop(registry);

        let (_, binder) = setup(SinkNaming::SingleSource);
        assert_eq!(
            binder.instance_name(&Identity::single_source()),
            "node1/lustre_fulldump"
        );
    }

    #[test]
    fn test_create_sink_sets_identity_fields() {
        let (registry, binder) = setup(SinkNaming::PerServer);
        let id = parse_server_name("testfs-OST0003-osc-ffff").unwrap();
        let sink = binder.create_sink(&id).unwrap();

        let snap = registry.snapshot(sink.id()).unwrap();
        assert_eq!(snap.fields.get("component_id"), Some(&Value::U64(7)));
        assert_eq!(snap.fields.get("fs_name"), Some(&Value::from("testfs")));
        assert_eq!(snap.fields.get("server_idx"), Some(&Value::U64(3)));
    }

    #[test]
    fn test_drop_destroys_sink() {
        let (registry, binder) = setup(SinkNaming::PerFilesystem);
        let sink = binder.create_sink(&parse_fs_name("testfs")).unwrap();
        let id = sink.id();
        drop(sink);
        assert!(registry.snapshot(id).is_none());
        assert_eq!(registry.live_sinks(), 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_drop() {
        let (registry, binder) = setup(SinkNaming::PerFilesystem);
        let sink = binder.create_sink(&parse_fs_name("testfs")).unwrap();
        {
            let tx = sink.begin().unwrap();
            tx.set("snapshot_sec", 10u64).unwrap();
        }
        assert_eq!(registry.open_transactions(), 0);
        assert!(!registry
            .snapshot(sink.id())
            .unwrap()
            .fields
            .contains_key("snapshot_sec"));

        let tx = sink.begin().unwrap();
        tx.set("snapshot_sec", 11u64).unwrap();
        tx.commit().unwrap();
        assert_eq!(
            registry.snapshot(sink.id()).unwrap().fields.get("snapshot_sec"),
            Some(&Value::U64(11))
        );
    }

    #[test]
    fn test_job_fields_stamped_each_commit() {
        let registry = MemoryRegistry::new();
        let schema = registry
            .define_schema(with_job_fields(
                SchemaTemplate::new("lustre_llite_stats").field(FieldDef::u64("snapshot_sec")),
            ))
            .unwrap();
        let binder = SinkBinder::new(
            Arc::new(registry.clone()),
            schema,
            "node1",
            "lustre_fulldump",
            "llite_stats",
            SinkNaming::PerFilesystem,
            0,
        )
        .with_job_source(Arc::new(FixedJob(4242)));
        let sink = binder.create_sink(&parse_fs_name("testfs")).unwrap();

        let tx = sink.begin().unwrap();
        tx.set("snapshot_sec", 5u64).unwrap();
        tx.commit().unwrap();
        let snap = registry.snapshot(sink.id()).unwrap();
        assert_eq!(snap.fields.get("job_id"), Some(&Value::U64(4242)));
        assert_eq!(snap.fields.get("app_id"), Some(&Value::U64(1)));
        assert_eq!(snap.fields.get("job_end"), Some(&Value::U64(0)));
    }

    #[test]
    fn test_job_source_ignored_without_job_fields() {
        let (registry, binder) = setup(SinkNaming::PerFilesystem);
        let binder = binder.with_job_source(Arc::new(FixedJob(1)));
        let sink = binder.create_sink(&parse_fs_name("testfs")).unwrap();
        sink.begin().unwrap().commit().unwrap();
        assert!(!registry.snapshot(sink.id()).unwrap().fields.contains_key("job_id"));
    }
}
