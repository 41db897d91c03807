//! One discovered Lustre object and the sinks it owns.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::collector::binder::{Sink, SinkBinder};
use crate::collector::identity::{Identity, IdentityError};
use crate::collector::parser::SinkSlot;
use crate::collector::sampler::HfChannel;
use crate::collector::traits::FileSystem;
use crate::registry::RegistryError;
use crate::util::LogOnce;

/// Failure to construct an entity. The entity is left out of this
/// generation and retried next tick.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("cannot create sink for {id}: {source}")]
    Registry {
        id: String,
        #[source]
        source: RegistryError,
    },
}

/// A live entity. Dropping it releases its sinks.
#[derive(Debug)]
pub struct Entity {
    id: String,
    identity: Identity,
    source_path: PathBuf,
    sink: Option<Sink>,
    hf: Option<HfChannel>,
    pub(crate) missing: LogOnce,
}

impl Entity {
    /// Builds an entity and its eager sinks.
    ///
    /// # Arguments
    /// * `id` - Directory entry name (or sampler name for single sources)
    /// * `identity` - Parsed identity of `id`
    /// * `source_path` - Stat file read every tick
    /// * `binder` - Binder of the main sink
    /// * `eager` - Create the main sink now rather than on first data
    /// * `hf_binder` - Binder of the high-frequency sink, if any
    pub fn build(
        id: &str,
        identity: Identity,
        source_path: PathBuf,
        binder: &SinkBinder,
        eager: bool,
        hf_binder: Option<&SinkBinder>,
    ) -> Result<Self, EntityError> {
        let registry_error = |source| EntityError::Registry {
            id: id.to_string(),
            source,
        };

        let sink = if eager {
            Some(binder.create_sink(&identity).map_err(registry_error)?)
        } else {
            None
        };
        let hf = match hf_binder {
            Some(hf_binder) => Some(HfChannel::new(
                hf_binder.create_sink(&identity).map_err(registry_error)?,
            )),
            None => None,
        };

        Ok(Self {
            id: id.to_string(),
            identity,
            source_path,
            sink,
            hf,
            missing: LogOnce::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub(crate) fn set_source_path(&mut self, path: PathBuf) {
        self.source_path = path;
    }

    /// Main sink, `None` until first data when bound lazily.
    pub fn sink(&self) -> Option<&Sink> {
        self.sink.as_ref()
    }

    pub fn hf(&self) -> Option<&HfChannel> {
        self.hf.as_ref()
    }

    pub(crate) fn hf_mut(&mut self) -> Option<&mut HfChannel> {
        self.hf.as_mut()
    }

    pub(crate) fn sink_slot<'a>(&'a mut self, binder: &'a SinkBinder) -> SinkSlot<'a> {
        SinkSlot::new(&mut self.sink, binder, &self.identity)
    }

    /// Feeds one high-frequency reading of the source file into the
    /// accumulator. Returns `false` if the entity has no HF path or the
    /// reading failed.
    pub(crate) fn accumulate_hf<F: FileSystem + ?Sized>(&mut self, fs: &F) -> bool {
        match &mut self.hf {
            Some(hf) => hf.sample(fs, &self.source_path),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collector::binder::SinkNaming;
    use crate::collector::identity::parse_server_name;
    use crate::collector::parser::{StatFormat, StatsFormat};
    use crate::registry::{MemoryRegistry, MetricRegistry};

    fn binder(registry: &MemoryRegistry) -> SinkBinder {
        let schema = registry
            .define_schema(StatsFormat::new(true).schema("lustre_osc_stats", SinkNaming::PerServer, 8))
            .unwrap();
        SinkBinder::new(
            Arc::new(registry.clone()),
            schema,
            "node1",
            "lustre_fulldump",
            "osc_stats",
            SinkNaming::PerServer,
            0,
        )
    }

    #[test]
    fn test_eager_entity_owns_sink_until_dropped() {
        let registry = MemoryRegistry::new();
        let binder = binder(&registry);
        let name = "testfs-OST0000-osc-ffff";
        let entity = Entity::build(
            name,
            parse_server_name(name).unwrap(),
            PathBuf::from("/proc/fs/lustre/osc").join(name).join("stats"),
            &binder,
            true,
            None,
        )
        .unwrap();
        assert_eq!(
            entity.sink().unwrap().name(),
            "node1/lustre_fulldump/testfs/OST0000/osc_stats"
        );
        assert_eq!(registry.live_sinks(), 1);
        drop(entity);
        assert_eq!(registry.live_sinks(), 0);
    }

    #[test]
    fn test_lazy_entity_has_no_sink() {
        let registry = MemoryRegistry::new();
        let binder = binder(&registry);
        let name = "testfs-OST0001-osc-ffff";
        let entity = Entity::build(
            name,
            parse_server_name(name).unwrap(),
            PathBuf::from("stats"),
            &binder,
            false,
            None,
        )
        .unwrap();
        assert!(entity.sink().is_none());
        assert_eq!(registry.live_sinks(), 0);
    }

    #[test]
    fn test_sink_creation_failure_is_reported() {
        let registry = MemoryRegistry::new().with_sink_limit(0);
        let binder = binder(&registry);
        let name = "testfs-OST0000-osc-ffff";
        let err = Entity::build(
            name,
            parse_server_name(name).unwrap(),
            PathBuf::from("stats"),
            &binder,
            true,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EntityError::Registry { .. }));
    }
}
