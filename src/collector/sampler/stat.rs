//! The generic sub-sampler.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::collector::binder::{SinkBinder, SinkNaming};
use crate::collector::cache::EntityCache;
use crate::collector::collector::CollectError;
use crate::collector::context::SamplerContext;
use crate::collector::entity::{Entity, EntityError};
use crate::collector::identity::{Identity, parse_fs_name, parse_server_name};
use crate::collector::job::{JobInfoFile, JobSource, with_job_fields};
use crate::collector::parser::{ErrorClass, SampleError, StatFormat};
use crate::collector::paths::PathResolver;
use crate::collector::sampler::hf::{HfTimer, hf_schema};
use crate::collector::sampler::profile::{Binding, Layout, SamplerSpec};
use crate::collector::sampler::{SubReport, SubSampler};
use crate::collector::traits::FileSystem;
use crate::registry::{MetricRegistry, SchemaTemplate, SinkId};

type SharedCache = Arc<Mutex<EntityCache<Entity>>>;

fn lock(cache: &Mutex<EntityCache<Entity>>) -> MutexGuard<'_, EntityCache<Entity>> {
    cache.lock().unwrap_or_else(|e| e.into_inner())
}

/// Entity storage of a sub-sampler.
enum Shape {
    /// One well-known file.
    Single {
        resolver: PathResolver,
        entity: Option<Entity>,
    },
    /// One entity per directory below the root. The cache is shared with
    /// the high-frequency timer thread.
    Tree {
        resolver: PathResolver,
        by_server: bool,
        cache: SharedCache,
    },
}

/// Samples one stat file family described by a `SamplerSpec`.
pub struct StatSampler<F: FileSystem + Clone + 'static> {
    name: &'static str,
    fs: F,
    file: &'static str,
    format: Box<dyn StatFormat>,
    binder: SinkBinder,
    hf_binder: Option<SinkBinder>,
    eager: bool,
    shape: Shape,
    timer: Option<HfTimer>,
    terminated: bool,
}

impl<F: FileSystem + Clone + 'static> StatSampler<F> {
    /// Defines the sub-sampler's schemas and starts its timer, if any.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `registry` - Registry receiving schemas and sinks
    /// * `context` - Process-wide settings
    /// * `spec` - Sub-sampler description from the profile catalogue
    pub fn new(
        fs: F,
        registry: Arc<dyn MetricRegistry>,
        context: &SamplerContext,
        spec: &SamplerSpec,
    ) -> Result<Self, CollectError> {
        let naming = spec.layout.naming();
        let format = spec.grammar.format();
        let schema_name = spec.schema_name();
        let job: Option<Arc<dyn JobSource>> = context
            .job_info_path()
            .map(|path| Arc::new(JobInfoFile::new(fs.clone(), path)) as Arc<dyn JobSource>);
        let job_fields = job.is_some();
        let with_job = |template: SchemaTemplate| {
            if job_fields {
                with_job_fields(template)
            } else {
                template
            }
        };

        let schema = registry
            .define_schema(with_job(format.schema(&schema_name, naming, context.list_capacity)))
            .map_err(|source| CollectError::Schema {
                schema: schema_name.clone(),
                source,
            })?;
        // single-source sinks have no category segment, the schema name
        // keeps them apart
        let sampler = match naming {
            SinkNaming::SingleSource => schema_name.clone(),
            _ => context.sampler_name.clone(),
        };
        let mut binder = SinkBinder::new(
            registry.clone(),
            schema,
            context.producer.clone(),
            sampler,
            spec.name,
            naming,
            context.component_id,
        );
        if let Some(job) = &job {
            binder = binder.with_job_source(job.clone());
        }

        let hf_binder = if spec.high_frequency && spec.layout != Layout::Single {
            let hf_name = format!("{schema_name}_hf");
            let schema = registry
                .define_schema(with_job(hf_schema(&hf_name, naming)))
                .map_err(|source| CollectError::Schema {
                    schema: hf_name,
                    source,
                })?;
            Some(binder.high_frequency(schema))
        } else {
            None
        };

        let resolver = PathResolver::new(spec.roots.iter().map(|root| context.path(root)).collect());
        let shape = match spec.layout {
            Layout::Single => Shape::Single {
                resolver,
                entity: None,
            },
            Layout::ByServer | Layout::ByFilesystem => Shape::Tree {
                resolver,
                by_server: spec.layout == Layout::ByServer,
                cache: Arc::new(Mutex::new(EntityCache::new())),
            },
        };

        let timer = match (&hf_binder, &shape) {
            (Some(_), Shape::Tree { cache, .. }) => {
                let cache = cache.clone();
                let fs = fs.clone();
                let timer = HfTimer::start(spec.name, context.hf_interval, move || {
                    accumulate(&fs, &mut lock(&cache));
                })
                .map_err(|source| CollectError::Timer {
                    sampler: spec.name.to_string(),
                    source,
                })?;
                Some(timer)
            }
            _ => None,
        };

        debug!(
            "initialized {} ({}, {:?})",
            spec.name,
            format.kind(),
            spec.layout
        );
        Ok(Self {
            name: spec.name,
            fs,
            file: spec.file,
            format,
            binder,
            hf_binder,
            eager: spec.binding == Binding::Eager,
            shape,
            timer,
            terminated: false,
        })
    }

    /// Ids of the live entities, sorted.
    pub fn entity_ids(&self) -> Vec<String> {
        match &self.shape {
            Shape::Single { entity, .. } => entity.iter().map(|e| e.id().to_string()).collect(),
            Shape::Tree { cache, .. } => lock(cache).ids().map(str::to_string).collect(),
        }
    }

    /// Main sink of an entity, if bound.
    pub fn sink_id(&self, id: &str) -> Option<SinkId> {
        match &self.shape {
            Shape::Single { entity, .. } => entity
                .as_ref()
                .filter(|e| e.id() == id)
                .and_then(|e| e.sink())
                .map(|s| s.id()),
            Shape::Tree { cache, .. } => lock(cache).get(id).and_then(|e| e.sink()).map(|s| s.id()),
        }
    }

    /// High-frequency sink of an entity.
    pub fn hf_sink_id(&self, id: &str) -> Option<SinkId> {
        match &self.shape {
            Shape::Single { .. } => None,
            Shape::Tree { cache, .. } => lock(cache)
                .get(id)
                .and_then(|e| e.hf())
                .map(|hf| hf.sink().id()),
        }
    }

    pub fn hf_timer_running(&self) -> bool {
        self.timer.as_ref().is_some_and(HfTimer::is_running)
    }

    /// Runs one high-frequency pass on the calling thread.
    pub fn accumulate_now(&self) -> usize {
        match &self.shape {
            Shape::Tree { cache, .. } if self.hf_binder.is_some() => {
                accumulate(&self.fs, &mut lock(cache))
            }
            _ => 0,
        }
    }
}

/// One timer pass: each entity with an HF channel reads its file once.
fn accumulate<F: FileSystem + ?Sized>(fs: &F, cache: &mut EntityCache<Entity>) -> usize {
    let mut read = 0;
    for (_, entity) in cache.iter_mut() {
        if entity.accumulate_hf(fs) {
            read += 1;
        }
    }
    trace!("high-frequency pass read {} files", read);
    read
}

/// Reads and commits one entity's stat file.
fn sample_entity<F: FileSystem + ?Sized>(
    fs: &F,
    format: &dyn StatFormat,
    binder: &SinkBinder,
    entity: &mut Entity,
    report: &mut SubReport,
) {
    let path = entity.source_path().to_path_buf();
    let result = fs
        .read_to_string(&path)
        .map_err(SampleError::from_io)
        .and_then(|content| format.sample(&content, &mut entity.sink_slot(binder)));

    match result {
        Ok(outcome) => {
            if entity.missing.reset() {
                debug!("{} is readable again", path.display());
            }
            report.files_sampled += 1;
            report.records += outcome.records;
            report.skipped_lines += outcome.skipped_lines;
            if outcome.skipped_lines > 0 {
                warn!(
                    "{}: skipped {} lines with unknown bin suffix",
                    path.display(),
                    outcome.skipped_lines
                );
            }
        }
        Err(e) => {
            report.errors.record(e.class());
            match e {
                SampleError::NotFound | SampleError::Io(_) => {
                    if entity.missing.trigger() {
                        warn!("cannot read {}: {}", path.display(), e);
                    }
                }
                SampleError::Exhausted { appended } => {
                    report.files_sampled += 1;
                    report.records += appended;
                    warn!("{}: {}", path.display(), e);
                }
                SampleError::Malformed(_) => {
                    report.files_sampled += 1;
                    warn!("{}: {}", path.display(), e);
                }
                SampleError::Registry(_) => {
                    error!("{}: {}", path.display(), e);
                }
            }
        }
    }
}

impl<F: FileSystem + Clone + 'static> SubSampler for StatSampler<F> {
    fn name(&self) -> &str {
        self.name
    }

    fn sample(&mut self) -> SubReport {
        let started = Instant::now();
        let mut report = SubReport::new(self.name);
        if self.terminated {
            return report;
        }

        let StatSampler {
            name,
            fs,
            file,
            format,
            binder,
            hf_binder,
            eager,
            shape,
            ..
        } = self;
        let name: &'static str = *name;
        let fs: &F = fs;
        let file: &'static str = *file;
        let format: &dyn StatFormat = &**format;
        let binder: &SinkBinder = binder;
        let hf_binder = hf_binder.as_ref();
        let eager = *eager;

        match shape {
            Shape::Single { resolver, entity } => {
                let Some(path) = resolver.resolve(fs).map(|dir| dir.join(file)) else {
                    report.errors.record(ErrorClass::TransientMissing);
                    report.entities = usize::from(entity.is_some());
                    report.duration = started.elapsed();
                    return report;
                };
                match entity {
                    Some(existing) => {
                        existing.set_source_path(path);
                        report.reconcile.kept = 1;
                    }
                    None => match Entity::build(name, Identity::single_source(), path, binder, eager, None) {
                        Ok(created) => {
                            *entity = Some(created);
                            report.reconcile.created = 1;
                        }
                        Err(e) => {
                            error!("{}: {}", name, e);
                            report.reconcile.failed = 1;
                            report.errors.record(ErrorClass::AllocationFailure);
                        }
                    },
                }
                if let Some(entity) = entity.as_mut() {
                    sample_entity(fs, format, binder, entity, &mut report);
                }
                report.entities = usize::from(entity.is_some());
            }
            Shape::Tree {
                resolver,
                by_server,
                cache,
            } => {
                // held across reconcile, sampling and flush
                let mut cache = lock(cache);
                match resolver.resolve(fs).map(Path::to_path_buf) {
                    Some(root) => {
                        let by_server = *by_server;
                        let construct = |id: &str| -> Result<Entity, EntityError> {
                            let identity = if by_server {
                                parse_server_name(id)?
                            } else {
                                parse_fs_name(id)
                            };
                            let path: PathBuf = root.join(id).join(file);
                            Entity::build(id, identity, path, binder, eager, hf_binder)
                        };
                        if let Some(stats) = cache.refresh(fs, &root, construct) {
                            report.reconcile = stats;
                        }
                        // kept entities follow the root when it falls back
                        for (id, entity) in cache.iter_mut() {
                            entity.set_source_path(root.join(id).join(file));
                            sample_entity(fs, format, binder, entity, &mut report);
                        }
                    }
                    None => report.errors.record(ErrorClass::TransientMissing),
                }

                for (id, entity) in cache.iter_mut() {
                    let Some(hf) = entity.hf_mut() else {
                        continue;
                    };
                    match hf.flush() {
                        Ok(()) => report.hf_flushed += 1,
                        Err(e) => {
                            error!("{}: high-frequency flush failed: {}", id, e);
                            report.errors.record(ErrorClass::AllocationFailure);
                        }
                    }
                }
                report.entities = cache.len();
            }
        }

        report.duration = started.elapsed();
        report
    }

    fn term(&mut self) -> usize {
        // the timer must be gone before any entity is destroyed
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        let destroyed = match &mut self.shape {
            Shape::Single { entity, .. } => usize::from(entity.take().is_some()),
            Shape::Tree { cache, .. } => lock(cache).clear(),
        };
        if !self.terminated {
            debug!("{}: terminated, {} entities destroyed", self.name, destroyed);
            self.terminated = true;
        }
        destroyed
    }
}

impl<F: FileSystem + Clone + 'static> Drop for StatSampler<F> {
    fn drop(&mut self) {
        self.term();
    }
}
