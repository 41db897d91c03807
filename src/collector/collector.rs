//! Main collector that drives every sub-sampler once per tick.
//!
//! The `Collector` struct owns the sub-samplers of the configured profiles
//! and turns one tick into a `TickReport`.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::collector::cache::ReconcileStats;
use crate::collector::context::SamplerContext;
use crate::collector::sampler::{
    ErrorCounts, Profile, SamplerSpec, StatSampler, SubReport, SubSampler, samplers_for,
};
use crate::collector::traits::FileSystem;
use crate::registry::{MetricRegistry, RegistryError};

/// Failure that stops the whole sampler.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("cannot define schema {schema}: {source}")]
    Schema {
        schema: String,
        #[source]
        source: RegistryError,
    },
    #[error("cannot start high-frequency timer for {sampler}: {source}")]
    Timer {
        sampler: String,
        #[source]
        source: io::Error,
    },
}

/// Result of one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Total tick time.
    pub duration: Duration,
    pub samplers: Vec<SubReport>,
}

impl TickReport {
    pub fn entities(&self) -> usize {
        self.samplers.iter().map(|s| s.entities).sum()
    }

    pub fn files_sampled(&self) -> usize {
        self.samplers.iter().map(|s| s.files_sampled).sum()
    }

    pub fn records(&self) -> usize {
        self.samplers.iter().map(|s| s.records).sum()
    }

    pub fn reconcile(&self) -> ReconcileStats {
        let mut total = ReconcileStats::default();
        for sampler in &self.samplers {
            total.add(&sampler.reconcile);
        }
        total
    }

    pub fn errors(&self) -> ErrorCounts {
        let mut total = ErrorCounts::default();
        for sampler in &self.samplers {
            total.add(&sampler.errors);
        }
        total
    }

    pub fn sampler(&self, name: &str) -> Option<&SubReport> {
        self.samplers.iter().find(|s| s.name == name)
    }

    /// One-line summary for the daemon log.
    pub fn summary(&self) -> String {
        let reconcile = self.reconcile();
        let errors = self.errors();
        format!(
            "{} entities (+{} -{} !{}), {} files, {} records, errors: {} missing, {} malformed, {} exhausted, {} alloc, {:?}",
            self.entities(),
            reconcile.created,
            reconcile.destroyed,
            reconcile.failed,
            self.files_sampled(),
            self.records(),
            errors.transient_missing,
            errors.malformed_input,
            errors.resource_exhausted,
            errors.allocation_failure,
            self.duration
        )
    }
}

/// Main collector that samples every configured stat file family.
pub struct Collector {
    context: SamplerContext,
    registry: Arc<dyn MetricRegistry>,
    samplers: Vec<Box<dyn SubSampler>>,
    /// Report of the last tick call.
    last_report: Option<TickReport>,
    shut_down: bool,
}

impl Collector {
    /// Creates a collector for the given node roles.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `registry` - Registry receiving schemas and sinks
    /// * `context` - Process-wide settings
    /// * `profiles` - Node roles; shared sub-samplers are created once
    pub fn new<F: FileSystem + Clone + 'static>(
        fs: F,
        registry: Arc<dyn MetricRegistry>,
        context: SamplerContext,
        profiles: &[Profile],
    ) -> Result<Self, CollectError> {
        Self::with_specs(fs, registry, context, &samplers_for(profiles))
    }

    /// Creates a collector for an explicit list of sub-samplers.
    ///
    /// Every schema is defined here; a failure is fatal and the sub-samplers
    /// already built are torn down again.
    pub fn with_specs<F: FileSystem + Clone + 'static>(
        fs: F,
        registry: Arc<dyn MetricRegistry>,
        context: SamplerContext,
        specs: &[SamplerSpec],
    ) -> Result<Self, CollectError> {
        let mut samplers: Vec<Box<dyn SubSampler>> = Vec::with_capacity(specs.len());
        for spec in specs {
            let sampler = StatSampler::new(fs.clone(), registry.clone(), &context, spec)?;
            samplers.push(Box::new(sampler));
        }
        info!(
            "collector for {} initialized with {} sub-samplers",
            context.producer,
            samplers.len()
        );
        Ok(Self {
            context,
            registry,
            samplers,
            last_report: None,
            shut_down: false,
        })
    }

    pub fn context(&self) -> &SamplerContext {
        &self.context
    }

    pub fn registry(&self) -> &Arc<dyn MetricRegistry> {
        &self.registry
    }

    pub fn sampler_names(&self) -> Vec<&str> {
        self.samplers.iter().map(|s| s.name()).collect()
    }

    /// Report of the last tick, if any.
    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }

    /// Runs one tick over every sub-sampler.
    ///
    /// Per-entity failures are counted in the report and never stop the
    /// tick. After `shutdown` this returns an empty report.
    pub fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();
        if self.shut_down {
            return report;
        }
        for sampler in &mut self.samplers {
            let sub = sampler.sample();
            debug!(
                "{}: {} entities, {} records in {:?}",
                sub.name, sub.entities, sub.records, sub.duration
            );
            report.samplers.push(sub);
        }
        report.duration = started.elapsed();
        self.last_report = Some(report.clone());
        report
    }

    /// Stops every timer, then destroys every entity. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        let destroyed: usize = self.samplers.iter_mut().map(|s| s.term()).sum();
        self.shut_down = true;
        info!("collector shut down, {} entities destroyed", destroyed);
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
