//! Sub-samplers: one per stat file family.
//!
//! Each sub-sampler owns its entities, either a single one or an
//! `EntityCache` reconciled against a directory, and turns one tick into a
//! `SubReport`. `StatSampler` covers every family; its behavior is driven by
//! a `SamplerSpec` from the profile catalogue.

mod hf;
mod profile;
mod stat;

use std::time::Duration;

use serde::Serialize;

use crate::collector::cache::ReconcileStats;
use crate::collector::parser::ErrorClass;

pub use hf::{
    HF_COUNTERS, HfAccumulator, HfChannel, HfReading, HfTimer, RunningStat, hf_schema,
    parse_hf_counters,
};
pub use profile::{Binding, Grammar, Layout, Profile, SamplerSpec, samplers_for};
pub use stat::StatSampler;

/// Errors of one tick, per class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorCounts {
    pub transient_missing: usize,
    pub malformed_input: usize,
    pub resource_exhausted: usize,
    pub allocation_failure: usize,
}

impl ErrorCounts {
    pub fn record(&mut self, class: ErrorClass) {
        *self.slot(class) += 1;
    }

    pub fn get(&self, class: ErrorClass) -> usize {
        match class {
            ErrorClass::TransientMissing => self.transient_missing,
            ErrorClass::MalformedInput => self.malformed_input,
            ErrorClass::ResourceExhausted => self.resource_exhausted,
            ErrorClass::AllocationFailure => self.allocation_failure,
        }
    }

    pub fn total(&self) -> usize {
        self.transient_missing + self.malformed_input + self.resource_exhausted + self.allocation_failure
    }

    pub fn add(&mut self, other: &ErrorCounts) {
        self.transient_missing += other.transient_missing;
        self.malformed_input += other.malformed_input;
        self.resource_exhausted += other.resource_exhausted;
        self.allocation_failure += other.allocation_failure;
    }

    fn slot(&mut self, class: ErrorClass) -> &mut usize {
        match class {
            ErrorClass::TransientMissing => &mut self.transient_missing,
            ErrorClass::MalformedInput => &mut self.malformed_input,
            ErrorClass::ResourceExhausted => &mut self.resource_exhausted,
            ErrorClass::AllocationFailure => &mut self.allocation_failure,
        }
    }
}

/// What one sub-sampler did during one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SubReport {
    pub name: String,
    pub duration: Duration,
    /// Live entities after reconcile.
    pub entities: usize,
    pub reconcile: ReconcileStats,
    /// Stat files read and parsed.
    pub files_sampled: usize,
    /// Records committed across all files.
    pub records: usize,
    pub skipped_lines: usize,
    /// High-frequency windows published.
    pub hf_flushed: usize,
    pub errors: ErrorCounts,
}

impl SubReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One family of stat files.
pub trait SubSampler: Send {
    fn name(&self) -> &str;

    /// Runs one tick: discovery, parsing and commits.
    fn sample(&mut self) -> SubReport;

    /// Stops background work and destroys every entity. Returns the number
    /// of entities destroyed; later calls return 0.
    fn term(&mut self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_counts() {
        let mut errors = ErrorCounts::default();
        errors.record(ErrorClass::MalformedInput);
        errors.record(ErrorClass::MalformedInput);
        errors.record(ErrorClass::TransientMissing);
        assert_eq!(errors.get(ErrorClass::MalformedInput), 2);
        assert_eq!(errors.total(), 3);

        let mut sum = ErrorCounts::default();
        sum.add(&errors);
        sum.add(&errors);
        assert_eq!(sum.transient_missing, 2);
    }
}
