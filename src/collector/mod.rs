//! Lustre stat file collector.
//!
//! This module discovers Lustre devices under their version-dependent roots,
//! keeps one entity per device, parses its stat files and commits them to
//! registry sinks, with support for mocking the filesystem in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Collector                           │
//! │  ┌─────────────────────┐   ┌─────────────────────────────┐  │
//! │  │ StatSampler (tree)  │   │   StatSampler (single)      │  │
//! │  │  - PathResolver     │   │  - PathResolver             │  │
//! │  │  - EntityCache ◄────┼─┐ │  - Entity                   │  │
//! │  └──────────┬──────────┘ │ └──────────────┬──────────────┘  │
//! │             │       HfTimer               │                 │
//! │             └──────────────┬──────────────┘                 │
//! │                            │                                │
//! │            ┌───────────────┼───────────────┐                │
//! │     ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐         │
//! │     │ StatFormat  │ │ SinkBinder  │ │  FileSystem │ (trait) │
//! │     │ (parsers)   │ │ (registry)  │ │             │         │
//! │     └─────────────┘ └─────────────┘ └──────┬──────┘         │
//! └────────────────────────────────────────────┼────────────────┘
//!                                              │
//!                              ┌───────────────┼───────────────┐
//!                       ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐
//!                       │   RealFs    │ │   MockFs    │ │  Scenarios  │
//!                       │ (Linux)     │ │ (Testing)   │ │ (Fixtures)  │
//!                       └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use lustre_fulldump::collector::{Collector, MockFs, Profile, SamplerContext};
//! use lustre_fulldump::registry::MemoryRegistry;
//!
//! let fs = MockFs::lustre_client();
//! let registry = MemoryRegistry::new();
//! let context = SamplerContext::detect(&fs);
//! let mut collector =
//!     Collector::new(fs, Arc::new(registry.clone()), context, &[Profile::Client]).unwrap();
//! let report = collector.tick();
//! assert!(report.records() > 0);
//! assert!(registry.snapshot_by_name("client1/lustre_lnet_peers").is_some());
//! ```

pub mod binder;
pub mod cache;
#[allow(clippy::module_inception)]
mod collector;
mod context;
mod entity;
pub mod identity;
pub mod job;
pub mod mock;
pub mod parser;
pub mod paths;
pub mod sampler;
pub mod traits;

pub use binder::{Sink, SinkBinder, SinkNaming, Transaction};
pub use cache::{EntityCache, ReconcileStats};
pub use collector::{CollectError, Collector, TickReport};
pub use context::SamplerContext;
pub use entity::{Entity, EntityError};
pub use identity::{Identity, IdentityError, parse_fs_name, parse_server_name};
pub use job::{DEFAULT_JOB_INFO_PATH, JobInfo, JobInfoFile, JobSource};
pub use mock::MockFs;
pub use parser::{ErrorClass, ParseError, SampleError, SampleOutcome, StatFormat};
pub use paths::PathResolver;
pub use sampler::{
    ErrorCounts, HfChannel, HfTimer, Profile, SamplerSpec, StatSampler, SubReport, SubSampler,
    samplers_for,
};
pub use traits::{DirEntry, FileSystem, RealFs};
