//! lustre-fulldump - Lustre statistics sampler library.
//!
//! This library provides the core functionality used by:
//! - `lustre-fulldumpd` - background daemon that samples Lustre stat files
//!   and republishes them as structured records
//!
//! Modules:
//! - `collector` - directory discovery, entity cache, stat-file parsers,
//!   sub-samplers and the tick orchestrator
//! - `registry` - metric registry contract and the in-memory registry
//! - `storage` - JSON-lines publication of committed sinks
//! - `util` - helper utilities

pub mod collector;
pub mod registry;
pub mod storage;
pub mod util;
