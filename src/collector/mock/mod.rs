//! Mock filesystem implementations for testing.
//!
//! This module provides `MockFs` and pre-built Lustre scenarios for testing
//! samplers without a Lustre node.

mod filesystem;
pub mod scenarios;

pub use filesystem::MockFs;
