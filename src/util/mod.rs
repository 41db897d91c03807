//! Utility modules for lustre-fulldump.

mod hostname;
mod log_once;

pub use hostname::{default_producer, hostname_from};
pub use log_once::LogOnce;
