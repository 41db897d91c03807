//! Host name lookup for the default producer name.

use std::path::Path;

use crate::collector::FileSystem;

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";
const FALLBACK_PRODUCER: &str = "localhost";

/// Reads the short host name from the kernel, falling back to `$HOSTNAME`.
///
/// Returns `None` if neither source yields a non-empty name. Only the part
/// before the first '.' is kept.
pub fn hostname_from<F: FileSystem>(fs: &F) -> Option<String> {
    let raw = fs
        .read_to_string(Path::new(HOSTNAME_PATH))
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())?;
    let short = raw.trim().split('.').next().unwrap_or("").to_string();
    if short.is_empty() { None } else { Some(short) }
}

/// Producer name used when none is configured.
pub fn default_producer<F: FileSystem>(fs: &F) -> String {
    hostname_from(fs).unwrap_or_else(|| FALLBACK_PRODUCER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    #[test]
    fn test_hostname_is_shortened() {
        let fs = MockFs::new();
        fs.add_file(HOSTNAME_PATH, "oss01.cluster.example\n");
        assert_eq!(hostname_from(&fs).as_deref(), Some("oss01"));
        assert_eq!(default_producer(&fs), "oss01");
    }

    #[test]
    fn test_blank_hostname_file_is_ignored() {
        let fs = MockFs::new();
        fs.add_file(HOSTNAME_PATH, "\n");
        assert_eq!(hostname_from(&fs), None);
    }
}
