//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait lets the samplers read Lustre's `/proc` and
//! debugfs trees on a real node, or an in-memory tree in tests.

use std::io;
use std::path::Path;

/// One entry returned by `FileSystem::read_dir`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    /// File name of the entry, without its parent path.
    pub name: String,
    /// `true` only for real directories; symlinks and files are `false`.
    pub is_dir: bool,
}

impl DirEntry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }
}

/// Abstraction for filesystem operations.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    ///
    /// # Arguments
    /// * `path` - Path to the file to read
    ///
    /// # Returns
    /// The file contents as a string, or an I/O error if the file cannot be read.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Checks if a path is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    ///
    /// # Arguments
    /// * `path` - Path to the directory
    ///
    /// # Returns
    /// The entries of the directory in unspecified order, or an I/O error
    /// if the directory cannot be opened.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            // Names that are not valid UTF-8 cannot be Lustre device names
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_dir = entry.file_type()?.is_dir();
            entries.push(DirEntry { name, is_dir });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_fs_read_to_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats");
        std::fs::write(&path, "snapshot_time 1.2\n").unwrap();

        let fs = RealFs::new();
        assert_eq!(fs.read_to_string(&path).unwrap(), "snapshot_time 1.2\n");
        assert!(fs.exists(&path));
        assert!(!fs.is_dir(&path));
    }

    #[test]
    fn test_real_fs_read_dir_reports_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("testfs-OST0000")).unwrap();
        std::fs::write(dir.path().join("README"), "").unwrap();

        let fs = RealFs::new();
        let mut entries = fs.read_dir(dir.path()).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![DirEntry::file("README"), DirEntry::dir("testfs-OST0000")]
        );
    }

    #[test]
    fn test_real_fs_missing_dir() {
        let fs = RealFs::new();
        assert!(fs.read_dir(Path::new("/nonexistent/path/12345")).is_err());
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }
}
