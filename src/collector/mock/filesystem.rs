//! In-memory mock filesystem for testing samplers without a Lustre node.
//!
//! `MockFs` keeps its tree behind a shared lock, so a clone handed to a
//! sampler sees files and directories the test adds or removes afterwards.
//! That is how tests drive topology changes between ticks.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::collector::traits::{DirEntry, FileSystem};

#[derive(Debug, Default)]
struct Tree {
    /// Map from path to file contents.
    files: BTreeMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: BTreeSet<PathBuf>,
}

impl Tree {
    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<Mutex<Tree>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree();
        tree.add_parents(&path);
        tree.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree();
        tree.add_parents(&path);
        tree.directories.insert(path);
    }

    /// Removes a file. Missing files are ignored.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.tree().files.remove(path.as_ref());
    }

    /// Removes a directory and everything below it.
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree();
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.directories.retain(|p| !p.starts_with(path));
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.tree().files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree();
        tree.files.contains_key(path) || tree.directories.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.tree().directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let tree = self.tree();
        if !tree.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let child_name = |p: &Path| -> Option<String> {
            if p.parent() == Some(path) && p != path {
                p.file_name().and_then(|n| n.to_str()).map(str::to_string)
            } else {
                None
            }
        };

        let mut entries: Vec<DirEntry> = tree
            .files
            .keys()
            .filter_map(|p| child_name(p))
            .map(DirEntry::file)
            .collect();
        entries.extend(
            tree.directories
                .iter()
                .filter_map(|p| child_name(p))
                .map(DirEntry::dir),
        );
        Ok(entries)
    }
}
