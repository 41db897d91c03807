//! Version-dependent root directory resolution.
//!
//! Lustre moved most of its stat files from `/proc/fs/lustre` to debugfs
//! over several releases, so a sampler is configured with an ordered list of
//! candidate roots and uses the first one that exists.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::collector::traits::FileSystem;
use crate::util::LogOnce;

/// Picks the first existing directory from an ordered candidate list and
/// remembers it between calls.
#[derive(Debug, Clone)]
pub struct PathResolver {
    candidates: Vec<PathBuf>,
    current: Option<usize>,
    missing: LogOnce,
}

impl PathResolver {
    /// # Arguments
    /// * `candidates` - Roots in fallback order, already prefixed with the
    ///   configured root
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            current: None,
            missing: LogOnce::new(),
        }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Root resolved by the last call to `resolve`.
    pub fn current(&self) -> Option<&Path> {
        self.current.map(|idx| self.candidates[idx].as_path())
    }

    /// Returns the first candidate that is a directory.
    ///
    /// Candidates are always tried in order, so a preferred root that comes
    /// back wins over a fallback. A change of the resolved root is logged
    /// once; absence of every candidate is warned about once until one
    /// reappears.
    pub fn resolve<F: FileSystem + ?Sized>(&mut self, fs: &F) -> Option<&Path> {
        let found = self.candidates.iter().position(|p| fs.is_dir(p));

        match found {
            Some(idx) => {
                self.missing.reset();
                if self.current != Some(idx) {
                    info!("using stats root {}", self.candidates[idx].display());
                    self.current = Some(idx);
                }
            }
            None => {
                self.current = None;
                if self.missing.trigger() {
                    warn!(
                        "no stats root found, tried: {}",
                        self.candidates
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
            }
        }
        self.current()
    }
}

/// Joins an absolute well-known path under a root prefix.
///
/// `rooted("/", "/proc/fs/lustre")` is `/proc/fs/lustre`;
/// `rooted("/tmp/x", "/proc/fs/lustre")` is `/tmp/x/proc/fs/lustre`.
pub fn rooted(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}
