//! Entity cache and per-tick reconciliation.
//!
//! Each tick the cache is rebuilt from a fresh directory listing:
//!
//! ```text
//!   old generation           scan            new generation
//!   ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//!   │ a  b  c      │    │ a  c  d      │    │ a  c  d      │
//!   └──┬──┬──┬─────┘    └──────────────┘    └──▲──▲──▲─────┘
//!      │  │  └──────────── moved ──────────────┘  │  │
//!      └──┼──────────────── moved ────────────────┘  │
//!         │                  constructed ────────────┘
//!         └─ left behind: destroyed before the swap
//! ```
//!
//! Whatever is left in the old map once every scanned name has been moved
//! or constructed is exactly the set of entities to destroy.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::collector::traits::{DirEntry, FileSystem};
use crate::util::LogOnce;

/// Counters describing one reconcile pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub kept: usize,
    pub created: usize,
    pub destroyed: usize,
    pub failed: usize,
    /// Non-directory and pseudo entries ignored by the scan.
    pub skipped: usize,
}

impl ReconcileStats {
    pub fn add(&mut self, other: &ReconcileStats) {
        self.kept += other.kept;
        self.created += other.created;
        self.destroyed += other.destroyed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Ordered map from directory entry name to entity, rebuilt by full swap.
#[derive(Debug)]
pub struct EntityCache<E> {
    entries: BTreeMap<String, E>,
    dir_missing: LogOnce,
    /// Names whose construction failed last tick, so repeats log quietly.
    rejected: BTreeSet<String>,
}

impl<E> Default for EntityCache<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            dir_missing: LogOnce::new(),
            rejected: BTreeSet::new(),
        }
    }
}

impl<E> EntityCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &E)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut E)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Reconciles the cache against one directory scan.
    ///
    /// # Arguments
    /// * `scan` - Entries of the root directory, in any order
    /// * `construct` - Builds an entity for a name not already cached
    ///
    /// Cached entities for names present in the scan are moved unchanged into
    /// the new generation. Construction failures are logged and the name is
    /// left out; it is retried on the next pass. Entities not seen in the
    /// scan are dropped before the new generation replaces the old one.
    pub fn reconcile<I, C, Err>(&mut self, scan: I, mut construct: C) -> ReconcileStats
    where
        I: IntoIterator<Item = DirEntry>,
        C: FnMut(&str) -> Result<E, Err>,
        Err: std::fmt::Display,
    {
        let mut stats = ReconcileStats::default();
        let mut old = std::mem::take(&mut self.entries);
        let mut next = BTreeMap::new();
        let mut rejected = BTreeSet::new();

        for entry in scan {
            if !entry.is_dir || entry.name == "." || entry.name == ".." {
                stats.skipped += 1;
                continue;
            }
            if next.contains_key(&entry.name) {
                continue;
            }
            if let Some(existing) = old.remove(&entry.name) {
                next.insert(entry.name, existing);
                stats.kept += 1;
                continue;
            }
            match construct(&entry.name) {
                Ok(entity) => {
                    debug!("created entity {}", entry.name);
                    next.insert(entry.name, entity);
                    stats.created += 1;
                }
                Err(e) => {
                    if self.rejected.contains(&entry.name) {
                        debug!("skipping {}: {}", entry.name, e);
                    } else {
                        warn!("skipping {}: {}", entry.name, e);
                    }
                    rejected.insert(entry.name);
                    stats.failed += 1;
                }
            }
        }

        stats.destroyed = old.len();
        for (id, entity) in old {
            debug!("destroying entity {}", id);
            drop(entity);
        }

        self.entries = next;
        self.rejected = rejected;
        stats
    }

    /// Scans `root` and reconciles against it.
    ///
    /// Returns `None`, leaving the cache untouched, if the directory cannot
    /// be read. That condition is warned about once until it clears.
    pub fn refresh<F, C, Err>(
        &mut self,
        fs: &F,
        root: &Path,
        construct: C,
    ) -> Option<ReconcileStats>
    where
        F: FileSystem + ?Sized,
        C: FnMut(&str) -> Result<E, Err>,
        Err: std::fmt::Display,
    {
        let scan = match fs.read_dir(root) {
            Ok(entries) => {
                if self.dir_missing.reset() {
                    debug!("{} is readable again", root.display());
                }
                entries
            }
            Err(e) => {
                if self.dir_missing.trigger() {
                    warn!("cannot open {}: {}", root.display(), e);
                }
                return None;
            }
        };
        Some(self.reconcile(scan, construct))
    }

    /// Destroys every entity. Used on teardown.
    pub fn clear(&mut self) -> usize {
        let entries = std::mem::take(&mut self.entries);
        let count = entries.len();
        for (id, entity) in entries {
            debug!("destroying entity {}", id);
            drop(entity);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Entity that records its own destruction.
    struct Tracked {
        serial: usize,
        log: Rc<RefCell<Vec<usize>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.serial);
        }
    }

    fn dirs(names: &[&str]) -> Vec<DirEntry> {
        names.iter().map(|n| DirEntry::dir(*n)).collect()
    }

    fn constructor(
        serial: &Rc<RefCell<usize>>,
        log: &Rc<RefCell<Vec<usize>>>,
    ) -> impl FnMut(&str) -> Result<Tracked, String> {
        let serial = serial.clone();
        let log = log.clone();
        move |_name| {
            let mut s = serial.borrow_mut();
            *s += 1;
            Ok(Tracked {
                serial: *s,
                log: log.clone(),
            })
        }
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let serial = Rc::new(RefCell::new(0));
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut cache = EntityCache::new();

        let first = cache.reconcile(dirs(&["a", "b"]), constructor(&serial, &log));
        assert_eq!(first.created, 2);
        let before: Vec<usize> = cache.iter().map(|(_, e)| e.serial).collect();

        let second = cache.reconcile(dirs(&["b", "a"]), constructor(&serial, &log));
        assert_eq!(second.kept, 2);
        assert_eq!(second.created, 0);
        let after: Vec<usize> = cache.iter().map(|(_, e)| e.serial).collect();
        assert_eq!(before, after);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_reconcile_destroys_missing_exactly_once() {
        let serial = Rc::new(RefCell::new(0));
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut cache = EntityCache::new();

        cache.reconcile(dirs(&["a", "b", "c"]), constructor(&serial, &log));
        let b_serial = cache.get("b").unwrap().serial;

        let stats = cache.reconcile(dirs(&["a", "c", "d"]), constructor(&serial, &log));
        assert_eq!(stats.destroyed, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(*log.borrow(), vec![b_serial]);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.ids().collect::<Vec<_>>(), vec!["a", "c", "d"]);

        cache.reconcile(dirs(&["a", "c", "d"]), constructor(&serial, &log));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_reconcile_skips_files_and_pseudo_entries() {
        let mut cache: EntityCache<String> = EntityCache::new();
        let scan = vec![
            DirEntry::dir("."),
            DirEntry::dir(".."),
            DirEntry::file("README"),
            DirEntry::dir("testfs-OST0000"),
        ];
        let stats = cache.reconcile(scan, |name| Ok::<_, String>(name.to_string()));
        assert_eq!(stats.skipped, 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_construction_failure_is_retried() {
        let mut cache: EntityCache<String> = EntityCache::new();
        let stats = cache.reconcile(dirs(&["x"]), |_| Err::<String, _>("sink table full"));
        assert_eq!(stats.failed, 1);
        assert!(cache.is_empty());

        let stats = cache.reconcile(dirs(&["x"]), |name| Ok::<_, String>(name.to_string()));
        assert_eq!(stats.created, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_refresh_keeps_cache_when_root_missing() {
        let fs = MockFs::new();
        fs.add_dir("/lustre/osc/testfs-OST0000-osc-1");

        let mut cache: EntityCache<String> = EntityCache::new();
        let ctor = |name: &str| Ok::<_, String>(name.to_string());
        assert!(cache.refresh(&fs, Path::new("/lustre/osc"), ctor).is_some());
        assert_eq!(cache.len(), 1);

        fs.remove_dir_all("/lustre/osc");
        assert!(cache.refresh(&fs, Path::new("/lustre/osc"), ctor).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.dir_missing.has_fired());

        fs.add_dir("/lustre/osc");
        let stats = cache.refresh(&fs, Path::new("/lustre/osc"), ctor).unwrap();
        assert_eq!(stats.destroyed, 1);
        assert!(!cache.dir_missing.has_fired());
    }

    #[test]
    fn test_clear_destroys_everything() {
        let serial = Rc::new(RefCell::new(0));
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut cache = EntityCache::new();
        cache.reconcile(dirs(&["a", "b"]), constructor(&serial, &log));
        assert_eq!(cache.clear(), 2);
        assert_eq!(log.borrow().len(), 2);
        assert!(cache.is_empty());
    }
}
