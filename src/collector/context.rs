//! Process-wide sampler settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::paths::rooted;
use crate::collector::traits::FileSystem;
use crate::util::default_producer;

/// Settings shared by every sub-sampler, created once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerContext {
    /// First segment of every sink name, usually the short host name.
    pub producer: String,
    /// Second segment of per-server and per-filesystem sink names.
    pub sampler_name: String,
    pub component_id: u64,
    /// Period of the high-frequency timer.
    pub hf_interval: Duration,
    /// Prefix of every well-known path.
    pub root: PathBuf,
    /// Record pool size of each sink.
    pub list_capacity: usize,
    /// Job info file stamped into every commit, below `root`. `None`
    /// leaves the job fields out of every schema.
    pub job_info: Option<PathBuf>,
}

impl SamplerContext {
    pub const DEFAULT_SAMPLER_NAME: &'static str = "lustre_fulldump";
    pub const DEFAULT_HF_INTERVAL: Duration = Duration::from_millis(100);
    pub const DEFAULT_LIST_CAPACITY: usize = 256;

    pub fn new(producer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            sampler_name: Self::DEFAULT_SAMPLER_NAME.to_string(),
            component_id: 0,
            hf_interval: Self::DEFAULT_HF_INTERVAL,
            root: PathBuf::from("/"),
            list_capacity: Self::DEFAULT_LIST_CAPACITY,
            job_info: None,
        }
    }

    /// Context named after the host, read through `fs`.
    pub fn detect<F: FileSystem>(fs: &F) -> Self {
        Self::new(default_producer(fs))
    }

    pub fn with_component_id(mut self, component_id: u64) -> Self {
        self.component_id = component_id;
        self
    }

    pub fn with_hf_interval(mut self, interval: Duration) -> Self {
        self.hf_interval = interval;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_list_capacity(mut self, capacity: usize) -> Self {
        self.list_capacity = capacity;
        self
    }

    pub fn with_job_info(mut self, path: impl Into<PathBuf>) -> Self {
        self.job_info = Some(path.into());
        self
    }

    /// Job info file path below the configured root, if enabled.
    pub fn job_info_path(&self) -> Option<PathBuf> {
        self.job_info
            .as_ref()
            .map(|path| rooted(&self.root, &path.to_string_lossy()))
    }

    /// Well-known absolute path below the configured root.
    pub fn path(&self, path: &str) -> PathBuf {
        rooted(&self.root, path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for SamplerContext {
    fn default() -> Self {
        Self::new("localhost")
    }
}
