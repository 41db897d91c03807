//! High-frequency sampling of `rpc_stats` gauges.
//!
//! ```text
//!   HfTimer thread (every hf_interval)        main tick
//!   ──────────────────────────────────        ─────────────────────────────
//!   lock cache                                lock cache
//!   for each entity:                          reconcile
//!     read rpc_stats header                   sample stat files
//!     accumulator += reading                  for each entity:
//!   unlock                                      hf sink <- accumulator (tx)
//!                                               accumulator = 0
//!                                             unlock
//! ```
//!
//! Every flush publishes the count, sum and sum of squares of the readings
//! taken since the previous flush. The window resets on each main tick.

use std::io;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::collector::binder::{Sink, SinkNaming};
use crate::collector::parser::identity_schema;
use crate::collector::traits::FileSystem;
use crate::registry::{FieldDef, RegistryError, SchemaTemplate};
use crate::util::LogOnce;

/// Field name stems of the sampled gauges.
pub const HF_COUNTERS: [&str; 4] = [
    "read_RPCs_in_flight",
    "write_RPCs_in_flight",
    "pending_write_pages",
    "pending_read_pages",
];

/// Line prefixes of the gauges in `rpc_stats`, in `HF_COUNTERS` order.
const HF_PREFIXES: [&str; 4] = [
    "read RPCs in flight",
    "write RPCs in flight",
    "pending write pages",
    "pending read pages",
];

/// Count, sum and sum of squares of a series of readings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunningStat {
    pub count: u64,
    pub sum: u64,
    pub sum2: u64,
}

impl RunningStat {
    pub fn update(&mut self, value: u64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.sum2 = self.sum2.saturating_add(value.saturating_mul(value));
    }
}

/// Gauge readings from one pass over an `rpc_stats` header.
pub type HfReading = [Option<u64>; 4];

/// Extracts the gauges from `rpc_stats` content.
///
/// The first line is the snapshot header and is skipped. Gauges that do not
/// appear are `None`.
pub fn parse_hf_counters(content: &str) -> HfReading {
    let mut reading = [None; 4];
    for line in content.lines().skip(1) {
        for (slot, prefix) in reading.iter_mut().zip(HF_PREFIXES) {
            if let Some(rest) = line.strip_prefix(prefix) {
                // value follows the ':' after the prefix
                *slot = rest
                    .strip_prefix(':')
                    .and_then(|v| v.split_whitespace().next())
                    .and_then(|v| v.parse().ok());
            }
        }
    }
    reading
}

/// Per-entity tumbling window of gauge statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HfAccumulator {
    pub stats: [RunningStat; 4],
}

impl HfAccumulator {
    pub fn update(&mut self, reading: &HfReading) {
        for (stat, value) in self.stats.iter_mut().zip(reading) {
            if let Some(value) = value {
                stat.update(*value);
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Schema of the `_hf` companion sinks.
pub fn hf_schema(name: &str, naming: SinkNaming) -> SchemaTemplate {
    let mut schema = identity_schema(name, naming);
    for counter in HF_COUNTERS {
        schema = schema
            .field(FieldDef::u64(format!("{counter}_n")))
            .field(FieldDef::u64(format!("{counter}_sum")))
            .field(FieldDef::u64(format!("{counter}_sum2")));
    }
    schema
}

/// High-frequency sink of one entity and its accumulator.
#[derive(Debug)]
pub struct HfChannel {
    sink: Sink,
    accumulator: HfAccumulator,
    missing: LogOnce,
}

impl HfChannel {
    pub fn new(sink: Sink) -> Self {
        Self {
            sink,
            accumulator: HfAccumulator::default(),
            missing: LogOnce::new(),
        }
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    pub fn accumulator(&self) -> &HfAccumulator {
        &self.accumulator
    }

    /// Reads `path` once and folds the gauges into the accumulator.
    pub fn sample<F: FileSystem + ?Sized>(&mut self, fs: &F, path: &Path) -> bool {
        match fs.read_to_string(path) {
            Ok(content) => {
                self.missing.reset();
                self.accumulator.update(&parse_hf_counters(&content));
                true
            }
            Err(e) => {
                if self.missing.trigger() {
                    warn!("{}: high-frequency read failed: {}", path.display(), e);
                }
                false
            }
        }
    }

    /// Publishes the window in one transaction and starts a new one.
    ///
    /// The accumulator is left untouched if the transaction fails, so the
    /// readings are carried into the next flush.
    pub fn flush(&mut self) -> Result<(), RegistryError> {
        let tx = self.sink.begin()?;
        for (counter, stat) in HF_COUNTERS.iter().zip(&self.accumulator.stats) {
            tx.set(&format!("{counter}_n"), stat.count)?;
            tx.set(&format!("{counter}_sum"), stat.sum)?;
            tx.set(&format!("{counter}_sum2"), stat.sum2)?;
        }
        tx.commit()?;
        trace!("flushed {}", self.sink.name());
        self.accumulator.reset();
        Ok(())
    }
}

/// Background thread firing a callback at a fixed interval.
///
/// `cancel` returns only after the thread has exited, so no callback runs
/// once it has returned.
#[derive(Debug)]
pub struct HfTimer {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HfTimer {
    /// Spawns the timer thread.
    ///
    /// # Arguments
    /// * `name` - Thread name suffix, for logs
    /// * `interval` - Delay between callbacks
    /// * `tick` - Callback run on the timer thread
    pub fn start<T>(name: &str, interval: Duration, mut tick: T) -> io::Result<Self>
    where
        T: FnMut() + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(format!("hf-{name}"))
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        debug!("started high-frequency timer for {} every {:?}", name, interval);
        Ok(Self {
            name: name.to_string(),
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops the thread and waits for an in-flight callback to finish.
    pub fn cancel(&mut self) {
        if let Some(stop) = self.stop.take() {
            // an exited thread has dropped its receiver
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("high-frequency timer for {} panicked", self.name);
            }
            debug!("stopped high-frequency timer for {}", self.name);
        }
    }
}

impl Drop for HfTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::collector::MockFs;
    use crate::collector::binder::SinkBinder;
    use crate::collector::identity::parse_server_name;
    use crate::registry::{MemoryRegistry, MetricRegistry, Value};

    const RPC_HEADER: &str = "\
snapshot_time:         1700000000.500000000 (secs.nsecs)
read RPCs in flight:  2
write RPCs in flight: 3
pending write pages:  10
pending read pages:   0
";

    fn channel(registry: &MemoryRegistry) -> HfChannel {
        let schema = registry
            .define_schema(hf_schema("lustre_osc_rpc_stats_hf", SinkNaming::PerServer))
            .unwrap();
        let binder = SinkBinder::new(
            Arc::new(registry.clone()),
            schema,
            "node1",
            "lustre_fulldump",
            "osc_rpc_stats_hf",
            SinkNaming::PerServer,
            0,
        );
        let identity = parse_server_name("testfs-OST0000-osc-ffff").unwrap();
        HfChannel::new(binder.create_sink(&identity).unwrap())
    }

    #[test]
    fn test_parse_hf_counters() {
        assert_eq!(parse_hf_counters(RPC_HEADER), [Some(2), Some(3), Some(10), Some(0)]);
        assert_eq!(
            parse_hf_counters("snapshot_time: 1.0\nread RPCs in flight: 4\n"),
            [Some(4), None, None, None]
        );
        // header line is never a gauge
        assert_eq!(parse_hf_counters("read RPCs in flight: 4\n"), [None; 4]);
    }

    #[test]
    fn test_running_stat() {
        let mut stat = RunningStat::default();
        for v in [1, 2, 3] {
            stat.update(v);
        }
        assert_eq!(stat, RunningStat { count: 3, sum: 6, sum2: 14 });
    }

    #[test]
    fn test_flush_publishes_window_and_resets() {
        let registry = MemoryRegistry::new();
        let mut hf = channel(&registry);
        let fs = MockFs::new();
        let path = PathBuf::from("/proc/fs/lustre/osc/testfs-OST0000-osc-ffff/rpc_stats");
        fs.add_file(&path, RPC_HEADER);

        assert!(hf.sample(&fs, &path));
        assert!(hf.sample(&fs, &path));
        hf.flush().unwrap();
        assert_eq!(hf.accumulator(), &HfAccumulator::default());

        let snap = registry.snapshot(hf.sink().id()).unwrap();
        assert_eq!(snap.fields.get("write_RPCs_in_flight_n"), Some(&Value::U64(2)));
        assert_eq!(snap.fields.get("write_RPCs_in_flight_sum"), Some(&Value::U64(6)));
        assert_eq!(snap.fields.get("write_RPCs_in_flight_sum2"), Some(&Value::U64(18)));

        hf.flush().unwrap();
        let snap = registry.snapshot(hf.sink().id()).unwrap();
        assert_eq!(snap.fields.get("write_RPCs_in_flight_n"), Some(&Value::U64(0)));
    }

    #[test]
    fn test_missing_file_leaves_accumulator() {
        let registry = MemoryRegistry::new();
        let mut hf = channel(&registry);
        let fs = MockFs::new();
        assert!(!hf.sample(&fs, Path::new("/nope/rpc_stats")));
        assert_eq!(hf.accumulator(), &HfAccumulator::default());
    }

    #[test]
    fn test_timer_cancel_stops_callbacks() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut timer = HfTimer::start("test", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        while fired.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        timer.cancel();
        assert!(!timer.is_running());
        let after = fired.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), after);
    }
}
