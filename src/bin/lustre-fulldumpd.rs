//! lustre-fulldumpd - Lustre stat file collector daemon.
//!
//! Samples Lustre client and server stat files on a fixed interval and
//! appends every committed sink to hourly JSON-lines files.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use lustre_fulldump::collector::{
    Collector, DEFAULT_JOB_INFO_PATH, Profile, RealFs, SamplerContext,
};
use lustre_fulldump::registry::MemoryRegistry;
use lustre_fulldump::storage::JsonLinesWriter;

/// Lustre stat file collector daemon.
#[derive(Parser, Debug)]
#[command(name = "lustre-fulldumpd", about = "Lustre stat file collector daemon", version)]
struct Args {
    /// Collection interval in seconds.
    #[arg(short, long, default_value = "10")]
    interval: u64,

    /// High-frequency accumulation interval in milliseconds.
    #[arg(long, default_value = "100")]
    hf_interval_ms: u64,

    /// Producer name used as the first sink name segment. Defaults to the
    /// short hostname.
    #[arg(long)]
    producer: Option<String>,

    /// Component id stored in every identity record.
    #[arg(long, default_value = "0")]
    component_id: u64,

    /// Node role to sample (client, oss, mds). May be repeated.
    #[arg(short, long = "profile", default_value = "client")]
    profiles: Vec<Profile>,

    /// Prefix of every /proc and /sys path (for testing against a copied tree).
    #[arg(long, default_value = "/")]
    root: String,

    /// Output directory for JSON-lines files, or `-` for stdout.
    #[arg(short, long, default_value = "./data")]
    output_dir: String,

    /// Record pool size of each sink.
    #[arg(long, default_value = "256")]
    list_capacity: usize,

    /// Stamp job fields read from this file into every commit. Without a
    /// value, /var/run/ldms_jobinfo.data is used.
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_JOB_INFO_PATH)]
    job_info: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["lustre_fulldumpd", "lustre_fulldump"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Builds the sampler context from the detected host and the command line.
fn build_context(fs: &RealFs, args: &Args) -> SamplerContext {
    let mut context = SamplerContext::detect(fs)
        .with_component_id(args.component_id)
        .with_hf_interval(Duration::from_millis(args.hf_interval_ms))
        .with_root(&args.root)
        .with_list_capacity(args.list_capacity);
    if let Some(ref producer) = args.producer {
        context.producer = producer.clone();
    }
    if let Some(ref job_info) = args.job_info {
        context = context.with_job_info(job_info);
    }
    context
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("lustre-fulldumpd {} starting", env!("CARGO_PKG_VERSION"));
    let profiles: Vec<String> = args.profiles.iter().map(|p| p.to_string()).collect();
    info!(
        "Config: interval={}s, hf_interval={}ms, profiles={}, root={}, output={}",
        args.interval,
        args.hf_interval_ms,
        profiles.join(","),
        args.root,
        args.output_dir
    );

    let fs = RealFs::new();
    let context = build_context(&fs, &args);
    let registry = MemoryRegistry::new();

    let mut collector = match Collector::new(fs, Arc::new(registry.clone()), context, &args.profiles) {
        Ok(collector) => collector,
        Err(e) => {
            error!("Failed to initialize collector: {}", e);
            return ExitCode::FAILURE;
        }
    };
    debug!("Sub-samplers: {}", collector.sampler_names().join(", "));

    let mut writer = JsonLinesWriter::new(&args.output_dir);
    let interval = Duration::from_secs(args.interval);

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    info!("Starting collection loop");

    let mut tick_count: u64 = 0;
    while running.load(Ordering::SeqCst) {
        let report = collector.tick();
        tick_count += 1;
        info!("Tick #{}: {}", tick_count, report.summary());

        match writer.write(Utc::now(), &registry.published()) {
            Ok(lines) => debug!("Published {} sinks", lines),
            Err(e) => error!("Failed to publish sinks: {}", e),
        }

        if tick_count.is_multiple_of(60) {
            info!(
                "Registry stats: {} live sinks, {} lines written",
                registry.live_sinks(),
                writer.lines_written()
            );
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("Shutting down...");
    collector.shutdown();
    info!("Shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::try_parse_from(["lustre-fulldumpd"]).unwrap();
        assert_eq!(args.interval, 10);
        assert_eq!(args.hf_interval_ms, 100);
        assert_eq!(args.profiles, vec![Profile::Client]);
        assert_eq!(args.root, "/");
        assert_eq!(args.output_dir, "./data");
        assert_eq!(args.list_capacity, 256);
        assert!(args.producer.is_none());
        assert!(args.job_info.is_none());
    }

    #[test]
    fn test_repeated_profiles() {
        let args = Args::try_parse_from([
            "lustre-fulldumpd",
            "--profile",
            "oss",
            "--profile",
            "MDS",
            "--producer",
            "node7",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.profiles, vec![Profile::Oss, Profile::Mds]);
        assert_eq!(args.producer.as_deref(), Some("node7"));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_unknown_profile_rejected() {
        assert!(Args::try_parse_from(["lustre-fulldumpd", "--profile", "router"]).is_err());
    }

    #[test]
    fn test_producer_override() {
        let args = Args::try_parse_from([
            "lustre-fulldumpd",
            "--producer",
            "node7",
            "--root",
            "/tmp/tree",
            "--component-id",
            "42",
        ])
        .unwrap();
        let context = build_context(&RealFs::new(), &args);
        assert_eq!(context.producer, "node7");
        assert_eq!(context.component_id, 42);
        assert_eq!(context.root, std::path::PathBuf::from("/tmp/tree"));
    }

    #[test]
    fn test_job_info_flag() {
        let args = Args::try_parse_from(["lustre-fulldumpd", "--job-info"]).unwrap();
        assert_eq!(args.job_info, Some(PathBuf::from(DEFAULT_JOB_INFO_PATH)));

        let args =
            Args::try_parse_from(["lustre-fulldumpd", "--job-info", "/run/job.data"]).unwrap();
        let context = build_context(&RealFs::new(), &args);
        assert_eq!(context.job_info_path(), Some(PathBuf::from("/run/job.data")));
    }
}
