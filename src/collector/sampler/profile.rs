//! Catalogue of sub-samplers per node role.

use std::fmt;
use std::str::FromStr;

use crate::collector::binder::SinkNaming;
use crate::collector::parser::{
    BrwHistogramFormat, PeersFormat, RpcHistogramFormat, StatFormat, StatsFormat, TimeoutsFormat,
};

/// Node role selecting a set of sub-samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Client,
    Oss,
    Mds,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Profile::Client),
            "oss" => Ok(Profile::Oss),
            "mds" => Ok(Profile::Mds),
            other => Err(format!("unknown profile '{other}' (expected client, oss or mds)")),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Profile::Client => "client",
            Profile::Oss => "oss",
            Profile::Mds => "mds",
        })
    }
}

/// Where a sub-sampler's entities come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One file below the resolved root.
    Single,
    /// One entity per `<fs>-<TAG><idx>...` directory.
    ByServer,
    /// One entity per `<fs>-...` directory.
    ByFilesystem,
}

impl Layout {
    pub fn naming(self) -> SinkNaming {
        match self {
            Layout::Single => SinkNaming::SingleSource,
            Layout::ByServer => SinkNaming::PerServer,
            Layout::ByFilesystem => SinkNaming::PerFilesystem,
        }
    }
}

/// On-disk grammar of a sub-sampler's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Stats { sum2: bool },
    RpcHistogram,
    BrwHistogram,
    Timeouts,
    Peers,
}

impl Grammar {
    pub fn format(self) -> Box<dyn StatFormat> {
        match self {
            Grammar::Stats { sum2 } => Box::new(StatsFormat::new(sum2)),
            Grammar::RpcHistogram => Box::new(RpcHistogramFormat::default()),
            Grammar::BrwHistogram => Box::new(BrwHistogramFormat),
            Grammar::Timeouts => Box::new(TimeoutsFormat),
            Grammar::Peers => Box::new(PeersFormat),
        }
    }
}

/// When an entity's main sink is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// With the entity.
    Eager,
    /// On the first file that carries data.
    Lazy,
}

/// Static description of one sub-sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerSpec {
    /// Sub-sampler name, also the sink category.
    pub name: &'static str,
    /// Candidate roots in fallback order.
    pub roots: &'static [&'static str],
    /// Stat file name below the root (single) or below each entity directory.
    pub file: &'static str,
    pub layout: Layout,
    pub grammar: Grammar,
    pub binding: Binding,
    /// Whether entities also get an `_hf` sink fed by the timer thread.
    pub high_frequency: bool,
}

impl SamplerSpec {
    /// Name of the main schema.
    pub fn schema_name(&self) -> String {
        format!("lustre_{}", self.name)
    }
}

const LLITE: &[&str] = &["/proc/fs/lustre/llite", "/sys/kernel/debug/lustre/llite"];
const OSC: &[&str] = &["/proc/fs/lustre/osc", "/sys/kernel/debug/lustre/osc"];
const MDC: &[&str] = &["/proc/fs/lustre/mdc", "/sys/kernel/debug/lustre/mdc"];
const LNET: &[&str] = &["/sys/kernel/debug/lnet", "/proc/sys/lnet"];
const OBDFILTER: &[&str] = &["/proc/fs/lustre/obdfilter", "/sys/kernel/debug/lustre/obdfilter"];
const OSD_LDISKFS: &[&str] = &[
    "/proc/fs/lustre/osd-ldiskfs",
    "/sys/kernel/debug/lustre/osd-ldiskfs",
];
const MDT: &[&str] = &["/proc/fs/lustre/mdt", "/sys/kernel/debug/lustre/mdt"];

const fn tree(
    name: &'static str,
    roots: &'static [&'static str],
    file: &'static str,
    layout: Layout,
    grammar: Grammar,
    binding: Binding,
) -> SamplerSpec {
    SamplerSpec {
        name,
        roots,
        file,
        layout,
        grammar,
        binding,
        high_frequency: false,
    }
}

const fn single(name: &'static str, roots: &'static [&'static str], grammar: Grammar) -> SamplerSpec {
    SamplerSpec {
        name,
        roots,
        file: "stats",
        layout: Layout::Single,
        grammar,
        binding: Binding::Eager,
        high_frequency: false,
    }
}

const STATS: Grammar = Grammar::Stats { sum2: true };

const LNET_PEERS: SamplerSpec = SamplerSpec {
    name: "lnet_peers",
    roots: LNET,
    file: "peers",
    layout: Layout::Single,
    grammar: Grammar::Peers,
    binding: Binding::Lazy,
    high_frequency: false,
};

fn client() -> Vec<SamplerSpec> {
    use Binding::Eager;
    use Layout::{ByFilesystem, ByServer};
    vec![
        tree("llite_stats", LLITE, "stats", ByFilesystem, Grammar::Stats { sum2: false }, Eager),
        tree("osc_stats", OSC, "stats", ByServer, STATS, Eager),
        tree("mdc_stats", MDC, "stats", ByServer, STATS, Eager),
        tree("mdc_md_stats", MDC, "md_stats", ByServer, STATS, Eager),
        SamplerSpec {
            high_frequency: true,
            ..tree("osc_rpc_stats", OSC, "rpc_stats", ByServer, Grammar::RpcHistogram, Eager)
        },
        tree("mdc_rpc_stats", MDC, "rpc_stats", ByServer, Grammar::RpcHistogram, Eager),
        tree("osc_timeouts", OSC, "timeouts", ByServer, Grammar::Timeouts, Eager),
        tree("mdc_timeouts", MDC, "timeouts", ByServer, Grammar::Timeouts, Eager),
        LNET_PEERS,
    ]
}

fn oss() -> Vec<SamplerSpec> {
    use Binding::Lazy;
    use Layout::ByServer;
    vec![
        single("ost_oss_ost_stats", &["/sys/kernel/debug/lustre/ost/OSS/ost", "/proc/fs/lustre/ost/OSS/ost"], STATS),
        single(
            "ost_oss_ost_create_stats",
            &["/sys/kernel/debug/lustre/ost/OSS/ost_create", "/proc/fs/lustre/ost/OSS/ost_create"],
            STATS,
        ),
        single(
            "ost_oss_ost_io_stats",
            &["/sys/kernel/debug/lustre/ost/OSS/ost_io", "/proc/fs/lustre/ost/OSS/ost_io"],
            STATS,
        ),
        single(
            "ost_oss_ost_out_stats",
            &["/sys/kernel/debug/lustre/ost/OSS/ost_out", "/proc/fs/lustre/ost/OSS/ost_out"],
            STATS,
        ),
        single(
            "ost_oss_ost_seq_stats",
            &["/sys/kernel/debug/lustre/ost/OSS/ost_seq", "/proc/fs/lustre/ost/OSS/ost_seq"],
            STATS,
        ),
        tree("obdfilter_stats", OBDFILTER, "stats", ByServer, STATS, Lazy),
        tree("osd_ldiskfs_stats", OSD_LDISKFS, "stats", ByServer, STATS, Lazy),
        tree("osd_ldiskfs_brw_stats", OSD_LDISKFS, "brw_stats", ByServer, Grammar::BrwHistogram, Lazy),
    ]
}

fn mds() -> Vec<SamplerSpec> {
    vec![
        single("mds_mdt_stats", &["/sys/kernel/debug/lustre/mds/MDS/mdt", "/proc/fs/lustre/mds/MDS/mdt"], STATS),
        single(
            "mds_mdt_readpage_stats",
            &["/sys/kernel/debug/lustre/mds/MDS/mdt_readpage", "/proc/fs/lustre/mds/MDS/mdt_readpage"],
            STATS,
        ),
        tree("mdt_md_stats", MDT, "md_stats", Layout::ByServer, STATS, Binding::Lazy),
        LNET_PEERS,
    ]
}

impl Profile {
    /// Sub-samplers of this role.
    pub fn samplers(self) -> Vec<SamplerSpec> {
        match self {
            Profile::Client => client(),
            Profile::Oss => oss(),
            Profile::Mds => mds(),
        }
    }
}

/// Sub-samplers of several roles, each name once, in profile order.
pub fn samplers_for(profiles: &[Profile]) -> Vec<SamplerSpec> {
    let mut specs: Vec<SamplerSpec> = Vec::new();
    for profile in profiles {
        for spec in profile.samplers() {
            if !specs.iter().any(|s| s.name == spec.name) {
                specs.push(spec);
            }
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_from_str() {
        assert_eq!("client".parse::<Profile>(), Ok(Profile::Client));
        assert_eq!("OSS".parse::<Profile>(), Ok(Profile::Oss));
        assert!("router".parse::<Profile>().is_err());
        assert_eq!(Profile::Mds.to_string(), "mds");
    }

    #[test]
    fn test_only_osc_rpc_stats_has_hf() {
        let hf: Vec<&str> = samplers_for(&[Profile::Client, Profile::Oss, Profile::Mds])
            .iter()
            .filter(|s| s.high_frequency)
            .map(|s| s.name)
            .collect();
        assert_eq!(hf, vec!["osc_rpc_stats"]);
    }

    #[test]
    fn test_samplers_for_dedups_lnet_peers() {
        let specs = samplers_for(&[Profile::Client, Profile::Mds]);
        assert_eq!(specs.iter().filter(|s| s.name == "lnet_peers").count(), 1);
        let mut names: Vec<&str> = specs.iter().map(|s| s.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), specs.len());
    }

    #[test]
    fn test_schema_names() {
        let spec = &Profile::Oss.samplers()[0];
        assert_eq!(spec.schema_name(), "lustre_ost_oss_ost_stats");
        assert_eq!(spec.layout.naming(), SinkNaming::SingleSource);
    }
}
