//! Pre-built mock Lustre trees for testing.
//!
//! These scenarios lay out the `/proc` and debugfs files a client, an OSS
//! and an MDS expose, with the contents of a small test filesystem
//! `testfs`.

use super::filesystem::MockFs;

pub const OSC_STATS: &str = "\
snapshot_time             1700000000.123456789 secs.nsecs
start_time                1699990000.000000000 secs.nsecs
elapsed_time              10000.123456789 secs.nsecs
req_waittime              120 samples [usec] 31 1050 21727 6428495
req_active                120 samples [reqs] 1 3 130 150
read_bytes                12 samples [bytes] 4096 1048576 8388608 6291456000
write_bytes               3 samples [bytes] 4096 4096 12288 50331648
ost_setattr               2 samples [usec] 40 60 100 5200
";

pub const MDC_MD_STATS: &str = "\
snapshot_time             1700000000.123456789 secs.nsecs
close                     4 samples [reqs]
getattr                   9 samples [reqs]
";

pub const LLITE_STATS: &str = "\
snapshot_time             1700000000.223456789 secs.nsecs
read_bytes                8 samples [bytes] 0 1048576 4194304
write_bytes               2 samples [bytes] 4096 8192 12288
open                      17 samples [usecs]
";

pub const RPC_STATS: &str = "\
snapshot_time:         1700000000.500000000 (secs.nsecs)
read RPCs in flight:  0
write RPCs in flight: 1
pending write pages:  16
pending read pages:   0

                        read                    write
pages per rpc         rpcs   % cum % |       rpcs   % cum %
1:                       0   0   0   |          2  50  50
256:                     1 100 100   |          2  50 100

                        read                    write
rpcs in flight        rpcs   % cum % |       rpcs   % cum %
1:                       1 100 100   |          4 100 100

                        read                    write
offset                rpcs   % cum % |       rpcs   % cum %
0:                       1 100 100   |          4 100 100
";

pub const TIMEOUTS: &str = "\
last reply : 1700000000, 5s ago
network    : cur   5  worst   5 (at 1699999000, 1000s ago)   5   5   5   5
portal 28  : cur  10  worst  15 (at 1699999000, 1000s ago)  10   5   5   7
portal 7   : cur   1  worst   1 (at 1699999000, 1000s ago)   1   1   1   1
";

pub const PEERS: &str = "\
nid                      refs state  last   max   rtr   min    tx   min queue
0@lo                        1    NA    -1     0     0     0     0     0 0
10.0.0.2@tcp                2    up    45     8     8     8     8     6 0
";

pub const OSS_SERVICE_STATS: &str = "\
snapshot_time             1700000000.000000001 secs.nsecs
req_waittime              500 samples [usec] 10 9000 120000 99000000
req_qdepth                500 samples [reqs] 0 3 40 60
ost_write                 250 samples [usec] 100 20000 600000 9000000000
";

pub const OBDFILTER_STATS: &str = "\
snapshot_time             1700000000.000000001 secs.nsecs
read_bytes                100 samples [bytes] 4096 1048576 52428800 27487790694400
write_bytes               40 samples [bytes] 4096 1048576 20971520 10995116277760
setattr                   3 samples [reqs]
";

pub const BRW_STATS: &str = "\
snapshot_time:         1700000000.250000000 (secs.nsecs)

                           read      |     write
pages per bulk r/w     rpcs  % cum % |  rpcs        % cum %
1:                       0   0   0   |    5  50  50
256:                     1 100 100   |    5  50 100

                           read      |     write
disk I/O size          ios   % cum % |  ios         % cum %
4K:                      0   0   0   |    5  50  50
1M:                      1 100 100   |    5  50 100
";

pub const MDT_MD_STATS: &str = "\
snapshot_time             1700000000.000000002 secs.nsecs
open                      1200 samples [usecs] 2 800 24000 1100000
close                     1180 samples [usecs] 1 300 9000 200000
getattr                   5000 samples [usecs] 1 90 60000 900000
";

#[allow(dead_code)]
impl MockFs {
    /// Adds an OSC device directory with stats, rpc_stats and timeouts.
    pub fn add_osc_device(&self, name: &str) {
        let dir = format!("/proc/fs/lustre/osc/{name}");
        self.add_file(format!("{dir}/stats"), OSC_STATS);
        self.add_file(format!("{dir}/rpc_stats"), RPC_STATS);
        self.add_file(format!("{dir}/timeouts"), TIMEOUTS);
    }

    /// Adds an MDC device directory.
    pub fn add_mdc_device(&self, name: &str) {
        let dir = format!("/proc/fs/lustre/mdc/{name}");
        self.add_file(format!("{dir}/stats"), OSC_STATS);
        self.add_file(format!("{dir}/md_stats"), MDC_MD_STATS);
        self.add_file(format!("{dir}/rpc_stats"), RPC_STATS);
        self.add_file(format!("{dir}/timeouts"), TIMEOUTS);
    }

    /// Client mounting `testfs` with two OSTs and one MDT.
    pub fn lustre_client() -> Self {
        let fs = Self::new();
        fs.add_file("/proc/sys/kernel/hostname", "client1.example.com\n");

        fs.add_file("/proc/fs/lustre/llite/testfs-ffff9dec70092000/stats", LLITE_STATS);
        fs.add_osc_device("testfs-OST0000-osc-ffff9dec70092000");
        fs.add_osc_device("testfs-OST0001-osc-ffff9dec70092000");
        fs.add_mdc_device("testfs-MDT0000-mdc-ffff9dec70092000");
        // plain file next to the device directories
        fs.add_file("/proc/fs/lustre/osc/num_refs", "3\n");

        fs.add_file("/sys/kernel/debug/lnet/peers", PEERS);
        fs
    }

    /// Object storage server with two OSTs on ldiskfs.
    pub fn lustre_oss() -> Self {
        let fs = Self::new();
        fs.add_file("/proc/sys/kernel/hostname", "oss1\n");

        for svc in ["ost", "ost_create", "ost_io", "ost_out", "ost_seq"] {
            fs.add_file(
                format!("/sys/kernel/debug/lustre/ost/OSS/{svc}/stats"),
                OSS_SERVICE_STATS,
            );
        }
        for target in ["testfs-OST0000", "testfs-OST0001"] {
            fs.add_file(format!("/proc/fs/lustre/obdfilter/{target}/stats"), OBDFILTER_STATS);
            fs.add_file(format!("/proc/fs/lustre/osd-ldiskfs/{target}/stats"), OBDFILTER_STATS);
            fs.add_file(format!("/proc/fs/lustre/osd-ldiskfs/{target}/brw_stats"), BRW_STATS);
        }
        fs
    }

    /// Metadata server with one MDT.
    pub fn lustre_mds() -> Self {
        let fs = Self::new();
        fs.add_file("/proc/sys/kernel/hostname", "mds1\n");

        for svc in ["mdt", "mdt_readpage"] {
            fs.add_file(
                format!("/sys/kernel/debug/lustre/mds/MDS/{svc}/stats"),
                OSS_SERVICE_STATS,
            );
        }
        fs.add_file("/proc/fs/lustre/mdt/testfs-MDT0000/md_stats", MDT_MD_STATS);
        fs.add_file("/proc/sys/lnet/peers", PEERS);
        fs
    }
}
