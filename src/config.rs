// INSPECTOR-BENCH HARNESS CONFIGURATION
// EVERY KNOB THE COORDINATOR NEEDS, PASSED EXPLICITLY. NOTHING IS READ FROM
// OR WRITTEN TO THE HARNESS PROCESS'S OWN ENVIRONMENT.

use std::path::PathBuf;

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
pub const DEFAULT_CGROUP_PREFIX: &str = "inspector";
pub const DEFAULT_CONCURRENCY_VAR: &str = "IM_CONCURRENCY";
pub const DEFAULT_TRACE_EVENT: &str = "intel_pt//";

pub const DEFAULT_EVENTS: [&str; 15] = [
    "branch-instructions",
    "bus-cycles",
    "cache-misses",
    "cache-references",
    "cpu-cycles",
    "instructions",
    "ref-cycles",
    "alignment-faults",
    "context-switches",
    "cpu-clock",
    "cpu-migrations",
    "major-faults",
    "minor-faults",
    "page-faults",
    "task-clock",
];

#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub perf_command: PathBuf,
    pub events: Vec<String>,
    pub trace_path: PathBuf,
    pub trace_event: String,
    pub cgroup_root: PathBuf,
    pub cgroup_prefix: String,
    // FILTER ARGV; THE TRACE PATH IS APPENDED, COMPRESSED BYTES READ FROM STDOUT
    pub compress_command: Vec<String>,
    pub tthread_library: PathBuf,
    pub concurrency_var: String,
    pub track_memory: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            perf_command: PathBuf::from("perf"),
            events: DEFAULT_EVENTS.iter().map(|s| s.to_string()).collect(),
            trace_path: PathBuf::from("perf.data"),
            trace_event: DEFAULT_TRACE_EVENT.to_string(),
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            cgroup_prefix: DEFAULT_CGROUP_PREFIX.to_string(),
            compress_command: vec!["lz4".to_string(), "--stdout".to_string()],
            tthread_library: PathBuf::from("libtthread.so"),
            concurrency_var: DEFAULT_CONCURRENCY_VAR.to_string(),
            track_memory: false,
        }
    }
}
