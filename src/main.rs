// INSPECTOR-BENCH v0.4.0 -- MEASUREMENT HARNESS
// DRIVES BENCHMARK SWEEPS UNDER FOUR INSTRUMENTATION MODES AND KEEPS A
// RESUMABLE JSON RUN LOG PER BENCHMARK SET
//
// run    SWEEP A CATALOG (ROOT NEEDED FOR CGROUPS, perf AND CPU HOTPLUG)
// stats  TRIMMED RATIOS OVER THE pthread BASELINE FROM A RUN LOG
// check  HOST PREREQUISITES

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use inspector_bench::config::{
    DEFAULT_CGROUP_PREFIX, DEFAULT_CGROUP_ROOT, DEFAULT_CONCURRENCY_VAR, DEFAULT_TRACE_EVENT,
};
use inspector_bench::mode::LibraryMode;
use inspector_bench::topology::SYSFS_CPU_ROOT;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "inspector-bench")]
#[command(about = "INSPECTOR-BENCH -- PERF/CGROUP MEASUREMENT HARNESS")]
struct Cli {
    // TRACING FILTER (trace, debug, info, warn, error OR A FULL DIRECTIVE)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Run(RunArgs),
    Stats(StatsArgs),
    Check(CheckArgs),
}

#[derive(Args)]
pub struct RunArgs {
    // BENCHMARK CATALOG (JSON)
    pub catalog: PathBuf,

    // DIRECTORY RECEIVING ONE RUN LOG PER BENCHMARK SET
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    // ONLY RUN THESE MODES (REPEATABLE; DEFAULT ALL FOUR)
    #[arg(long = "mode")]
    pub modes: Vec<LibraryMode>,

    // ONLY RUN SETS WHOSE LOG NAME IS LISTED (REPEATABLE)
    #[arg(long = "set")]
    pub sets: Vec<String>,

    #[arg(long, default_value = "perf")]
    pub perf: PathBuf,

    // perf EVENTS (COMMA-SEPARATED; DEFAULT: THE 15 GENERIC EVENTS)
    #[arg(long, value_delimiter = ',')]
    pub events: Vec<String>,

    // TRACE ARTIFACT WRITTEN BY perf record IN TRACE MODES
    #[arg(long, default_value = "perf.data")]
    pub perf_log: PathBuf,

    #[arg(long, default_value = DEFAULT_TRACE_EVENT)]
    pub trace_event: String,

    // COMPRESSION FILTER; THE TRACE PATH IS APPENDED, OUTPUT READ FROM STDOUT
    #[arg(long, default_value = "lz4 --stdout")]
    pub compress: String,

    // THREADING LIBRARY INJECTED VIA LD_PRELOAD IN tthread/inspector MODES
    #[arg(long, default_value = "libtthread.so")]
    pub tthread_lib: PathBuf,

    #[arg(long, default_value = DEFAULT_CGROUP_ROOT)]
    pub cgroup_root: PathBuf,

    #[arg(long, default_value = DEFAULT_CGROUP_PREFIX)]
    pub cgroup_prefix: String,

    // ENVIRONMENT VARIABLE CARRYING THE THREAD COUNT TO THE WORKLOAD
    #[arg(long, default_value = DEFAULT_CONCURRENCY_VAR)]
    pub concurrency_var: String,

    // ALSO ACCOUNT PEAK MEMORY THROUGH THE memory CONTROLLER
    #[arg(long)]
    pub track_memory: bool,

    // LEAVE ALL CPUs ONLINE (NO HOTPLUG PER THREAD COUNT)
    #[arg(long)]
    pub no_topology: bool,

    #[arg(long, default_value = SYSFS_CPU_ROOT)]
    pub sysfs_cpu_root: PathBuf,
}

#[derive(Args)]
pub struct StatsArgs {
    // RUN LOG WRITTEN BY `run`
    pub log: PathBuf,

    // METRICS TO REPORT (REPEATABLE; DEFAULT: times)
    #[arg(long = "metric")]
    pub metrics: Vec<String>,
}

#[derive(Args)]
pub struct CheckArgs {
    #[arg(long, default_value = "perf")]
    pub perf: PathBuf,

    #[arg(long, default_value = "lz4")]
    pub compressor: String,

    #[arg(long, default_value = DEFAULT_CGROUP_ROOT)]
    pub cgroup_root: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Command::Run(args) => {
            ctrlc::set_handler(move || {
                SHUTDOWN.store(true, Ordering::Relaxed);
            })?;
            cli::run::run_sweep(&args, &SHUTDOWN)
        }
        Command::Stats(args) => cli::stats::run_stats(&args),
        Command::Check(args) => cli::check::run_check(&args),
    }
}
