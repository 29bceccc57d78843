use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use tracing::info;

use inspector_bench::catalog::Catalog;
use inspector_bench::config::HarnessConfig;
use inspector_bench::coordinator::{Coordinator, Sweep};
use inspector_bench::mode::ALL_MODES;
use inspector_bench::store::RunStore;
use inspector_bench::topology::{SysfsTopology, Topology, Unmanaged};

use crate::RunArgs;

fn harness_config(args: &RunArgs) -> Result<HarnessConfig> {
    let compress_command: Vec<String> = args.compress.split_whitespace().map(str::to_string).collect();
    if compress_command.is_empty() {
        bail!("--compress must name a filter command");
    }
    let defaults = HarnessConfig::default();
    Ok(HarnessConfig {
        perf_command: args.perf.clone(),
        events: if args.events.is_empty() { defaults.events } else { args.events.clone() },
        trace_path: args.perf_log.clone(),
        trace_event: args.trace_event.clone(),
        cgroup_root: args.cgroup_root.clone(),
        cgroup_prefix: args.cgroup_prefix.clone(),
        compress_command,
        tthread_library: args.tthread_lib.clone(),
        concurrency_var: args.concurrency_var.clone(),
        track_memory: args.track_memory,
    })
}

pub fn run_sweep(args: &RunArgs, shutdown: &AtomicBool) -> Result<()> {
    let cfg = harness_config(args)?;
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;
    let modes = if args.modes.is_empty() { ALL_MODES.to_vec() } else { args.modes.clone() };

    let mut topology: Box<dyn Topology> = if args.no_topology {
        Box::new(Unmanaged)
    } else {
        Box::new(
            SysfsTopology::new(&args.sysfs_cpu_root)
                .map_err(anyhow::Error::msg)
                .context("cpu topology (use --no-topology to leave cpus alone)")?,
        )
    };

    let nr_cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    println!("INSPECTOR-BENCH v{}", env!("CARGO_PKG_VERSION"));
    println!("CPUS:            {}", nr_cpus);
    println!("CATALOG:         {}", args.catalog.display());
    println!("OUTPUT:          {}", args.output_dir.display());
    println!("MODES:           {}", modes.iter().map(|m| m.name()).collect::<Vec<_>>().join(","));
    println!("PERF:            {} ({} events)", cfg.perf_command.display(), cfg.events.len());
    println!("CGROUPS:         {} (prefix {})", cfg.cgroup_root.display(), cfg.cgroup_prefix);
    println!("TOPOLOGY:        {}", if args.no_topology { "UNMANAGED" } else { "HOTPLUG" });
    println!("MEMORY:          {}", cfg.track_memory);
    println!();

    let mut coordinator = Coordinator::new(&cfg);
    let mut failed = 0usize;

    for set in &catalog.sets {
        if !args.sets.is_empty() && !args.sets.iter().any(|s| s == &set.log) {
            continue;
        }
        let log_path = args.output_dir.join(&set.log);
        let mut store = RunStore::open(&log_path)
            .with_context(|| format!("opening run log {}", log_path.display()))?;

        info!(log = %log_path.display(), benchmarks = set.benchmarks.len(), threads = ?set.threads, "starting benchmark set");
        println!("SET: {} ({} BENCHMARKS, THREADS {:?})", set.log, set.benchmarks.len(), set.threads);

        let sweep = Sweep {
            benchmarks: &set.benchmarks,
            thread_counts: &set.threads,
            modes: &modes,
            events: &cfg.events,
            shutdown,
        };
        let report = sweep
            .run(&mut store, &mut coordinator, topology.as_mut())
            .with_context(|| format!("sweep for {}", set.log))?;
        report.print();
        failed += report.failures.len();

        if shutdown.load(Ordering::Relaxed) {
            println!("INSPECTOR-BENCH INTERRUPTED");
            break;
        }
    }

    if failed > 0 {
        println!("{} CELL(S) FAILED; RERUN TO RESUME", failed);
    }
    println!("INSPECTOR-BENCH OUT.");
    Ok(())
}
