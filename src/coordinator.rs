// INSPECTOR-BENCH RUN COORDINATOR
//
// ONE REPETITION:
//   REMOVE STALE TRACE -> CREATE CGROUPS -> START SAMPLER (+ TRACE RECORDER)
//   -> RENDEZVOUS WITH LAUNCHER -> WORKLOAD RUNS -> WORKLOAD EXITS
//   -> INTERRUPT SAMPLER, PARSE -> READ ACCOUNTING -> SIZE TRACE
//   -> RELEASE CGROUPS (ALWAYS) -> FOLD INTO LOG -> PERSIST
//
// THE SWEEP IS STRICTLY SEQUENTIAL: COUNTERS AND CPU TOPOLOGY ARE MACHINE-GLOBAL.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::catalog::Benchmark;
use crate::cgroup::{self, CgroupSet, Controller};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, RunError};
use crate::launcher::{self, ExitRecord, LaunchSpec};
use crate::mode::LibraryMode;
use crate::perf::{self, PerfRecord, PerfStat};
use crate::rendezvous::{Rendezvous, TwoPartyBarrier};
use crate::store::{CellMeta, RunStore, TARGET_REPETITIONS};
use crate::topology::{Topology, TopologyGuard};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Idle,
    Preparing,
    SamplingRunning,
    Collecting,
    Persisted,
    Failed,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Preparing => "PREPARING",
            Self::SamplingRunning => "SAMPLING+RUNNING",
            Self::Collecting => "COLLECTING",
            Self::Persisted => "PERSISTED",
            Self::Failed => "FAILED",
        }
    }
}

// ONE MEASURED REPETITION
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    pub wall_time: Duration,
    pub exit_code: i32,
    pub counters: BTreeMap<String, f64>,
    pub system_time: u64,
    pub user_time: u64,
    pub time_per_cpu: Vec<u64>,
    pub log_size: u64,
    pub compressed_log_size: u64,
    pub max_memory: Option<u64>,
}

pub struct RunConfiguration<'a> {
    pub benchmark: &'a Benchmark,
    pub threads: u32,
    pub mode: LibraryMode,
}

impl RunConfiguration<'_> {
    pub fn cell_key(&self) -> String {
        self.benchmark.cell_key(self.threads)
    }

    pub fn args(&self) -> Vec<String> {
        self.benchmark.resolve_args(self.threads)
    }
}

pub trait Execute {
    fn execute(&mut self, run: &RunConfiguration<'_>) -> Result<Sample, RunError>;
}

// ---------------------------------------------------------------------------
// SINGLE REPETITION
// ---------------------------------------------------------------------------

pub struct Coordinator<'c> {
    config: &'c HarnessConfig,
    phase: Phase,
}

impl<'c> Coordinator<'c> {
    pub fn new(config: &'c HarnessConfig) -> Self {
        Self { config, phase: Phase::Idle }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = self.phase.label(), to = phase.label(), "phase");
        self.phase = phase;
    }

    pub fn controllers(&self) -> Vec<Controller> {
        let mut c = vec![Controller::CpuAcct, Controller::PerfEvent];
        if self.config.track_memory {
            c.push(Controller::Memory);
        }
        c
    }

    fn launch_spec(&self, run: &RunConfiguration<'_>, cgroups: &CgroupSet) -> Result<LaunchSpec, HarnessError> {
        let mut env = run.benchmark.env.clone();
        env.insert(self.config.concurrency_var.clone(), run.threads.to_string());
        Ok(LaunchSpec {
            program: run.benchmark.program(),
            args: run.args(),
            cwd: run.benchmark.working_dir(),
            env,
            preload: run.mode.interpose().then(|| self.config.tthread_library.clone()),
            cgroups: cgroups.membership_files()?,
        })
    }

    // SAMPLER SIDE OF THE RENDEZVOUS. ON SUCCESS THE LAUNCHER IS RELEASED AND
    // THE WORKLOAD'S EXIT RECORD IS RETURNED ALONG WITH THE LIVE perf PROCESSES.
    pub fn sample_workload(
        &self,
        gate: &dyn Rendezvous,
        spec: &LaunchSpec,
        cgroup_name: &str,
        trace: bool,
    ) -> (Result<(PerfStat, Option<PerfRecord>), HarnessError>, Result<ExitRecord, HarnessError>) {
        std::thread::scope(|s| {
            let launcher = s.spawn(|| {
                if !gate.wait() {
                    return Err(HarnessError::RendezvousAborted);
                }
                launcher::launch(spec)
            });

            let sampling = self.start_sampling(cgroup_name, trace);
            if sampling.is_ok() {
                gate.wait();
            } else {
                gate.abort();
            }

            let exit = launcher.join().unwrap_or(Err(HarnessError::LauncherPanicked));
            (sampling, exit)
        })
    }

    fn start_sampling(&self, cgroup_name: &str, trace: bool) -> Result<(PerfStat, Option<PerfRecord>), HarnessError> {
        let cfg = self.config;
        let mut stat = PerfStat::start(&cfg.perf_command, &cfg.events, cgroup_name)?;
        let mut record = if trace {
            Some(PerfRecord::start(&cfg.perf_command, &cfg.trace_event, cgroup_name, &cfg.trace_path)?)
        } else {
            None
        };
        // RELEASE ORDER IS GUARANTEED, COUNTER ATTACHMENT IS NOT (SEE confirm_live)
        stat.confirm_live()?;
        if let Some(r) = record.as_mut() {
            r.confirm_live()?;
        }
        Ok((stat, record))
    }

    fn remove_stale_trace(&self) -> Result<(), HarnessError> {
        match fs::remove_file(&self.config.trace_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarnessError::Trace {
                path: self.config.trace_path.clone(),
                detail: format!("removing stale artifact: {}", e),
            }),
        }
    }

    fn trace_sizes(&self) -> Result<(u64, u64), HarnessError> {
        let path = &self.config.trace_path;
        let size = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => {
                return Err(HarnessError::Trace { path: path.clone(), detail: e.to_string() })
            }
        };
        let compressed = perf::compressed_size(&self.config.compress_command, path)?;
        Ok((size, compressed))
    }

    fn collect(&self, cgroups: &CgroupSet, sample: &mut Sample) -> Result<(), HarnessError> {
        let missing = |c: Controller| HarnessError::Accounting {
            path: PathBuf::from(c.hierarchy()),
            detail: "controller not attached".into(),
        };
        let cpuacct = cgroups.get(Controller::CpuAcct).ok_or_else(|| missing(Controller::CpuAcct))?;
        let acct = cgroup::read_cpu_accounting(cpuacct)?;
        sample.user_time = acct.user;
        sample.system_time = acct.system;
        sample.time_per_cpu = acct.per_cpu;

        if self.config.track_memory {
            let mem = cgroups.get(Controller::Memory).ok_or_else(|| missing(Controller::Memory))?;
            sample.max_memory = Some(cgroup::read_memory_peak(mem)?);
        }

        let (size, compressed) = self.trace_sizes()?;
        sample.log_size = size;
        sample.compressed_log_size = compressed;
        Ok(())
    }

    pub fn run_once(&mut self, run: &RunConfiguration<'_>, gate: &dyn Rendezvous) -> Result<Sample, RunError> {
        let name = cgroup::unique_name(&self.config.cgroup_prefix);
        self.run_scoped(run, gate, &name)
    }

    // SAME AS run_once WITH A CALLER-CHOSEN GROUP NAME (E.G. A DELEGATED,
    // PRE-CREATED GROUP). AN EXISTING GROUP OF THAT NAME IS REUSED.
    pub fn run_scoped(
        &mut self,
        run: &RunConfiguration<'_>,
        gate: &dyn Rendezvous,
        cgroup_name: &str,
    ) -> Result<Sample, RunError> {
        self.enter(Phase::Preparing);
        self.remove_stale_trace()?;

        let mut cgroups = CgroupSet::create(&self.config.cgroup_root, cgroup_name, &self.controllers())?;
        let result = self.measure(run, gate, &cgroups);
        // AFTER BOTH ACCOUNTING READS, ON EVERY PATH
        cgroups.release();

        if result.is_err() {
            self.enter(Phase::Failed);
        }
        result
    }

    fn measure(&mut self, run: &RunConfiguration<'_>, gate: &dyn Rendezvous, cgroups: &CgroupSet) -> Result<Sample, RunError> {
        let spec = self.launch_spec(run, cgroups)?;

        self.enter(Phase::SamplingRunning);
        let (sampling, exit) = self.sample_workload(gate, &spec, cgroups.name(), run.mode.trace_capture());
        // DROPPING THE perf GUARDS ON AN ERROR PATH INTERRUPTS AND REAPS THEM
        let (stat, record) = sampling?;
        let exit = exit?;

        self.enter(Phase::Collecting);
        let counters = stat.stop();
        let recorded = record.map(PerfRecord::stop).transpose();
        if !exit.success() {
            return Err(RunError::Workload { command: spec.display(), code: exit.code });
        }
        let counters = counters?;
        recorded?;

        let mut sample = Sample {
            wall_time: exit.duration,
            exit_code: exit.code,
            counters,
            ..Sample::default()
        };
        self.collect(cgroups, &mut sample)?;
        Ok(sample)
    }
}

impl Execute for Coordinator<'_> {
    fn execute(&mut self, run: &RunConfiguration<'_>) -> Result<Sample, RunError> {
        let gate = TwoPartyBarrier::new();
        self.run_once(run, &gate)
    }
}

// ---------------------------------------------------------------------------
// SWEEP
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FailureReport {
    pub cell: String,
    pub mode: LibraryMode,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub executed: usize,
    pub skipped_cells: usize,
    pub failures: Vec<FailureReport>,
    pub interrupted: bool,
}

pub struct Sweep<'a> {
    pub benchmarks: &'a [Benchmark],
    pub thread_counts: &'a [u32],
    pub modes: &'a [LibraryMode],
    pub events: &'a [String],
    pub shutdown: &'a AtomicBool,
}

impl Sweep<'_> {
    pub fn run(
        &self,
        store: &mut RunStore,
        executor: &mut dyn Execute,
        topology: &mut dyn Topology,
    ) -> Result<SweepReport, RunError> {
        let mut report = SweepReport::default();
        let mut topology = TopologyGuard::new(topology);
        self.run_inner(store, executor, topology.get(), &mut report)?;
        Ok(report)
    }

    fn run_inner(
        &self,
        store: &mut RunStore,
        executor: &mut dyn Execute,
        topology: &mut dyn Topology,
        report: &mut SweepReport,
    ) -> Result<(), RunError> {
        for &threads in self.thread_counts {
            if let Err(e) = topology.apply(threads) {
                // NO MEASUREMENT AT A TOPOLOGY WE COULD NOT ESTABLISH
                error!(threads, error = %e, "failed to apply cpu topology, skipping thread count");
                continue;
            }
            for bench in self.benchmarks {
                info!(benchmark = %bench.name, threads, variant = ?bench.variant, ">> run");
                for &mode in self.modes {
                    if self.shutdown.load(Ordering::Relaxed) {
                        report.interrupted = true;
                        return Ok(());
                    }
                    let run = RunConfiguration { benchmark: bench, threads, mode };
                    self.run_cell(store, executor, &run, report)?;
                }
            }
        }
        Ok(())
    }

    // REPEAT ONE (BENCHMARK, THREADS, VARIANT, MODE) CELL UP TO THE TARGET
    fn run_cell(
        &self,
        store: &mut RunStore,
        executor: &mut dyn Execute,
        run: &RunConfiguration<'_>,
        report: &mut SweepReport,
    ) -> Result<(), RunError> {
        let key = run.cell_key();
        let runs = store.remaining(&key, run.mode);
        if runs == 0 {
            info!(cell = %key, mode = %run.mode, "skip (already {} samples)", TARGET_REPETITIONS);
            report.skipped_cells += 1;
            return Ok(());
        }

        let meta = CellMeta {
            threads: run.threads,
            variant: run.benchmark.variant.clone(),
        };
        for i in 0..runs {
            if self.shutdown.load(Ordering::Relaxed) {
                report.interrupted = true;
                return Ok(());
            }
            info!(cell = %key, mode = %run.mode, repetition = i + 1, of = runs, "repetition");
            match executor.execute(run) {
                Ok(sample) => {
                    store.record(&key, &meta, run.mode, &run.args(), &sample, self.events);
                    store.persist()?;
                    report.executed += 1;
                    debug!(cell = %key, phase = Phase::Persisted.label(), "repetition stored");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(cell = %key, mode = %run.mode, kind = e.kind(), error = %e, "failed to run {}", run.benchmark.name);
                    report.failures.push(FailureReport {
                        cell: key.clone(),
                        mode: run.mode,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }
        Ok(())
    }
}

impl SweepReport {
    pub fn print(&self) {
        println!();
        println!("{}", "=".repeat(50));
        println!("SWEEP SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  REPETITIONS RUN:   {}", self.executed);
        println!("  CELLS COMPLETE:    {}", self.skipped_cells);
        println!("  FAILED CELLS:      {}", self.failures.len());
        for f in &self.failures {
            println!("    {:<28} {:<10} {:<12} {}", f.cell, f.mode, f.kind, f.message);
        }
        if self.interrupted {
            warn!("sweep interrupted before completion");
            println!("  INTERRUPTED:       YES");
        }
    }
}
