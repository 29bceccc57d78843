// INSPECTOR-BENCH PERF SAMPLER AND TRACE RECORDER
//
// BOTH ARE SYSTEM-WIDE perf SUBPROCESSES SCOPED TO THE PERF_EVENT CGROUP.
// THEY START BEFORE THE WORKLOAD IS RELEASED AND STOP AFTER IT EXITS, VIA
// SIGINT: perf ONLY FLUSHES ITS AGGREGATES (stat) OR FINALIZES THE FILE
// HEADER (record) ON INTERRUPT. SIGTERM/SIGKILL WOULD LOSE THE RESULTS.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::HarnessError;

// GRACE PERIOD BEFORE A DROPPED, STILL-RUNNING perf IS KILLED
const DROP_GRACE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// PROCESS GUARD
// ---------------------------------------------------------------------------

pub struct PerfProcess {
    role: &'static str,
    child: Option<Child>,
}

impl PerfProcess {
    fn spawn(role: &'static str, mut cmd: Command) -> Result<Self, HarnessError> {
        let tool = format!("{:?}", cmd.get_program());
        // OWN PROCESS GROUP: A TERMINAL CTRL+C MUST NOT STOP perf EARLY
        let child = cmd
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HarnessError::SamplerSpawn { tool, source })?;
        debug!(role, pid = child.id(), "spawned perf");
        Ok(Self { role, child: Some(child) })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    // LIVE = SPAWNED AND NOT YET EXITED. THIS ONLY SHOWS perf WAS EXEC'D: ITS
    // COUNTERS MAY NOT BE ATTACHED YET, SO EVENTS FROM THE FIRST MILLISECONDS
    // OF THE WORKLOAD CAN GO UNCOUNTED
    pub fn confirm_live(&mut self) -> Result<(), HarnessError> {
        let role = self.role;
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => {
                return Err(HarnessError::SamplerDied { role, status: "already reaped".into() })
            }
        };
        match child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(HarnessError::SamplerDied { role, status: status.to_string() }),
            Err(source) => Err(HarnessError::SamplerWait { role, source }),
        }
    }

    // SENDING SIGINT TO AN EXITED perf IS LOGGED, NOT FATAL
    pub fn interrupt(&mut self) {
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return,
        };
        if let Ok(Some(status)) = child.try_wait() {
            warn!(role = self.role, %status, "perf is already stopped");
            return;
        }
        let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            warn!(role = self.role, error = %io::Error::last_os_error(), "perf is already stopped");
        }
    }

    // INTERRUPT, THEN COLLECT EVERYTHING perf WROTE
    pub fn finish(mut self) -> Result<Output, HarnessError> {
        self.interrupt();
        let role = self.role;
        let child = match self.child.take() {
            Some(c) => c,
            None => return Err(HarnessError::SamplerDied { role, status: "already reaped".into() }),
        };
        child
            .wait_with_output()
            .map_err(|source| HarnessError::SamplerWait { role, source })
    }

    fn stop(&mut self) {
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return,
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT); }
        let deadline = Instant::now() + DROP_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                Err(_) => break,
            }
        }
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for PerfProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// COUNTER SAMPLER (perf stat)
// ---------------------------------------------------------------------------

pub struct PerfStat {
    process: PerfProcess,
}

impl PerfStat {
    pub fn command(perf: &Path, events: &[String], cgroup: &str) -> Command {
        let mut cmd = Command::new(perf);
        cmd.args(["stat", "--field-separator", "\t", "--all-cpus", "--event"])
            .arg(events.join(","))
            .args(["--cgroup", cgroup]);
        cmd
    }

    pub fn start(perf: &Path, events: &[String], cgroup: &str) -> Result<Self, HarnessError> {
        let process = PerfProcess::spawn("sampler", Self::command(perf, events, cgroup))?;
        Ok(Self { process })
    }

    pub fn confirm_live(&mut self) -> Result<(), HarnessError> {
        self.process.confirm_live()
    }

    pub fn stop(self) -> Result<BTreeMap<String, f64>, HarnessError> {
        let output = self.process.finish()?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let counters = parse_counters(&stderr);
        if counters.is_empty() {
            return Err(HarnessError::NoCounters { stderr: stderr.into_owned() });
        }
        debug!(counters = counters.len(), "parsed perf stat output");
        Ok(counters)
    }
}

// ACCEPTS LOCALE DECIMALS ("1234,56"). "<not counted>" ETC. YIELD NONE.
pub fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}

// ROWS: VALUE \t UNIT \t EVENT [\t CGROUP \t RUNTIME \t PCT ...]
pub fn parse_counters(stderr: &str) -> BTreeMap<String, f64> {
    let mut counters = BTreeMap::new();
    for line in stderr.lines() {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 3 {
            continue;
        }
        let name = columns[2].trim();
        if name.is_empty() {
            continue;
        }
        match parse_value(columns[0]) {
            Some(v) => {
                counters.insert(name.to_string(), v);
            }
            None => debug!(event = name, value = columns[0], "uncounted event"),
        }
    }
    counters
}

// ---------------------------------------------------------------------------
// TRACE RECORDER (perf record)
// ---------------------------------------------------------------------------

pub struct PerfRecord {
    process: PerfProcess,
    output: PathBuf,
}

impl PerfRecord {
    pub fn command(perf: &Path, event: &str, cgroup: &str, output: &Path) -> Command {
        let mut cmd = Command::new(perf);
        cmd.args(["record", "--event", event, "--all-cpus", "--cgroup", cgroup, "--output"])
            .arg(output);
        cmd
    }

    pub fn start(perf: &Path, event: &str, cgroup: &str, output: &Path) -> Result<Self, HarnessError> {
        let process = PerfProcess::spawn("trace recorder", Self::command(perf, event, cgroup, output))?;
        Ok(Self { process, output: output.to_path_buf() })
    }

    pub fn confirm_live(&mut self) -> Result<(), HarnessError> {
        self.process.confirm_live()
    }

    pub fn stop(self) -> Result<PathBuf, HarnessError> {
        let output = self.process.finish()?;
        if !output.status.success() {
            // perf record EXITS NON-ZERO ON SIGINT IN SOME VERSIONS; THE FILE DECIDES
            debug!(status = %output.status, "trace recorder exit status");
        }
        Ok(self.output)
    }
}

// BYTES THE EXTERNAL FILTER WRITES FOR THE ARTIFACT
pub fn compressed_size(filter: &[String], path: &Path) -> Result<u64, HarnessError> {
    let trace_err = |detail: String| HarnessError::Trace { path: path.to_path_buf(), detail };
    let (program, args) = filter
        .split_first()
        .ok_or_else(|| trace_err("empty compression filter".into()))?;

    let mut child = Command::new(program)
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| trace_err(format!("spawning {}: {}", program, e)))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| trace_err("filter stdout unavailable".into()))?;
    let bytes = io::copy(&mut stdout, &mut io::sink())
        .map_err(|e| trace_err(format!("reading {} output: {}", program, e)))?;
    let status = child
        .wait()
        .map_err(|e| trace_err(format!("waiting for {}: {}", program, e)))?;
    if !status.success() {
        return Err(trace_err(format!("{} exited with {}", program, status)));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tab_separated_rows() {
        let stderr = "\
1234567\t\tcpu-cycles\tinspector-1-0\t2000000\t100.00\t\t\n\
3112,45\tmsec\ttask-clock\tinspector-1-0\t3112450000\t100.00\t\t\n\
<not supported>\t\tbus-cycles\tinspector-1-0\t0\t100.00\t\t\n\
\n\
 Performance counter stats for 'system wide':\n";
        let c = parse_counters(stderr);
        assert_eq!(c.len(), 2);
        assert_eq!(c["cpu-cycles"], 1234567.0);
        assert!((c["task-clock"] - 3112.45).abs() < 1e-9);
        assert!(!c.contains_key("bus-cycles"));
    }

    #[test]
    fn empty_output_yields_no_counters() {
        assert!(parse_counters("").is_empty());
        assert!(parse_counters("perf: permission denied\n").is_empty());
    }

    #[test]
    fn parse_value_variants() {
        assert_eq!(parse_value("42"), Some(42.0));
        assert_eq!(parse_value(" 1,5 "), Some(1.5));
        assert_eq!(parse_value("<not counted>"), None);
        assert_eq!(parse_value("inf"), None);
    }

    #[test]
    fn stat_command_line() {
        let events = vec!["cpu-cycles".to_string(), "instructions".to_string()];
        let cmd = PerfStat::command(Path::new("perf"), &events, "inspector-7-0");
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "stat", "--field-separator", "\t", "--all-cpus", "--event",
                "cpu-cycles,instructions", "--cgroup", "inspector-7-0",
            ]
        );
    }

    #[test]
    fn record_command_line() {
        let cmd = PerfRecord::command(Path::new("perf"), "intel_pt//", "cg", Path::new("/tmp/perf.data"));
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["record", "--event", "intel_pt//", "--all-cpus", "--cgroup", "cg", "--output", "/tmp/perf.data"]
        );
    }

    #[test]
    fn compressed_size_counts_filter_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.data");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();
        let size = compressed_size(&["cat".to_string()], &path).unwrap();
        assert_eq!(size, 4096);
    }

    #[test]
    fn compressed_size_reports_failing_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.data");
        let err = compressed_size(&["cat".to_string()], &path).unwrap_err();
        assert!(matches!(err, HarnessError::Trace { .. }));
    }

    #[test]
    fn sampler_without_tool_is_harness_error() {
        let events = vec!["cycles".to_string()];
        let err = PerfStat::start(Path::new("/nonexistent/perf"), &events, "cg");
        assert!(matches!(err, Err(HarnessError::SamplerSpawn { .. })));
    }
}
