// INSPECTOR-BENCH PROCESS LAUNCHER
// SPAWNS THE WORKLOAD IN ITS BENCHMARK DIRECTORY WITH ENVIRONMENT OVERRIDES,
// OPTIONAL LD_PRELOAD, AND MEMBERSHIP IN EVERY REQUESTED CGROUP.
//
// CGROUP MEMBERSHIP IS JOINED BY THE CHILD ITSELF BETWEEN fork AND exec
// (WRITING "0" MEANS "THE CALLING PROCESS"), SO THE WORKLOAD'S FIRST
// INSTRUCTION ALREADY RUNS INSIDE THE ACCOUNTED GROUPS.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::time::{Duration, Instant};

use tracing::info;

use crate::error::HarnessError;

pub const PRELOAD_VAR: &str = "LD_PRELOAD";

#[derive(Debug)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub preload: Option<PathBuf>,
    // OPEN cgroup.procs HANDLES, ONE PER HIERARCHY
    pub cgroups: Vec<File>,
}

impl LaunchSpec {
    pub fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExitRecord {
    pub code: i32,
    pub duration: Duration,
}

impl ExitRecord {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

// DEATH BY SIGNAL IS REPORTED SHELL-STYLE: 128 + SIGNO
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => -1,
    }
}

fn join_cgroups(fds: &[RawFd]) -> io::Result<()> {
    const SELF: &[u8] = b"0\n";
    for &fd in fds {
        let n = unsafe { libc::write(fd, SELF.as_ptr() as *const libc::c_void, SELF.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn command(spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).current_dir(&spec.cwd).envs(&spec.env);
    if let Some(lib) = &spec.preload {
        cmd.env(PRELOAD_VAR, lib);
    }
    cmd.process_group(0);

    let fds: Vec<RawFd> = spec.cgroups.iter().map(AsRawFd::as_raw_fd).collect();
    if !fds.is_empty() {
        // ONLY write(2) RUNS HERE: ASYNC-SIGNAL-SAFE, NO ALLOCATION
        unsafe {
            cmd.pre_exec(move || join_cgroups(&fds));
        }
    }
    cmd
}

// BLOCKS UNTIL THE WORKLOAD EXITS. THE CLOCK COVERS SPAWN TO REAP.
pub fn launch(spec: &LaunchSpec) -> Result<ExitRecord, HarnessError> {
    let launch_err = |source| HarnessError::Launch { program: spec.program.clone(), source };

    info!(cmd = %spec.display(), preload = spec.preload.is_some(), "launching workload");
    let start = Instant::now();
    let mut child = command(spec).spawn().map_err(launch_err)?;
    let status = child.wait().map_err(launch_err)?;
    let duration = start.elapsed();

    Ok(ExitRecord { code: exit_code(status), duration })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, cwd: PathBuf) -> LaunchSpec {
        LaunchSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            cwd,
            env: BTreeMap::new(),
            preload: None,
            cgroups: Vec::new(),
        }
    }

    #[test]
    fn captures_exit_code_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let rec = launch(&sh("sleep 0.1; exit 2", dir.path().to_path_buf())).unwrap();
        assert_eq!(rec.code, 2);
        assert!(!rec.success());
        assert!(rec.duration >= Duration::from_millis(100));
    }

    #[test]
    fn runs_in_working_dir_with_env_and_preload() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = sh(
            "printf '%s|%s' \"$IM_CONCURRENCY\" \"$LD_PRELOAD\" > seen.txt",
            dir.path().to_path_buf(),
        );
        spec.env.insert("IM_CONCURRENCY".into(), "8".into());
        // NONEXISTENT PRELOAD: THE LOADER WARNS AND CONTINUES
        spec.preload = Some(PathBuf::from("/nonexistent/libtthread.so"));

        let rec = launch(&spec).unwrap();
        assert!(rec.success());
        let seen = std::fs::read_to_string(dir.path().join("seen.txt")).unwrap();
        assert_eq!(seen, "8|/nonexistent/libtthread.so");
    }

    #[test]
    fn child_writes_self_into_membership_files() {
        let dir = tempfile::tempdir().unwrap();
        let procs = dir.path().join("cgroup.procs");
        std::fs::write(&procs, "").unwrap();
        let mut spec = sh("exit 0", dir.path().to_path_buf());
        spec.cgroups.push(std::fs::OpenOptions::new().write(true).open(&procs).unwrap());

        assert!(launch(&spec).unwrap().success());
        assert_eq!(std::fs::read_to_string(&procs).unwrap(), "0\n");
    }

    #[test]
    fn missing_program_is_harness_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = sh("", dir.path().to_path_buf());
        spec.program = dir.path().join("does-not-exist");
        assert!(matches!(launch(&spec), Err(HarnessError::Launch { .. })));
    }

    #[test]
    fn signal_death_maps_to_shell_code() {
        let dir = tempfile::tempdir().unwrap();
        let rec = launch(&sh("kill -TERM $$", dir.path().to_path_buf())).unwrap();
        assert_eq!(rec.code, 128 + libc::SIGTERM);
    }
}
