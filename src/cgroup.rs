// INSPECTOR-BENCH CGROUP SCOPE
// CREATES ONE NAMED GROUP PER CONTROLLER HIERARCHY (CGROUP V1 LAYOUT:
// <root>/<controller>/<name>), HANDS OUT MEMBERSHIP FILES FOR THE LAUNCHER,
// AND READS ACCOUNTING PSEUDO-FILES.
//
// A GROUP IS REMOVED WHEN ITS HANDLE IS RELEASED OR DROPPED, WHICHEVER COMES
// FIRST. RELEASE NEVER FAILS THE CALLER: A LEFTOVER DIRECTORY IS LOGGED.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::HarnessError;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

// UNIQUE ACROSS CONCURRENT COORDINATORS (PID) AND REPETITIONS (SEQUENCE)
pub fn unique_name(prefix: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, std::process::id(), seq)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Controller {
    CpuAcct,
    PerfEvent,
    Memory,
}

impl Controller {
    pub fn hierarchy(self) -> &'static str {
        match self {
            Self::CpuAcct => "cpuacct",
            Self::PerfEvent => "perf_event",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug)]
pub struct Cgroup {
    name: String,
    mountpoint: PathBuf,
    controller: Controller,
    released: bool,
}

impl Cgroup {
    pub fn create(root: &Path, name: &str, controller: Controller) -> Result<Self, HarnessError> {
        let mountpoint = root.join(controller.hierarchy()).join(name);
        match fs::create_dir(&mountpoint) {
            Ok(()) => {}
            // STALE GROUP FROM A KILLED RUN WITH THE SAME NAME: REUSE IT
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(cgroup = %mountpoint.display(), "reusing existing cgroup");
            }
            Err(source) => return Err(HarnessError::Cgroup { path: mountpoint, source }),
        }
        debug!(cgroup = %mountpoint.display(), "created cgroup");
        Ok(Self {
            name: name.to_string(),
            mountpoint,
            controller,
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn controller(&self) -> Controller {
        self.controller
    }

    // OPENED IN THE PARENT SO THE CHILD ONLY HAS TO write(2) BEFORE EXEC
    pub fn membership_file(&self) -> Result<File, HarnessError> {
        let path = self.mountpoint.join("cgroup.procs");
        OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| HarnessError::Cgroup { path, source })
    }

    pub fn read(&self, file: &str) -> Result<String, HarnessError> {
        let path = self.mountpoint.join(file);
        fs::read_to_string(&path).map_err(|e| HarnessError::Accounting {
            path,
            detail: e.to_string(),
        })
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_dir(&self.mountpoint) {
            Ok(()) => debug!(cgroup = %self.mountpoint.display(), "released cgroup"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(cgroup = %self.mountpoint.display(), error = %e, "failed to remove cgroup"),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for Cgroup {
    fn drop(&mut self) {
        self.release();
    }
}

// ONE NAME, SEVERAL UNRELATED HIERARCHIES. THE LAUNCHED PROCESS JOINS ALL.
#[derive(Debug)]
pub struct CgroupSet {
    name: String,
    groups: Vec<Cgroup>,
}

impl CgroupSet {
    pub fn create(root: &Path, name: &str, controllers: &[Controller]) -> Result<Self, HarnessError> {
        let mut groups = Vec::with_capacity(controllers.len());
        for &c in controllers {
            // ON FAILURE, GROUPS ALREADY CREATED ARE DROPPED (AND REMOVED) HERE
            groups.push(Cgroup::create(root, name, c)?);
        }
        Ok(Self { name: name.to_string(), groups })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, controller: Controller) -> Option<&Cgroup> {
        self.groups.iter().find(|g| g.controller == controller)
    }

    pub fn membership_files(&self) -> Result<Vec<File>, HarnessError> {
        self.groups.iter().map(Cgroup::membership_file).collect()
    }

    pub fn release(&mut self) {
        for g in &mut self.groups {
            g.release();
        }
    }
}

// --- ACCOUNTING ---

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CpuAccounting {
    pub user: u64,
    pub system: u64,
    pub per_cpu: Vec<u64>,
}

// "key value" PER LINE (cpuacct.stat, memory.stat)
pub fn parse_stat_file(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .filter_map(|line| line.split_once(' '))
        .map(|(k, v)| (k.to_string(), v.trim().to_string()))
        .collect()
}

fn parse_u64(path: PathBuf, raw: &str) -> Result<u64, HarnessError> {
    raw.trim().parse::<u64>().map_err(|e| HarnessError::Accounting {
        path,
        detail: format!("{:?}: {}", raw.trim(), e),
    })
}

pub fn read_cpu_accounting(cg: &Cgroup) -> Result<CpuAccounting, HarnessError> {
    let stat_path = cg.mountpoint().join("cpuacct.stat");
    let stats = parse_stat_file(&cg.read("cpuacct.stat")?);
    let field = |key: &str| -> Result<u64, HarnessError> {
        let raw = stats.get(key).ok_or_else(|| HarnessError::Accounting {
            path: stat_path.clone(),
            detail: format!("missing `{}`", key),
        })?;
        parse_u64(stat_path.clone(), raw)
    };
    let user = field("user")?;
    let system = field("system")?;

    let percpu_path = cg.mountpoint().join("cpuacct.usage_percpu");
    let per_cpu = cg
        .read("cpuacct.usage_percpu")?
        .split_whitespace()
        .map(|v| parse_u64(percpu_path.clone(), v))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CpuAccounting { user, system, per_cpu })
}

pub fn read_memory_peak(cg: &Cgroup) -> Result<u64, HarnessError> {
    let raw = cg.read("memory.max_usage_in_bytes")?;
    parse_u64(cg.mountpoint().join("memory.max_usage_in_bytes"), &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy_root(controllers: &[Controller]) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for c in controllers {
            fs::create_dir(root.path().join(c.hierarchy())).unwrap();
        }
        root
    }

    #[test]
    fn unique_names_differ() {
        let a = unique_name("inspector");
        let b = unique_name("inspector");
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("inspector-{}-", std::process::id())));
    }

    #[test]
    fn create_and_release_is_idempotent() {
        let root = hierarchy_root(&[Controller::CpuAcct]);
        let mut cg = Cgroup::create(root.path(), "bench-1", Controller::CpuAcct).unwrap();
        let mp = root.path().join("cpuacct/bench-1");
        assert_eq!(cg.mountpoint(), mp.as_path());
        assert!(mp.is_dir());

        cg.release();
        assert!(!mp.exists());
        assert!(cg.is_released());
        cg.release(); // SECOND RELEASE IS A NO-OP
    }

    #[test]
    fn drop_releases() {
        let root = hierarchy_root(&[Controller::PerfEvent]);
        let mp = root.path().join("perf_event/bench-2");
        {
            let _cg = Cgroup::create(root.path(), "bench-2", Controller::PerfEvent).unwrap();
            assert!(mp.is_dir());
        }
        assert!(!mp.exists());
    }

    #[test]
    fn partial_set_creation_cleans_up() {
        // MEMORY HIERARCHY MISSING: SECOND CREATE FAILS, FIRST IS REMOVED
        let root = hierarchy_root(&[Controller::CpuAcct]);
        let err = CgroupSet::create(root.path(), "bench-3", &[Controller::CpuAcct, Controller::Memory]);
        assert!(matches!(err, Err(HarnessError::Cgroup { .. })));
        assert!(!root.path().join("cpuacct/bench-3").exists());
    }

    #[test]
    fn set_composes_hierarchies() {
        let root = hierarchy_root(&[Controller::CpuAcct, Controller::PerfEvent]);
        let mut set =
            CgroupSet::create(root.path(), "bench-4", &[Controller::CpuAcct, Controller::PerfEvent]).unwrap();
        assert_eq!(set.get(Controller::PerfEvent).unwrap().name(), "bench-4");
        assert!(set.get(Controller::Memory).is_none());
        set.release();
        assert!(!root.path().join("cpuacct/bench-4").exists());
        assert!(!root.path().join("perf_event/bench-4").exists());
    }

    #[test]
    fn membership_file_requires_procs() {
        let root = hierarchy_root(&[Controller::CpuAcct]);
        let cg = Cgroup::create(root.path(), "bench-5", Controller::CpuAcct).unwrap();
        assert!(cg.membership_file().is_err());
    }

    #[test]
    fn reads_cpu_accounting() {
        let root = hierarchy_root(&[Controller::CpuAcct]);
        let cg = Cgroup::create(root.path(), "bench-6", Controller::CpuAcct).unwrap();
        fs::write(cg.mountpoint().join("cpuacct.stat"), "user 412\nsystem 37\n").unwrap();
        fs::write(cg.mountpoint().join("cpuacct.usage_percpu"), "100 200 0 300 \n").unwrap();

        let acct = read_cpu_accounting(&cg).unwrap();
        assert_eq!(acct.user, 412);
        assert_eq!(acct.system, 37);
        assert_eq!(acct.per_cpu, vec![100, 200, 0, 300]);
        // FILES LEFT BEHIND: DIRECTORY CANNOT BE REMOVED, RELEASE ONLY WARNS
        drop(cg);
    }

    #[test]
    fn missing_accounting_file_is_harness_error() {
        let root = hierarchy_root(&[Controller::CpuAcct]);
        let cg = Cgroup::create(root.path(), "bench-7", Controller::CpuAcct).unwrap();
        assert!(matches!(read_cpu_accounting(&cg), Err(HarnessError::Accounting { .. })));
    }

    #[test]
    fn stat_file_parsing() {
        let m = parse_stat_file("user 5\nsystem 6\ngarbage\n");
        assert_eq!(m.get("user").map(String::as_str), Some("5"));
        assert_eq!(m.len(), 2);
    }
}
