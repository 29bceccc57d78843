// INSPECTOR-BENCH CPU TOPOLOGY CONTROL
// TAKES CPUs OFFLINE VIA SYSFS HOTPLUG SO A THREAD COUNT OF N RUNS ON N ONLINE
// CPUs, SPREAD EVENLY ACROSS THE PACKAGE. CPU 0 CANNOT BE OFFLINED.
//
// THE SWEEP CALLS apply() ONCE PER THREAD COUNT AND restore() WHEN IT ENDS.
// TopologyGuard RESTORES ON DROP FOR CALLERS THAT MAY UNWIND.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

pub trait Topology {
    fn apply(&mut self, threads: u32) -> Result<(), String>;

    fn restore(&mut self);
}

// "0-3,8,10-11" -> 7
pub fn parse_cpu_range(raw: &str) -> u32 {
    let mut count = 0u32;
    for range in raw.trim().split(',') {
        let parts: Vec<&str> = range.split('-').collect();
        match parts.len() {
            1 => {
                if parts[0].parse::<u32>().is_ok() {
                    count += 1;
                }
            }
            2 => {
                if let (Ok(lo), Ok(hi)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
                    if hi >= lo {
                        count += hi - lo + 1;
                    }
                }
            }
            _ => {}
        }
    }
    count
}

// CPU i STAYS ONLINE IFF i IS A MULTIPLE OF possible / threads
pub fn online_set(possible: u32, threads: u32) -> Vec<bool> {
    let stride = (possible / threads.max(1)).max(1);
    (0..possible).map(|cpu| cpu == 0 || cpu % stride == 0).collect()
}

pub struct SysfsTopology {
    root: PathBuf,
    possible: u32,
}

impl SysfsTopology {
    pub fn new(root: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(root.join("possible"))
            .map_err(|e| format!("READING {}/possible: {}", root.display(), e))?;
        let possible = parse_cpu_range(&raw);
        if possible == 0 {
            return Err(format!("NO CPUs LISTED IN {}/possible", root.display()));
        }
        Ok(Self { root: root.to_path_buf(), possible })
    }

    pub fn possible(&self) -> u32 {
        self.possible
    }

    fn set_cpu_online(&self, cpu: u32, online: bool) -> Result<(), String> {
        if cpu == 0 {
            return Ok(());
        }
        let path = self.root.join(format!("cpu{}", cpu)).join("online");
        fs::write(&path, if online { "1\n" } else { "0\n" }).map_err(|e| {
            format!("FAILED TO SET CPU {} {}: {}", cpu, if online { "ONLINE" } else { "OFFLINE" }, e)
        })
    }
}

impl Topology for SysfsTopology {
    fn apply(&mut self, threads: u32) -> Result<(), String> {
        if threads == 0 || threads > self.possible {
            return Err(format!("CANNOT RUN {} THREADS ON {} CPUs", threads, self.possible));
        }
        let set = online_set(self.possible, threads);
        // BRING CPUs ONLINE FIRST SO THE ONLINE COUNT NEVER DIPS BELOW TARGET
        for (cpu, &on) in set.iter().enumerate().filter(|(_, on)| **on) {
            self.set_cpu_online(cpu as u32, on)?;
        }
        for (cpu, &on) in set.iter().enumerate().filter(|(_, on)| !**on) {
            self.set_cpu_online(cpu as u32, on)?;
        }
        info!(threads, online = set.iter().filter(|o| **o).count(), "applied cpu topology");
        Ok(())
    }

    fn restore(&mut self) {
        for cpu in 1..self.possible {
            if let Err(e) = self.set_cpu_online(cpu, true) {
                debug!(error = %e, "restore");
            }
        }
        info!(cpus = self.possible, "restored all cpus");
    }
}

// LEAVES THE MACHINE AS IT IS
#[derive(Default)]
pub struct Unmanaged;

impl Topology for Unmanaged {
    fn apply(&mut self, _threads: u32) -> Result<(), String> {
        Ok(())
    }

    fn restore(&mut self) {}
}

pub struct TopologyGuard<'a> {
    topology: &'a mut dyn Topology,
}

impl<'a> TopologyGuard<'a> {
    pub fn new(topology: &'a mut dyn Topology) -> Self {
        Self { topology }
    }

    pub fn get(&mut self) -> &mut dyn Topology {
        &mut *self.topology
    }
}

impl Drop for TopologyGuard<'_> {
    fn drop(&mut self) {
        self.topology.restore();
    }
}
