use std::io::Read;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use regex::Regex;

use inspector_bench::cgroup::Controller;

use crate::CheckArgs;

const KERNEL_OPTIONS: [&str; 3] = ["CONFIG_PERF_EVENTS", "CONFIG_CGROUP_PERF", "CONFIG_CGROUP_CPUACCT"];

fn check_tool(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// BUILT IN (=y) OR AS A MODULE (=m)
fn option_enabled(config: &str, option: &str) -> bool {
    Regex::new(&format!(r"(?m)^{}=(y|m)$", regex::escape(option)))
        .map(|re| re.is_match(config))
        .unwrap_or(false)
}

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz         NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz         UNREADABLE (SKIPPED)");
        return true;
    }
    let mut ok = true;
    for option in KERNEL_OPTIONS {
        if option_enabled(&config, option) {
            println!("  {:<24}OK", option);
        } else {
            println!("  {:<24}NOT SET", option);
            ok = false;
        }
    }
    ok
}

fn check_hierarchies(root: &Path) -> bool {
    let mut ok = true;
    for c in [Controller::CpuAcct, Controller::PerfEvent, Controller::Memory] {
        let mount = root.join(c.hierarchy());
        if mount.join("cgroup.procs").exists() {
            println!("  {:<24}OK ({})", c.hierarchy(), mount.display());
        } else if c == Controller::Memory {
            // ONLY NEEDED WITH --track-memory
            println!("  {:<24}MISSING (OPTIONAL)", c.hierarchy());
        } else {
            println!("  {:<24}MISSING ({})", c.hierarchy(), mount.display());
            ok = false;
        }
    }
    ok
}

pub fn run_check(args: &CheckArgs) -> Result<()> {
    println!("INSPECTOR-BENCH DEPENDENCY CHECK");
    println!();

    let mut ok = true;
    let perf = args.perf.display().to_string();
    for tool in [perf.as_str(), args.compressor.as_str()] {
        if check_tool(tool) {
            println!("  {:<24}OK", tool);
        } else {
            println!("  {:<24}MISSING", tool);
            ok = false;
        }
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    println!("CGROUP V1 HIERARCHIES:");
    if !check_hierarchies(&args.cgroup_root) {
        ok = false;
    }
    println!();

    let paranoid = std::fs::read_to_string("/proc/sys/kernel/perf_event_paranoid").unwrap_or_default();
    let paranoid = paranoid.trim();
    if !paranoid.is_empty() {
        println!("  perf_event_paranoid     {}", paranoid);
        println!();
    }

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if !check_tool(&perf) {
            println!("  Install perf: pacman -S perf");
        }
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_options_match_whole_lines() {
        let config = "CONFIG_PERF_EVENTS=y\n# CONFIG_CGROUP_PERF is not set\nCONFIG_CGROUP_CPUACCT=m\n";
        assert!(option_enabled(config, "CONFIG_PERF_EVENTS"));
        assert!(!option_enabled(config, "CONFIG_CGROUP_PERF"));
        assert!(option_enabled(config, "CONFIG_CGROUP_CPUACCT"));
        assert!(!option_enabled("CONFIG_PERF_EVENTS_INTEL=y\n", "CONFIG_PERF_EVENTS"));
    }

    #[test]
    fn missing_hierarchies_fail() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!check_hierarchies(dir.path()));
        for c in [Controller::CpuAcct, Controller::PerfEvent] {
            let d = dir.path().join(c.hierarchy());
            std::fs::create_dir_all(&d).unwrap();
            std::fs::write(d.join("cgroup.procs"), "").unwrap();
        }
        assert!(check_hierarchies(dir.path()));
    }
}
