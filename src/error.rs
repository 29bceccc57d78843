// INSPECTOR-BENCH ERROR TAXONOMY
//
// HARNESS AND WORKLOAD FAULTS ARE CAUGHT PER REPETITION: THE CELL'S COUNT
// DOES NOT ADVANCE AND THE SWEEP MOVES ON. PERSISTENCE FAULTS HALT THE SWEEP.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("sampling tool `{tool}` could not be started: {source}")]
    SamplerSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} exited before the workload was released ({status})")]
    SamplerDied { role: &'static str, status: String },

    #[error("no counters recovered from sampling tool output: {stderr:?}")]
    NoCounters { stderr: String },

    #[error("waiting for {role}: {source}")]
    SamplerWait {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("cgroup {}: {source}", path.display())]
    Cgroup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("accounting file {}: {detail}", path.display())]
    Accounting { path: PathBuf, detail: String },

    #[error("launching {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trace artifact {}: {detail}", path.display())]
    Trace { path: PathBuf, detail: String },

    #[error("rendezvous aborted before the workload was released")]
    RendezvousAborted,

    #[error("launcher thread panicked")]
    LauncherPanicked,
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("harness fault: {0}")]
    Harness(#[from] HarnessError),

    #[error("workload `{command}` exited with {code}")]
    Workload { command: String, code: i32 },

    #[error("persisting run log {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    // ONLY PERSISTENCE FAULTS STOP THE SWEEP
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Harness(_) => "HARNESS",
            Self::Workload { .. } => "WORKLOAD",
            Self::Persistence { .. } => "PERSISTENCE",
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("no samples for {metric} in {cell}")]
    Empty { cell: String, metric: String },

    #[error("baseline {metric} for {cell} is zero")]
    ZeroBaseline { cell: String, metric: String },
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("reading catalog {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing catalog {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("benchmark set {log} has no thread counts")]
    NoThreadCounts { log: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_persistence_is_fatal() {
        let workload = RunError::Workload { command: "./wc".into(), code: 2 };
        assert!(!workload.is_fatal());
        assert_eq!(workload.kind(), "WORKLOAD");

        let harness = RunError::from(HarnessError::RendezvousAborted);
        assert!(!harness.is_fatal());
        assert_eq!(harness.kind(), "HARNESS");

        let persist = RunError::Persistence {
            path: PathBuf::from("/nonexistent/log.json"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(persist.is_fatal());
    }

    #[test]
    fn workload_message_names_command_and_code() {
        let e = RunError::Workload { command: "./canneal 15".into(), code: 2 };
        assert_eq!(e.to_string(), "workload `./canneal 15` exited with 2");
    }
}
