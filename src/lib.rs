// INSPECTOR-BENCH -- MEASUREMENT HARNESS FOR THREADING-LIBRARY INSTRUMENTATION
// CGROUP-SCOPED perf SAMPLING, BARRIER-SYNCHRONIZED LAUNCH, RESUMABLE RUN LOGS

pub mod catalog;
pub mod cgroup;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod launcher;
pub mod mode;
pub mod perf;
pub mod rendezvous;
pub mod stats;
pub mod store;
pub mod topology;
