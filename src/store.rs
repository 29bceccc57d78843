// INSPECTOR-BENCH AGGREGATION STORE
// THE RUN LOG IS THE SOLE SOURCE OF TRUTH. IT IS REWRITTEN IN FULL AFTER EVERY
// SUCCESSFUL REPETITION (TEMP FILE + RENAME), SO THE FILE ON DISK IS ALWAYS
// COMPLETE JSON AND A CRASH LOSES AT MOST THE REPETITION IN FLIGHT.
//
// LAYOUT:
//   { "<bench>-<threads>[-<variant>]": {
//       "threads": 16, "variant": null, "args": [...],
//       "libs": { "pthread": { "times": [...], "cpu-cycles": [...], ... } } } }

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::coordinator::Sample;
use crate::error::RunError;
use crate::mode::LibraryMode;

pub const TARGET_REPETITIONS: usize = 6;

// FIXED METRICS RECORDED FOR EVERY SAMPLE (PERF EVENTS ARE ADDED PER CONFIG)
pub const TIMES: &str = "times";
pub const LOG_SIZES: &str = "log_sizes";
pub const COMPRESSED_LOG_SIZES: &str = "compressed_logsizes";
pub const SYSTEM_TIME: &str = "system_time";
pub const USER_TIME: &str = "user_time";
pub const TIME_PER_CPU: &str = "time_per_cpu";
pub const MAX_MEMORY: &str = "max_memory";

pub type MetricMap = BTreeMap<String, Vec<Value>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub threads: u32,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "metric_lists")]
    pub libs: BTreeMap<String, MetricMap>,
}

// OLDER LOGS CARRY NON-LIST ENTRIES ("args": null) NEXT TO THE METRICS
fn metric_lists<'de, D: serde::Deserializer<'de>>(d: D) -> Result<BTreeMap<String, MetricMap>, D::Error> {
    let raw = BTreeMap::<String, BTreeMap<String, Value>>::deserialize(d)?;
    Ok(raw
        .into_iter()
        .map(|(mode, entries)| {
            let metrics = entries
                .into_iter()
                .filter_map(|(name, v)| match v {
                    Value::Array(items) => Some((name, items)),
                    _ => None,
                })
                .collect();
            (mode, metrics)
        })
        .collect())
}

impl CellRecord {
    pub fn samples(&self, mode: LibraryMode) -> usize {
        self.libs
            .get(mode.name())
            .and_then(|m| m.get(TIMES))
            .map_or(0, Vec::len)
    }

    // EVERY METRIC OF ONE MODE HAS THE SAME NUMBER OF SAMPLES
    pub fn is_consistent(&self) -> bool {
        self.libs.values().all(|metrics| {
            let mut lens = metrics.values().map(Vec::len);
            match lens.next() {
                Some(first) => lens.all(|l| l == first),
                None => true,
            }
        })
    }
}

pub type RunLog = BTreeMap<String, CellRecord>;

#[derive(Clone, Debug)]
pub struct CellMeta {
    pub threads: u32,
    pub variant: Option<String>,
}

pub fn remaining(existing: usize) -> usize {
    TARGET_REPETITIONS.saturating_sub(existing)
}

fn number(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

// ONE FULL SAMPLE SET, IN THE ORDER IT IS APPENDED
pub fn sample_values(sample: &Sample, events: &[String]) -> Vec<(String, Value)> {
    let mut out = vec![
        (TIMES.to_string(), number(sample.wall_time.as_secs_f64())),
        (LOG_SIZES.to_string(), Value::from(sample.log_size)),
        (COMPRESSED_LOG_SIZES.to_string(), Value::from(sample.compressed_log_size)),
        (SYSTEM_TIME.to_string(), Value::from(sample.system_time)),
        (USER_TIME.to_string(), Value::from(sample.user_time)),
        (TIME_PER_CPU.to_string(), Value::from(sample.time_per_cpu.clone())),
    ];
    for event in events {
        let v = sample.counters.get(event).map_or(Value::Null, |&c| number(c));
        out.push((event.clone(), v));
    }
    if let Some(mem) = sample.max_memory {
        out.push((MAX_MEMORY.to_string(), Value::from(mem)));
    }
    out
}

pub struct RunStore {
    path: PathBuf,
    log: RunLog,
}

impl RunStore {
    pub fn open(path: &Path) -> Result<Self, RunError> {
        let persist_err = |source: std::io::Error| RunError::Persistence { path: path.to_path_buf(), source };
        let log = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| persist_err(e.into()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RunLog::new(),
            Err(e) => return Err(persist_err(e)),
        };
        Ok(Self { path: path.to_path_buf(), log })
    }

    pub fn in_memory(path: &Path, log: RunLog) -> Self {
        Self { path: path.to_path_buf(), log }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn existing(&self, key: &str, mode: LibraryMode) -> usize {
        self.log.get(key).map_or(0, |c| c.samples(mode))
    }

    pub fn remaining(&self, key: &str, mode: LibraryMode) -> usize {
        remaining(self.existing(key, mode))
    }

    // APPEND ONE SAMPLE SET. ALL METRICS GROW TOGETHER OR NOT AT ALL.
    pub fn record(
        &mut self,
        key: &str,
        meta: &CellMeta,
        mode: LibraryMode,
        args: &[String],
        sample: &Sample,
        events: &[String],
    ) {
        let cell = self.log.entry(key.to_string()).or_insert_with(|| CellRecord {
            threads: meta.threads,
            variant: meta.variant.clone(),
            args: Vec::new(),
            libs: BTreeMap::new(),
        });
        cell.args = args.to_vec();

        let metrics = cell.libs.entry(mode.name().to_string()).or_default();
        let before = metrics.get(TIMES).map_or(0, Vec::len);
        for (name, value) in sample_values(sample, events) {
            let list = metrics.entry(name).or_default();
            // A METRIC FIRST SEEN NOW (NEW EVENT, MEMORY TURNED ON) WAS NOT
            // MEASURED EARLIER: PAD WITH NULL
            list.resize(list.len().max(before), Value::Null);
            list.push(value);
        }
        // A METRIC THIS SAMPLE DID NOT PRODUCE STAYS ALIGNED THE SAME WAY
        for list in metrics.values_mut() {
            list.resize(list.len().max(before + 1), Value::Null);
        }
    }

    pub fn persist(&self) -> Result<(), RunError> {
        let persist_err = |source: std::io::Error| RunError::Persistence { path: self.path.clone(), source };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(persist_err)?;
        }
        let json = serde_json::to_string_pretty(&self.log).map_err(|e| persist_err(e.into()))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        {
            let mut f = fs::File::create(&tmp).map_err(persist_err)?;
            f.write_all(json.as_bytes()).map_err(persist_err)?;
            f.write_all(b"\n").map_err(persist_err)?;
            f.sync_all().map_err(persist_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(persist_err)?;
        debug!(path = %self.path.display(), cells = self.log.len(), "persisted run log");
        Ok(())
    }
}
