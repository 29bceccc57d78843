// INSPECTOR-BENCH BENCHMARK CATALOG
// DESCRIPTORS, THREAD-COUNT ARGUMENT RULES, AND THE JSON CATALOG LOADER
//
// THE HARNESS ONLY CONSUMES THE RESOLVED ARGUMENT LIST AND WORKING DIRECTORY.
// WHICH RULE CONVERTS A THREAD COUNT INTO AN ARGUMENT IS A PURE FUNCTION OF
// THE BENCHMARK NAME.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::CatalogError;

// ARGUMENT PLACEHOLDER REPLACED BY THE RULE-CONVERTED THREAD COUNT
pub const THREADS_SLOT: &str = "{threads}";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadRule {
    Identity,
    // CANNEAL SPAWNS ONE EXTRA THREAD ON TOP OF ITS ARGUMENT
    Canneal,
    // DEDUP RUNS A PIPELINE OF STAGES, EACH WITH N THREADS
    Dedup,
}

impl ThreadRule {
    pub fn for_benchmark(name: &str) -> Self {
        match name {
            "canneal" => Self::Canneal,
            "dedup" => Self::Dedup,
            _ => Self::Identity,
        }
    }

    pub fn apply(self, threads: u32) -> u32 {
        match self {
            Self::Identity => threads,
            Self::Canneal => match threads {
                16 => 15,
                8 => 7,
                4 => 3,
                _ => 1,
            },
            Self::Dedup => match threads {
                8 => 2,
                _ => 1,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArgSlot {
    Literal(String),
    Threads,
}

impl<'de> Deserialize<'de> for ArgSlot {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(d)?;
        Ok(match value {
            serde_json::Value::String(s) if s == THREADS_SLOT => Self::Threads,
            serde_json::Value::String(s) => Self::Literal(s),
            other => Self::Literal(other.to_string()),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Benchmark {
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<ArgSlot>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub variant: Option<String>,
}

impl Benchmark {
    pub fn new(name: &str, directory: impl Into<PathBuf>, args: Vec<ArgSlot>) -> Self {
        Self {
            name: name.to_string(),
            command: None,
            directory: Some(directory.into()),
            args,
            env: BTreeMap::new(),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: &str) -> Self {
        self.variant = Some(variant.to_string());
        self
    }

    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or(&self.name)
    }

    pub fn working_dir(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| PathBuf::from(&self.name))
    }

    pub fn program(&self) -> PathBuf {
        self.working_dir().join(self.command())
    }

    pub fn resolve_args(&self, threads: u32) -> Vec<String> {
        let rule = ThreadRule::for_benchmark(&self.name);
        self.args
            .iter()
            .map(|slot| match slot {
                ArgSlot::Literal(s) => s.clone(),
                ArgSlot::Threads => rule.apply(threads).to_string(),
            })
            .collect()
    }

    // LOG KEY: <benchmark>-<threads>[-<variant>]
    pub fn cell_key(&self, threads: u32) -> String {
        match &self.variant {
            Some(v) => format!("{}-{}-{}", self.name, threads, v),
            None => format!("{}-{}", self.name, threads),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BenchmarkSet {
    pub log: String,
    pub threads: Vec<u32>,
    pub benchmarks: Vec<Benchmark>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub test_root: Option<PathBuf>,
    pub sets: Vec<BenchmarkSet>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut catalog: Catalog =
            serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        // RELATIVE PATHS RESOLVE AGAINST THE CATALOG FILE'S DIRECTORY
        let base = path.parent().unwrap_or(Path::new("."));
        let root = match catalog.test_root.take() {
            Some(r) if r.is_relative() => base.join(r),
            Some(r) => r,
            None => base.to_path_buf(),
        };
        for set in &mut catalog.sets {
            if set.threads.is_empty() {
                return Err(CatalogError::NoThreadCounts { log: set.log.clone() });
            }
            for bench in &mut set.benchmarks {
                bench.directory = Some(match bench.directory.take() {
                    Some(d) if d.is_relative() => root.join(d),
                    Some(d) => d,
                    None => root.join(&bench.name),
                });
            }
        }
        catalog.test_root = Some(root);
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canneal_rule() {
        let r = ThreadRule::for_benchmark("canneal");
        assert_eq!(r, ThreadRule::Canneal);
        assert_eq!(r.apply(16), 15);
        assert_eq!(r.apply(8), 7);
        assert_eq!(r.apply(4), 3);
        assert_eq!(r.apply(2), 1);
    }

    #[test]
    fn dedup_rule() {
        let r = ThreadRule::for_benchmark("dedup");
        assert_eq!(r.apply(8), 2);
        assert_eq!(r.apply(16), 1);
        assert_eq!(r.apply(4), 1);
    }

    #[test]
    fn identity_for_everything_else() {
        assert_eq!(ThreadRule::for_benchmark("swaptions"), ThreadRule::Identity);
        assert_eq!(ThreadRule::Identity.apply(16), 16);
    }

    #[test]
    fn resolve_args_mixes_literals_and_slots() {
        let b = Benchmark::new(
            "canneal",
            "/eval/canneal",
            vec![
                ArgSlot::Threads,
                ArgSlot::Literal("10000".into()),
                ArgSlot::Literal("100000.nets".into()),
            ],
        );
        assert_eq!(b.resolve_args(8), vec!["7", "10000", "100000.nets"]);
        assert_eq!(b.program(), PathBuf::from("/eval/canneal/canneal"));
    }

    #[test]
    fn cell_keys() {
        let b = Benchmark::new("word_count", "/x", vec![]);
        assert_eq!(b.cell_key(16), "word_count-16");
        let b = b.with_variant("S");
        assert_eq!(b.cell_key(16), "word_count-16-S");
    }

    #[test]
    fn catalog_parses_slots_numbers_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{
                "test_root": "tests",
                "sets": [{
                    "log": "increasing-threads.json",
                    "threads": [16, 8],
                    "benchmarks": [
                        {"name": "swaptions", "args": ["-ns", 128, "-sm", 25000.0, "-nt", "{threads}"]},
                        {"name": "blackscholes", "variant": "4", "env": {"NUM_RUNS": "25"},
                         "command": "blackscholes.bin", "args": ["{threads}"]}
                    ]
                }]
            }"#,
        )
        .unwrap();

        let catalog = Catalog::load(&path).unwrap();
        let set = &catalog.sets[0];
        assert_eq!(set.threads, vec![16, 8]);

        let swaptions = &set.benchmarks[0];
        assert_eq!(swaptions.resolve_args(8), vec!["-ns", "128", "-sm", "25000.0", "-nt", "8"]);
        assert_eq!(swaptions.working_dir(), dir.path().join("tests").join("swaptions"));

        let bs = &set.benchmarks[1];
        assert_eq!(bs.program(), dir.path().join("tests/blackscholes/blackscholes.bin"));
        assert_eq!(bs.env.get("NUM_RUNS").map(String::as_str), Some("25"));
        assert_eq!(bs.cell_key(16), "blackscholes-16-4");
    }

    #[test]
    fn catalog_rejects_empty_thread_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{"sets": [{"log": "a.json", "threads": [], "benchmarks": []}]}"#).unwrap();
        assert!(matches!(Catalog::load(&path), Err(CatalogError::NoThreadCounts { .. })));
    }
}
