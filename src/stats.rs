// INSPECTOR-BENCH STATISTICS
// READS A PERSISTED RUN LOG, REDUCES EACH (MODE, BENCHMARK, THREADS, VARIANT)
// GROUP TO A TRIMMED STATISTIC, AND EXPRESSES INSTRUMENTED MODES AS A RATIO
// OVER THE UNINSTRUMENTED BASELINE.
//
// TRIMMED STATISTIC: DROP ONE MIN AND ONE MAX, AVERAGE THE REST. BELOW FOUR
// SAMPLES THERE IS NOTHING LEFT TO TRIM AND THE POPULATION STANDARD DEVIATION
// IS REPORTED INSTEAD. THIS IS HOW EXISTING RESULTS WERE PUBLISHED; KEEP IT.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::StatsError;
use crate::mode::BASELINE;
use crate::store::RunLog;

pub const MIN_TRIM_SAMPLES: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellId {
    pub benchmark: String,
    pub threads: u32,
    pub variant: Option<String>,
}

impl CellId {
    pub fn label(&self) -> String {
        match &self.variant {
            Some(v) => format!("{}-{}-{}", self.benchmark, self.threads, v),
            None => format!("{}-{}", self.benchmark, self.threads),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Relative {
    pub cell: CellId,
    pub mode: String,
    pub metric: String,
    pub value: f64,
    pub baseline: f64,
    pub ratio: f64,
}

fn name_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^-]+)").ok()).as_ref()
}

// BENCHMARK NAMES NEVER CONTAIN '-': EVERYTHING BEFORE THE FIRST ONE
pub fn benchmark_name(key: &str) -> &str {
    name_pattern()
        .and_then(|re| re.captures(key))
        .and_then(|c| c.get(1))
        .map_or(key, |m| m.as_str())
}

// NUMBERS AS-IS, "1,5" AS 1.5, ARRAYS SUMMED, ANYTHING ELSE (AND NaN/inf) 0
pub fn to_float(v: &Value) -> f64 {
    let f = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0),
        Value::Array(items) => items.iter().map(to_float).sum(),
        _ => 0.0,
    };
    if f.is_finite() {
        f
    } else {
        0.0
    }
}

// NULL MEANS "NOT MEASURED" (UNCOUNTED EVENT, METRIC ADDED LATER): NO SAMPLE
pub fn sample_value(v: &Value) -> Option<f64> {
    match v {
        Value::Null => None,
        other => Some(to_float(other)),
    }
}

pub fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

pub fn population_std_dev(samples: &[f64]) -> f64 {
    let m = mean(samples);
    let var = samples.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / samples.len() as f64;
    var.sqrt()
}

pub fn trimmed(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    if samples.len() < MIN_TRIM_SAMPLES {
        return Some(population_std_dev(samples));
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(mean(&sorted[1..sorted.len() - 1]))
}

pub fn ratio(value: f64, baseline: f64, cell: &str, metric: &str) -> Result<f64, StatsError> {
    if baseline == 0.0 {
        return Err(StatsError::ZeroBaseline { cell: cell.to_string(), metric: metric.to_string() });
    }
    Ok(value / baseline)
}

// (MODE, CELL) -> RAW SAMPLES FOR ONE METRIC
pub fn group(log: &RunLog, metric: &str) -> BTreeMap<(String, CellId), Vec<f64>> {
    let mut groups: BTreeMap<(String, CellId), Vec<f64>> = BTreeMap::new();
    for (key, cell) in log {
        let id = CellId {
            benchmark: benchmark_name(key).to_string(),
            threads: cell.threads,
            variant: cell.variant.clone(),
        };
        for (mode, metrics) in &cell.libs {
            if let Some(values) = metrics.get(metric) {
                groups
                    .entry((mode.clone(), id.clone()))
                    .or_default()
                    .extend(values.iter().filter_map(sample_value));
            }
        }
    }
    groups
}

pub fn trimmed_by_group(log: &RunLog, metric: &str) -> Result<BTreeMap<(String, CellId), f64>, StatsError> {
    group(log, metric)
        .into_iter()
        .map(|((mode, id), samples)| {
            let t = trimmed(&samples).ok_or_else(|| StatsError::Empty {
                cell: id.label(),
                metric: metric.to_string(),
            })?;
            Ok(((mode, id), t))
        })
        .collect()
}

// CELLS WITHOUT A BASELINE GROUP ARE LEFT OUT; A ZERO BASELINE IS AN ERROR
pub fn relative_to_baseline(log: &RunLog, metric: &str) -> Result<Vec<Relative>, StatsError> {
    let trimmed = trimmed_by_group(log, metric)?;
    let mut rows = Vec::new();
    for ((mode, id), &value) in &trimmed {
        if mode == BASELINE.name() {
            continue;
        }
        let baseline = match trimmed.get(&(BASELINE.name().to_string(), id.clone())) {
            Some(&b) => b,
            None => continue,
        };
        rows.push(Relative {
            cell: id.clone(),
            mode: mode.clone(),
            metric: metric.to_string(),
            value,
            baseline,
            ratio: ratio(value, baseline, &id.label(), metric)?,
        });
    }
    Ok(rows)
}

pub fn render_table(metric: &str, rows: &[Relative]) -> Vec<String> {
    let mut out = Vec::new();
    out.push(format!("{} RELATIVE TO {}", metric.to_uppercase(), BASELINE.name().to_uppercase()));
    out.push(format!(
        "{:<24} {:>7} {:>7} {:<10} {:>14} {:>14} {:>8}",
        "BENCHMARK", "THREADS", "VARIANT", "MODE", "VALUE", "BASELINE", "RATIO"
    ));
    out.push(format!(
        "{} {} {} {} {} {} {}",
        "-".repeat(24),
        "-".repeat(7),
        "-".repeat(7),
        "-".repeat(10),
        "-".repeat(14),
        "-".repeat(14),
        "-".repeat(8),
    ));
    for r in rows {
        out.push(format!(
            "{:<24} {:>7} {:>7} {:<10} {:>14.3} {:>14.3} {:>7.3}x",
            r.cell.benchmark,
            r.cell.threads,
            r.cell.variant.as_deref().unwrap_or("-"),
            r.mode,
            r.value,
            r.baseline,
            r.ratio,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(raw: Value) -> RunLog {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn trimmed_mean_of_six_drops_extremes() {
        let t = trimmed(&[10.0, 1.0, 4.0, 3.0, 2.0, 100.0]).unwrap();
        assert_eq!(t, (2.0 + 3.0 + 4.0 + 10.0) / 4.0);
    }

    #[test]
    fn trimmed_drops_only_one_of_duplicate_extremes() {
        let t = trimmed(&[1.0, 1.0, 5.0, 5.0]).unwrap();
        assert_eq!(t, 3.0);
    }

    #[test]
    fn three_samples_fall_back_to_population_std_dev() {
        let t = trimmed(&[2.0, 4.0, 6.0]).unwrap();
        let expected = (8.0f64 / 3.0).sqrt();
        assert!((t - expected).abs() < 1e-12);
    }

    #[test]
    fn empty_has_no_statistic() {
        assert_eq!(trimmed(&[]), None);
    }

    #[test]
    fn ratio_is_exact_and_zero_baseline_fails() {
        assert_eq!(ratio(3.0, 2.0, "c", "times"), Ok(1.5));
        assert_eq!(
            ratio(3.0, 0.0, "wc-16", "times"),
            Err(StatsError::ZeroBaseline { cell: "wc-16".into(), metric: "times".into() })
        );
    }

    #[test]
    fn float_coercion() {
        assert_eq!(to_float(&json!(2.5)), 2.5);
        assert_eq!(to_float(&json!("3,25")), 3.25);
        assert_eq!(to_float(&json!("<not counted>")), 0.0);
        assert_eq!(to_float(&json!([1, 2, 3])), 6.0);
        assert_eq!(to_float(&Value::Null), 0.0);
        assert_eq!(to_float(&json!("NaN")), 0.0);
        assert_eq!(to_float(&json!("inf")), 0.0);
        assert_eq!(sample_value(&Value::Null), None);
        assert_eq!(sample_value(&json!("1,5")), Some(1.5));
    }

    #[test]
    fn nulls_are_skipped_not_zeroed() {
        let l = log(json!({
            "pca-16": {"threads": 16, "libs": {
                "pthread": {"cpu-cycles": [null, null, 4.0, 4.0, 4.0, 4.0]},
                "pt":      {"cpu-cycles": [8.0, 8.0, "NaN", 8.0, 8.0, null]}
            }}
        }));
        let groups = group(&l, "cpu-cycles");
        let baseline = &groups[&("pthread".to_string(), CellId { benchmark: "pca".into(), threads: 16, variant: None })];
        assert_eq!(baseline, &vec![4.0, 4.0, 4.0, 4.0]);

        let rows = relative_to_baseline(&l, "cpu-cycles").unwrap();
        assert_eq!(rows.len(), 1);
        // "NaN" COUNTS AS 0 AND IS TRIMMED AWAY AS THE MINIMUM
        assert_eq!(rows[0].value, 8.0);
        assert_eq!(rows[0].ratio, 2.0);
        assert!(rows.iter().all(|r| r.ratio.is_finite()));
    }

    #[test]
    fn benchmark_names_from_keys() {
        assert_eq!(benchmark_name("word_count-16-S"), "word_count");
        assert_eq!(benchmark_name("canneal-8"), "canneal");
        assert_eq!(benchmark_name("plain"), "plain");
    }

    #[test]
    fn relative_rows_per_instrumented_mode() {
        let l = log(json!({
            "kmeans-16": {"threads": 16, "variant": null, "args": [], "libs": {
                "pthread":   {"times": [2.0, 2.0, 2.0, 2.0, 1.0, 9.0]},
                "inspector": {"times": [5.0, 5.0, 5.0, 5.0, 0.0, 50.0]},
                "tthread":   {"times": [3.0, 3.0, 3.0, 3.0, 3.0, 3.0]}
            }},
            "kmeans-8": {"threads": 8, "variant": null, "args": [], "libs": {
                "pt": {"times": [1.0, 1.0, 1.0, 1.0]}
            }}
        }));
        let rows = relative_to_baseline(&l, "times").unwrap();
        // kmeans-8 HAS NO BASELINE AND IS LEFT OUT
        assert_eq!(rows.len(), 2);
        let insp = rows.iter().find(|r| r.mode == "inspector").unwrap();
        assert_eq!(insp.ratio, 2.5);
        let tt = rows.iter().find(|r| r.mode == "tthread").unwrap();
        assert_eq!(tt.ratio, 1.5);
        assert_eq!(tt.cell.benchmark, "kmeans");

        let table = render_table("times", &rows);
        assert_eq!(table.len(), 3 + rows.len());
    }

    #[test]
    fn zero_baseline_surfaces() {
        let l = log(json!({
            "pca-16": {"threads": 16, "libs": {
                "pthread": {"log_sizes": [0, 0, 0, 0, 0, 0]},
                "pt":      {"log_sizes": [9, 9, 9, 9, 9, 9]}
            }}
        }));
        assert!(matches!(
            relative_to_baseline(&l, "log_sizes"),
            Err(StatsError::ZeroBaseline { .. })
        ));
    }

    #[test]
    fn empty_group_is_error() {
        let l = log(json!({
            "pca-16": {"threads": 16, "libs": {"pthread": {"times": []}}}
        }));
        assert!(matches!(trimmed_by_group(&l, "times"), Err(StatsError::Empty { .. })));
    }
}
