use std::fs;

use anyhow::{Context, Result};

use inspector_bench::stats;
use inspector_bench::store::{RunLog, TIMES};

use crate::StatsArgs;

pub fn run_stats(args: &StatsArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.log)
        .with_context(|| format!("reading run log {}", args.log.display()))?;
    let log: RunLog = serde_json::from_str(&raw)
        .with_context(|| format!("parsing run log {}", args.log.display()))?;

    let metrics = if args.metrics.is_empty() { vec![TIMES.to_string()] } else { args.metrics.clone() };

    println!("RUN LOG: {} ({} CELLS)", args.log.display(), log.len());
    for metric in &metrics {
        println!();
        let rows = stats::relative_to_baseline(&log, metric)
            .with_context(|| format!("computing {} ratios", metric))?;
        if rows.is_empty() {
            println!("{}: NO CELLS WITH BOTH BASELINE AND INSTRUMENTED SAMPLES", metric.to_uppercase());
            continue;
        }
        for line in stats::render_table(metric, &rows) {
            println!("{}", line);
        }
    }
    Ok(())
}
