//! Stats command - write a JSON statistics report for the whole store

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tirtha_db::{QueueStats, StoreStats};

use crate::cli::context::CliContext;

#[derive(Debug, clap::Args)]
pub struct StatsArgs {
    /// Where to write tirtha_stats-<timestamp>.json (default: <tmp>/tirtha_stats)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Print the report path as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    generated_at: DateTime<Utc>,
    store: StoreStats,
    queue: QueueStats,
    /// Runs that did not end in Error or Cancelled.
    run_success_count: u64,
    run_success_percentage: Option<f64>,
}

impl StatsReport {
    fn new(store: StoreStats, queue: QueueStats, generated_at: DateTime<Utc>) -> Self {
        let failed: u64 = ["Error", "Cancelled"]
            .iter()
            .filter_map(|status| store.runs_by_status.get(*status))
            .sum();
        let success = store.runs.saturating_sub(failed);
        let percentage = (store.runs > 0).then(|| success as f64 / store.runs as f64 * 100.0);
        Self {
            generated_at,
            store,
            queue,
            run_success_count: success,
            run_success_percentage: percentage,
        }
    }
}

pub async fn run(args: StatsArgs, ctx: &CliContext) -> Result<()> {
    let store = ctx.db().store_stats().await?;
    let queue = ctx.db().queue_stats().await?;
    let report = StatsReport::new(store, queue, Utc::now());

    let dir = args
        .output_dir
        .unwrap_or_else(|| std::env::temp_dir().join("tirtha_stats"));
    let path = write_report(&dir, &report)?;

    if args.json {
        println!("{}", serde_json::json!({ "path": path }));
    } else {
        println!("Wrote {}", path.display());
        println!(
            "sites={} contributions={} images={} runs={} arks={}",
            report.store.sites,
            report.store.contributions,
            report.store.images,
            report.store.runs,
            report.store.arks
        );
    }
    Ok(())
}

fn write_report(dir: &Path, report: &StatsReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!(
        "tirtha_stats-{}.json",
        report.generated_at.format("%Y%m%dT%H%M%SZ")
    ));
    let body = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store_with_runs(by_status: &[(&str, u64)]) -> StoreStats {
        let mut store = StoreStats::default();
        for (status, n) in by_status {
            store.runs += n;
            store.runs_by_status.insert(status.to_string(), *n);
        }
        store
    }

    #[test]
    fn success_excludes_error_and_cancelled() {
        let store = store_with_runs(&[("Done", 6), ("Archived", 1), ("Error", 2), ("Cancelled", 1)]);
        let report = StatsReport::new(store, QueueStats::default(), Utc::now());
        assert_eq!(report.run_success_count, 7);
        assert_eq!(report.run_success_percentage, Some(70.0));
    }

    #[test]
    fn no_runs_has_no_percentage() {
        let report = StatsReport::new(StoreStats::default(), QueueStats::default(), Utc::now());
        assert_eq!(report.run_success_percentage, None);
    }

    #[test]
    fn report_file_is_timestamped() {
        let tmp = TempDir::new().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let report = StatsReport::new(StoreStats::default(), QueueStats::default(), at);
        let path = write_report(tmp.path(), &report).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "tirtha_stats-20240309T140500Z.json"
        );
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["store"]["runs"], 0);
    }
}
