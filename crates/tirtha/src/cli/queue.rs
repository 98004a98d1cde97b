//! Queue command - task queue statistics plus this process's counters

use anyhow::Result;
use tirtha_protocol::TaskStatus;
use tirtha_sentinel::METRICS;

use crate::cli::context::CliContext;
use crate::cli::output::{format_time, print_table};

#[derive(Debug, clap::Args)]
pub struct QueueArgs {
    /// Also list the most recent failed tasks
    #[arg(long)]
    pub failed: bool,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

const FAILED_LIMIT: usize = 20;

pub async fn run(args: QueueArgs, ctx: &CliContext) -> Result<()> {
    let stats = ctx.db().queue_stats().await?;
    let failed = if args.failed {
        ctx.db()
            .list_tasks(Some(TaskStatus::Failed), FAILED_LIMIT)
            .await?
    } else {
        Vec::new()
    };
    let metrics = METRICS.snapshot();

    if args.json {
        let payload = serde_json::json!({
            "queue": stats,
            "metrics": metrics,
            "failed": failed,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    print_table(
        &["TOTAL", "QUEUED", "RUNNING", "COMPLETED", "FAILED"],
        vec![vec![
            stats.total.to_string(),
            stats.queued.to_string(),
            stats.running.to_string(),
            stats.completed.to_string(),
            stats.failed.to_string(),
        ]],
    );
    println!("{}", metrics.summary());

    if !failed.is_empty() {
        let rows = failed
            .iter()
            .map(|task| {
                vec![
                    task.id.to_string(),
                    task.kind.to_string(),
                    task.contribution_id.to_string(),
                    task.attempts.to_string(),
                    task.end_time.map(format_time).unwrap_or_else(|| "-".to_string()),
                    task.last_error.clone().unwrap_or_default(),
                ]
            })
            .collect();
        print_table(
            &["TASK", "KIND", "CONTRIBUTION", "ATTEMPTS", "ENDED", "ERROR"],
            rows,
        );
    }
    Ok(())
}
