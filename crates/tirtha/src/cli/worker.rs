//! Worker command - run the dispatch loop in the foreground
//!
//! SIGINT/SIGTERM cancel the loop; a tool chain in flight is killed and its
//! task goes back to the queue.

use anyhow::Result;
use serde::Serialize;
use tirtha_sentinel::dispatch::{Disposition, TaskReport};
use tirtha_worker::CancellationToken;
use tracing::info;

use crate::cli::context::CliContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{format_duration, print_table};

#[derive(Debug, clap::Args)]
pub struct WorkerArgs {
    /// Exit after this many tasks (0 = run until interrupted; default from config)
    #[arg(long)]
    pub max_tasks: Option<u32>,
    /// Handle at most one due task and exit
    #[arg(long, conflicts_with = "max_tasks")]
    pub once: bool,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ReportRow {
    task_id: i64,
    kind: String,
    outcome: &'static str,
    detail: String,
}

impl From<&TaskReport> for ReportRow {
    fn from(report: &TaskReport) -> Self {
        let (outcome, detail) = match &report.disposition {
            Disposition::Completed { summary } => ("completed", summary.clone()),
            Disposition::Requeued { delay, error } => (
                "requeued",
                format!("retry in {}: {}", format_duration(*delay), error),
            ),
            Disposition::Deferred { delay, reason } => (
                "deferred",
                format!("again in {}: {}", format_duration(*delay), reason),
            ),
            Disposition::Failed { error } => ("failed", error.clone()),
        };
        Self {
            task_id: report.task_id,
            kind: report.kind.to_string(),
            outcome,
            detail,
        }
    }
}

pub async fn run(args: WorkerArgs, ctx: &CliContext) -> Result<()> {
    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone())?;

    let reports = if args.once {
        ctx.orch
            .work_once(&cancel)
            .await
            .map_err(|err| HelpfulError::from_orchestrator(&err))?
            .into_iter()
            .collect::<Vec<_>>()
    } else {
        ctx.orch
            .work(&cancel, args.max_tasks)
            .await
            .map_err(|err| HelpfulError::from_orchestrator(&err))?
    };

    let rows: Vec<ReportRow> = reports.iter().map(ReportRow::from).collect();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No task was due.");
    } else {
        print_table(
            &["TASK", "KIND", "OUTCOME", "DETAIL"],
            rows.into_iter()
                .map(|row| {
                    vec![
                        row.task_id.to_string(),
                        row.kind,
                        row.outcome.to_string(),
                        row.detail,
                    ]
                })
                .collect(),
        );
    }
    Ok(())
}

#[cfg(unix)]
fn install_signal_handlers(cancel: CancellationToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, initiating shutdown...", sig);
            cancel.cancel();
        }
    });
    Ok(())
}

#[cfg(windows)]
fn install_signal_handlers(cancel: CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, initiating shutdown...");
        cancel.cancel();
    })?;
    Ok(())
}
