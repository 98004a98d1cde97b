//! Tirtha operator CLI
//!
//! Ingests contributions, drives the reconstruction worker and exposes the
//! maintenance commands (archival, output replacement, manual runs, viewer
//! parameters, statistics).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tirtha_logging::{init_logging, LogConfig};
use tirtha_protocol::OrchestratorConfig;

mod cli;

use cli::context::CliContext;

#[derive(Parser, Debug)]
#[command(name = "tirtha", about = "Reconstruction task orchestrator for Project Tirtha")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: <home>/tirtha.toml)
    #[arg(long, global = true, env = "TIRTHA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a contribution from a directory of images and queue it
    Ingest(cli::ingest::IngestArgs),

    /// Re-run image checks and reconstruction for a contribution
    Trigger(cli::trigger::TriggerArgs),

    /// Run the reconstruction worker in the foreground
    Worker(cli::worker::WorkerArgs),

    /// List runs
    Runs(cli::runs::RunsArgs),

    /// Move a finished run's working directory to long-term storage
    ArchiveRun(cli::runs::ArchiveArgs),

    /// Replace the published output of an archived run, keeping a backup
    ReplaceOutput(cli::runs::ReplaceArgs),

    /// Publish a ready-made model as a run and mint its identifier
    CreateManualRun(cli::manual::ManualRunArgs),

    /// Update a run's viewer parameters
    UpdateRunParams(cli::runs::UpdateParamsArgs),

    /// Manage sites
    Site {
        #[command(subcommand)]
        action: cli::site::SiteAction,
    },

    /// Task queue statistics and worker counters
    Queue(cli::queue::QueueArgs),

    /// Write a JSON statistics report
    Stats(cli::stats::StatsArgs),

    /// Show the effective configuration
    Config(cli::config::ConfigArgs),
}

impl Commands {
    fn wants_json(&self) -> bool {
        match self {
            Commands::Ingest(args) => args.json,
            Commands::Trigger(args) => args.json,
            Commands::Worker(args) => args.json,
            Commands::Runs(args) => args.json,
            Commands::ArchiveRun(args) => args.json,
            Commands::ReplaceOutput(args) => args.json,
            Commands::CreateManualRun(args) => args.json,
            Commands::UpdateRunParams(args) => args.json,
            Commands::Site { action } => action.wants_json(),
            Commands::Queue(args) => args.json,
            Commands::Stats(args) => args.json,
            Commands::Config(args) => args.json,
        }
    }

    fn app_name(&self) -> &'static str {
        match self {
            Commands::Worker(_) => "tirtha-worker",
            _ => "tirtha",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = cli.command.wants_json();

    let result = cli::config::load_config(cli.config.as_deref()).and_then(|config| {
        if let Err(err) = init_logging(LogConfig {
            app_name: cli.command.app_name(),
            verbose: cli.verbose,
            log_dir: Some(config.paths.log_dir.clone()),
        }) {
            eprintln!("Warning: failed to initialize file logging: {:#}", err);
        }
        run_command(cli.command, config)
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}

fn run_command(command: Commands, config: OrchestratorConfig) -> Result<()> {
    // `config` must work without a store.
    let command = match command {
        Commands::Config(args) => return cli::config::run(args, &config),
        other => other,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tirtha")
        .build()?;

    runtime.block_on(async move {
        let ctx = CliContext::open(config).await?;
        match command {
            Commands::Ingest(args) => cli::ingest::run(args, &ctx).await,
            Commands::Trigger(args) => cli::trigger::run(args, &ctx).await,
            Commands::Worker(args) => cli::worker::run(args, &ctx).await,
            Commands::Runs(args) => cli::runs::list(args, &ctx).await,
            Commands::ArchiveRun(args) => cli::runs::archive(args, &ctx).await,
            Commands::ReplaceOutput(args) => cli::runs::replace(args, &ctx).await,
            Commands::CreateManualRun(args) => cli::manual::run(args, &ctx).await,
            Commands::UpdateRunParams(args) => cli::runs::update_params(args, &ctx).await,
            Commands::Site { action } => cli::site::run(action, &ctx).await,
            Commands::Queue(args) => cli::queue::run(args, &ctx).await,
            Commands::Stats(args) => cli::stats::run(args, &ctx).await,
            Commands::Config(args) => cli::config::run(args, ctx.config()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_update_run_params_with_negative_values() {
        let cli = Cli::try_parse_from([
            "tirtha",
            "update-run-params",
            "0b0e5d0c-7c4a-4f3e-9d0a-2f1b8c6e4d21",
            "--rota",
            "-90,0,45",
            "--antialiased",
            "true",
        ])
        .unwrap();
        match cli.command {
            Commands::UpdateRunParams(args) => {
                assert_eq!(args.rota, Some([-90.0, 0.0, 45.0]));
                assert_eq!(args.antialiased, Some(true));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn worker_once_conflicts_with_max_tasks() {
        assert!(Cli::try_parse_from(["tirtha", "worker", "--once", "--max-tasks", "3"]).is_err());
    }
}
