//! Trigger command - re-run processing for an existing contribution

use anyhow::Result;
use tirtha_protocol::ReconsType;

use crate::cli::context::CliContext;
use crate::cli::error::HelpfulError;

#[derive(Debug, clap::Args)]
pub struct TriggerArgs {
    /// Contribution ID
    pub contribution: String,
    /// Which reconstructions to run: all, aV or GS
    #[arg(long, default_value = "all")]
    pub kind: ReconsType,
    /// Skip the image checks and queue reconstruction immediately
    #[arg(long)]
    pub recon_only: bool,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: TriggerArgs, ctx: &CliContext) -> Result<()> {
    let contribution_id = ctx.require_contribution(&args.contribution).await?;
    let task_id = ctx
        .orch
        .retrigger(&contribution_id, args.kind, args.recon_only)
        .await
        .map_err(|err| HelpfulError::from_orchestrator(&err))?;

    let stage = if args.recon_only { "recon" } else { "imageops" };
    if args.json {
        let payload = serde_json::json!({
            "contribution_id": contribution_id,
            "task_id": task_id,
            "task_kind": stage,
            "recons": args.kind.as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Queued {} task {} for contribution {} ({})",
            stage, task_id, contribution_id, args.kind
        );
    }
    Ok(())
}
