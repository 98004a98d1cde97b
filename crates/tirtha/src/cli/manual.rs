//! create-manual-run - publish an operator-supplied model as a Run

use anyhow::Result;
use std::path::PathBuf;
use tirtha_sentinel::manual::ManualRunRequest;

use crate::cli::context::CliContext;
use crate::cli::error::HelpfulError;

#[derive(Debug, clap::Args)]
pub struct ManualRunArgs {
    /// Site ID or verbose ID
    pub site: String,
    /// Finished model (.glb/.gltf or .splat)
    pub file: PathBuf,
    /// Contributor to credit (defaults to the primary admin)
    #[arg(long)]
    pub contrib_email: Option<String>,
    /// NOID length for the minted identifier (default from config)
    #[arg(long)]
    pub ark_len: Option<usize>,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ManualRunArgs, ctx: &CliContext) -> Result<()> {
    if !args.file.is_file() {
        return Err(HelpfulError::file_not_found(&args.file).into());
    }
    if args.ark_len == Some(0) {
        return Err(HelpfulError::new("--ark-len must be at least 1").into());
    }
    // Friendlier message than the orchestrator's NotFound.
    ctx.require_site(&args.site).await?;

    let report = ctx
        .orch
        .create_manual_run(&ManualRunRequest {
            site: args.site.clone(),
            file: args.file.clone(),
            contributor_email: args.contrib_email.clone(),
            noid_len: args.ark_len,
        })
        .await
        .map_err(|err| HelpfulError::from_orchestrator(&err))?;

    if args.json {
        let payload = serde_json::json!({
            "run_id": report.run.id,
            "kind": report.run.kind,
            "status": report.run.status,
            "published": report.published,
            "ark": report.ark.ark,
            "url": report.ark.url,
            "resolver_url": report.resolver_url,
            "collisions": report.ark.collisions,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Created {} run {} for {}",
            report.run.kind, report.run.id, args.site
        );
        println!("Published: {}", report.published.display());
        println!("ARK: ark:/{}", report.ark.ark);
        println!("Resolver: {}", report.resolver_url);
    }
    Ok(())
}
