//! Run commands - list, archive, replace published output, viewer parameters

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use tirtha_db::{Run, RunFilter};
use tirtha_ids::{RunId, SiteId};
use tirtha_protocol::{parse_triplet, ReconKind, RunStatus, ViewerParams};

use crate::cli::context::{parse_run_id, CliContext};
use crate::cli::error::HelpfulError;
use crate::cli::output::{format_duration, format_time, print_table_colored, run_status_color};

#[derive(Debug, clap::Args)]
pub struct RunsArgs {
    /// Only runs of this site (ID or verbose ID)
    #[arg(long)]
    pub site: Option<String>,
    /// Only runs in this status (Running, Done, Error, Archived, Manual, Cancelled)
    #[arg(long)]
    pub status: Option<RunStatus>,
    /// Only runs of this kind (aV or GS)
    #[arg(long)]
    pub kind: Option<ReconKind>,
    #[arg(long, default_value = "50")]
    pub limit: usize,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct ArchiveArgs {
    /// Run ID
    pub run: String,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct ReplaceArgs {
    /// Run ID (must be Archived)
    pub run: String,
    /// Replacement artifact (.glb/.gltf for aV, .splat for GS)
    pub file: PathBuf,
    /// Who is doing this; recorded in the run notes
    #[arg(long)]
    pub operator: String,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct UpdateParamsArgs {
    /// Run ID
    pub run: String,
    /// Initial camera position "x,y,z"
    #[arg(long, value_parser = parse_triplet, allow_hyphen_values = true)]
    pub cam_pos: Option<[f64; 3]>,
    /// Initial camera look-at "x,y,z"
    #[arg(long, value_parser = parse_triplet, allow_hyphen_values = true)]
    pub cam_lookat: Option<[f64; 3]>,
    /// Camera up vector "x,y,z"
    #[arg(long, value_parser = parse_triplet, allow_hyphen_values = true)]
    pub cam_up: Option<[f64; 3]>,
    /// Rotation "z,x,y" in degrees (rounded to whole degrees)
    #[arg(long, value_parser = parse_triplet, allow_hyphen_values = true)]
    pub rota: Option<[f64; 3]>,
    #[arg(long, allow_hyphen_values = true)]
    pub focal_adjustment: Option<f64>,
    #[arg(long)]
    pub antialiased: Option<bool>,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl UpdateParamsArgs {
    fn params(&self) -> ViewerParams {
        ViewerParams {
            init_cam_pos: self.cam_pos,
            init_cam_look_at: self.cam_lookat,
            cam_up: self.cam_up,
            rota: self.rota.map(round_rotation),
            focal_adjustment: self.focal_adjustment,
            antialiased: self.antialiased,
        }
    }
}

fn round_rotation(rota: [f64; 3]) -> [i32; 3] {
    rota.map(|deg| deg.round() as i32)
}

#[derive(Debug, Serialize)]
struct RunView<'a> {
    #[serde(flatten)]
    run: &'a Run,
    duration_secs: Option<i64>,
}

pub async fn list(args: RunsArgs, ctx: &CliContext) -> Result<()> {
    let site_id: Option<SiteId> = match &args.site {
        Some(key) => Some(ctx.require_site(key).await?.id),
        None => None,
    };
    let runs = ctx
        .db()
        .list_runs(&RunFilter {
            site_id,
            status: args.status,
            kind: args.kind,
            limit: Some(args.limit),
        })
        .await?;

    if args.json {
        let views: Vec<RunView<'_>> = runs
            .iter()
            .map(|run| RunView {
                run,
                duration_secs: run.duration().map(|d| d.num_seconds()),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    let rows = runs
        .iter()
        .map(|run| {
            let duration = run
                .duration()
                .and_then(|d| d.to_std().ok())
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string());
            vec![
                (run.id.to_string(), None),
                (run.kind.to_string(), None),
                (run.status.to_string(), Some(run_status_color(run.status))),
                (format_time(run.started_at), None),
                (duration, None),
                (run.published_file.clone().unwrap_or_else(|| "-".to_string()), None),
            ]
        })
        .collect();
    print_table_colored(
        &["RUN", "KIND", "STATUS", "STARTED", "DURATION", "PUBLISHED"],
        rows,
    );
    Ok(())
}

pub async fn archive(args: ArchiveArgs, ctx: &CliContext) -> Result<()> {
    let run_id = parse_run_id(&args.run)?;
    let run = ctx
        .orch
        .archive_run(&run_id)
        .await
        .map_err(|err| HelpfulError::from_orchestrator(&err))?;
    let location = ctx.orch.lifecycle().resolve_run_dir(&run);

    if args.json {
        let payload = serde_json::json!({
            "run_id": run.id,
            "status": run.status,
            "directory": location,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Archived run {} to {}", run.id, location.display());
    }
    Ok(())
}

pub async fn replace(args: ReplaceArgs, ctx: &CliContext) -> Result<()> {
    if !args.file.is_file() {
        return Err(HelpfulError::file_not_found(&args.file).into());
    }
    let run_id = parse_run_id(&args.run)?;
    let report = ctx
        .orch
        .replace_output(&run_id, &args.file, &args.operator)
        .await
        .map_err(|err| HelpfulError::from_orchestrator(&err))?;

    if args.json {
        let payload = serde_json::json!({
            "run_id": report.run_id,
            "published": report.published,
            "backup": report.backup,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Replaced {}", report.published.display());
        println!("Previous output kept at {}", report.backup.display());
    }
    Ok(())
}

pub async fn update_params(args: UpdateParamsArgs, ctx: &CliContext) -> Result<()> {
    let params = args.params();
    if params.is_empty() {
        return Err(HelpfulError::new("No viewer parameters given")
            .with_suggestion(
                "TRY: tirtha update-run-params <run> --rota 0,90,0 --antialiased true",
            )
            .into());
    }
    let run_id: RunId = parse_run_id(&args.run)?;
    let run = ctx
        .orch
        .update_viewer_params(&run_id, &params)
        .await
        .map_err(|err| HelpfulError::from_orchestrator(&err))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run.viewer_params)?);
    } else {
        println!(
            "Updated {} on run {}",
            params.updated_fields().join(", "),
            run.id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_rounds_to_whole_degrees() {
        assert_eq!(round_rotation([89.6, -0.4, 45.5]), [90, 0, 46]);
    }

    #[test]
    fn only_given_fields_are_set() {
        let args = UpdateParamsArgs {
            run: String::new(),
            cam_pos: None,
            cam_lookat: Some([0.0, 1.0, 0.0]),
            cam_up: None,
            rota: None,
            focal_adjustment: None,
            antialiased: Some(false),
            json: false,
        };
        let params = args.params();
        assert_eq!(params.updated_fields(), vec!["init_cam_look_at", "antialiased"]);
    }
}
