//! Ingest command - register a contribution from a directory of images and
//! submit it to the queue.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tirtha_ids::{ContributionId, SiteId};
use tirtha_protocol::ReconsType;
use tracing::info;

use crate::cli::context::CliContext;
use crate::cli::error::HelpfulError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, clap::Args)]
pub struct IngestArgs {
    /// Site ID or verbose ID
    pub site: String,
    /// Directory holding the contributed images
    pub images_dir: PathBuf,
    /// Contributor email
    #[arg(long)]
    pub email: String,
    /// Contributor display name (defaults to the email's local part)
    #[arg(long)]
    pub name: Option<String>,
    /// Which reconstructions to run: all, aV or GS
    #[arg(long, default_value = "all")]
    pub kind: ReconsType,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct IngestResult {
    contribution_id: ContributionId,
    site_id: SiteId,
    images: usize,
    task_id: i64,
}

pub async fn run(args: IngestArgs, ctx: &CliContext) -> Result<()> {
    if !args.images_dir.exists() {
        return Err(HelpfulError::file_not_found(&args.images_dir).into());
    }
    if !args.images_dir.is_dir() {
        return Err(HelpfulError::not_a_directory(&args.images_dir).into());
    }
    let images = collect_images(&args.images_dir)?;
    if images.is_empty() {
        return Err(HelpfulError::no_images(&args.images_dir).into());
    }

    let site = ctx.require_site(&args.site).await?;
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| default_name(&args.email));
    let db = ctx.db();
    let contributor = db.upsert_contributor(&name, &args.email).await?;
    let contribution = db.insert_contribution(&site.id, &contributor.id).await?;
    for image in &images {
        db.insert_image(&contribution.id, &image.to_string_lossy())
            .await?;
    }
    info!(
        contribution_id = %contribution.id,
        site = %site.verbose_id,
        images = images.len(),
        "Contribution registered"
    );

    let task_id = ctx
        .orch
        .submit(&contribution.id, args.kind)
        .await
        .map_err(|err| HelpfulError::from_orchestrator(&err))?;

    let result = IngestResult {
        contribution_id: contribution.id,
        site_id: site.id,
        images: images.len(),
        task_id,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Contribution {} ({} images) queued as task {}",
            result.contribution_id, result.images, result.task_id
        );
    }
    Ok(())
}

/// Image files directly inside `dir`, absolute and sorted.
fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;
    let mut images = Vec::new();
    for entry in std::fs::read_dir(&dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn default_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn collects_only_images() {
        let tmp = TempDir::new().unwrap();
        for name in ["b.JPG", "a.jpg", "c.png", "notes.txt"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(tmp.path().join("nested.jpg")).unwrap();

        let images = collect_images(tmp.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.JPG", "c.png"]);
        assert!(images.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn default_name_uses_local_part() {
        assert_eq!(default_name("asha@example.org"), "asha");
        assert_eq!(default_name("nobody"), "nobody");
    }
}
