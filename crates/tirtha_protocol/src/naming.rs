//! Naming rules for run directories and published artifacts.
//!
//! Layout under `models_root`:
//!
//! ```text
//! <site>/runs/<run>/{images,output,run.log}
//! <site>/published/<site>_<run>.<ext>
//! ```

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tirtha_ids::{RunId, SiteId};

pub const RUN_IMAGES_DIR: &str = "images";
pub const RUN_OUTPUT_DIR: &str = "output";
pub const RUN_LOG_FILE: &str = "run.log";

/// Run directory relative to a storage root (models or archive).
pub fn run_dir_rel(site: &SiteId, run: &RunId) -> PathBuf {
    PathBuf::from(site.as_str()).join("runs").join(run.as_str())
}

pub fn run_dir(root: &Path, site: &SiteId, run: &RunId) -> PathBuf {
    root.join(run_dir_rel(site, run))
}

pub fn published_dir(models_root: &Path, site: &SiteId) -> PathBuf {
    models_root.join(site.as_str()).join("published")
}

/// `<site>_<run>.<ext>`
pub fn published_file_name(site: &SiteId, run: &RunId, ext: &str) -> String {
    format!(
        "{}_{}.{}",
        site.as_str(),
        run.as_str(),
        ext.trim_start_matches('.').to_ascii_lowercase()
    )
}

pub fn published_path(models_root: &Path, site: &SiteId, run: &RunId, ext: &str) -> PathBuf {
    published_dir(models_root, site).join(published_file_name(site, run, ext))
}

/// Public URL of a published artifact: `<base>/static/models/<site>/published/<file>`.
pub fn published_url(base_url: &str, site: &SiteId, file_name: &str) -> String {
    format!(
        "{}/static/models/{}/published/{}",
        base_url.trim_end_matches('/'),
        site.as_str(),
        file_name
    )
}

/// Backup name for a replaced artifact: `<file>.<YYYYmmddHHMMSSmmm>.bak`.
pub fn backup_file_name(file_name: &str, at: DateTime<Utc>) -> String {
    format!("{}.{}.bak", file_name, at.format("%Y%m%d%H%M%S%3f"))
}

/// Extension of a path, lowercased, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ids() -> (SiteId, RunId) {
        (
            SiteId::parse("11111111-1111-4111-8111-111111111111").unwrap(),
            RunId::parse("22222222-2222-4222-8222-222222222222").unwrap(),
        )
    }

    #[test]
    fn published_names() {
        let (site, run) = ids();
        let name = published_file_name(&site, &run, ".GLB");
        assert_eq!(
            name,
            "11111111-1111-4111-8111-111111111111_22222222-2222-4222-8222-222222222222.glb"
        );
        let path = published_path(Path::new("/srv/models"), &site, &run, "glb");
        assert!(path.starts_with("/srv/models/11111111-1111-4111-8111-111111111111/published"));
        assert_eq!(
            published_url("https://tirtha.example/", &site, &name),
            format!(
                "https://tirtha.example/static/models/{}/published/{}",
                site, name
            )
        );
    }

    #[test]
    fn run_dirs_share_layout_across_roots() {
        let (site, run) = ids();
        let live = run_dir(Path::new("/models"), &site, &run);
        let archived = run_dir(Path::new("/archive"), &site, &run);
        assert_eq!(
            live.strip_prefix("/models").unwrap(),
            archived.strip_prefix("/archive").unwrap()
        );
    }

    #[test]
    fn backup_names_are_sortable() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            backup_file_name("a.splat", at),
            "a.splat.20240309070501000.bak"
        );
        assert_eq!(extension_of(Path::new("x/y.Splat")).as_deref(), Some("splat"));
    }
}
