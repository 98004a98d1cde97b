//! Site command - register, list and flag heritage sites

use anyhow::Result;
use clap::Subcommand;
use tirtha_db::{DbError, NewSite};

use crate::cli::context::CliContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::print_table;

#[derive(Subcommand, Debug, Clone)]
pub enum SiteAction {
    /// Register a new site
    Add {
        /// Display name, e.g. "Mukteswara Temple"
        name: String,
        /// Unique slug used in URLs and on the command line
        #[arg(long)]
        verbose_id: String,
        /// "District, State, Country"
        #[arg(long, default_value = "")]
        location: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Thumbnail path relative to the public base URL
        #[arg(long)]
        thumbnail: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List sites
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a site completed/incomplete or hidden/visible
    Flag {
        /// Site ID or verbose ID
        site: String,
        #[arg(long)]
        completed: Option<bool>,
        #[arg(long)]
        hidden: Option<bool>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl SiteAction {
    pub fn wants_json(&self) -> bool {
        match self {
            SiteAction::Add { json, .. }
            | SiteAction::List { json }
            | SiteAction::Flag { json, .. } => *json,
        }
    }
}

pub async fn run(action: SiteAction, ctx: &CliContext) -> Result<()> {
    match action {
        SiteAction::Add {
            name,
            verbose_id,
            location,
            description,
            thumbnail,
            json,
        } => {
            let (district, state, country) = split_location(&location);
            let site = ctx
                .db()
                .insert_site(&NewSite {
                    name,
                    verbose_id: verbose_id.clone(),
                    district,
                    state,
                    country,
                    description,
                    thumbnail,
                })
                .await
                .map_err(|err| match err {
                    DbError::Constraint(_) => anyhow::Error::from(
                        HelpfulError::new(format!("Site '{}' already exists", verbose_id))
                            .with_suggestion("TRY: tirtha site list"),
                    ),
                    other => other.into(),
                })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&site)?);
            } else {
                println!("Registered site {} ({})", site.verbose_id, site.id);
            }
            Ok(())
        }
        SiteAction::List { json } => {
            let sites = ctx.db().list_sites().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sites)?);
                return Ok(());
            }
            if sites.is_empty() {
                println!("No sites registered.");
                return Ok(());
            }
            let rows = sites
                .iter()
                .map(|site| {
                    vec![
                        site.verbose_id.clone(),
                        site.name.clone(),
                        site.location(),
                        yes_no(site.completed),
                        yes_no(site.hidden),
                        site.id.to_string(),
                    ]
                })
                .collect();
            print_table(
                &["SLUG", "NAME", "LOCATION", "COMPLETED", "HIDDEN", "ID"],
                rows,
            );
            Ok(())
        }
        SiteAction::Flag {
            site,
            completed,
            hidden,
            json,
        } => {
            if completed.is_none() && hidden.is_none() {
                return Err(HelpfulError::new("No site flag given")
                    .with_suggestion(format!("TRY: tirtha site flag {} --completed true", site))
                    .with_suggestion(format!("TRY: tirtha site flag {} --hidden false", site))
                    .into());
            }
            let current = ctx.require_site(&site).await?;
            let completed = completed.unwrap_or(current.completed);
            let hidden = hidden.unwrap_or(current.hidden);
            ctx.db()
                .set_site_flags(&current.id, completed, hidden)
                .await?;

            if json {
                let payload = serde_json::json!({
                    "site_id": current.id,
                    "verbose_id": current.verbose_id,
                    "completed": completed,
                    "hidden": hidden,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{}: completed={} hidden={}",
                    current.verbose_id,
                    yes_no(completed),
                    yes_no(hidden)
                );
            }
            Ok(())
        }
    }
}

fn yes_no(flag: bool) -> String {
    let word = if flag { "yes" } else { "no" };
    word.to_string()
}

/// Up to three comma-separated parts; missing parts stay empty.
fn split_location(location: &str) -> (String, String, String) {
    let mut parts = location.split(',').map(|part| part.trim().to_string());
    (
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_location_parts() {
        assert_eq!(
            split_location("Khordha, Odisha, India"),
            ("Khordha".into(), "Odisha".into(), "India".into())
        );
        assert_eq!(
            split_location("Puri"),
            ("Puri".into(), String::new(), String::new())
        );
        assert_eq!(split_location(""), (String::new(), String::new(), String::new()));
    }
}
