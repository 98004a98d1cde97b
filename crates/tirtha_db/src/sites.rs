//! Sites, contributors, contributions and images.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::{datetime_column, optional_datetime_column, parse_column, TirthaDb};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tirtha_ids::{ContributionId, ContributorId, ImageId, SiteId};
use tirtha_protocol::{GateStatus, ImageLabel};

impl TirthaDb {
    // ========================================================================
    // Sites
    // ========================================================================

    pub async fn insert_site(&self, site: &NewSite) -> Result<Site> {
        let id = SiteId::new();
        let now = Self::now_millis();
        sqlx::query(
            r#"
            INSERT INTO sites (id, name, verbose_id, district, state, country,
                               description, thumbnail, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.as_str())
        .bind(&site.name)
        .bind(&site.verbose_id)
        .bind(&site.district)
        .bind(&site.state)
        .bind(&site.country)
        .bind(&site.description)
        .bind(&site.thumbnail)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_site(&id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("site {}", id)))
    }

    pub async fn get_site(&self, id: &SiteId) -> Result<Option<Site>> {
        let row = sqlx::query("SELECT * FROM sites WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_site).transpose()
    }

    /// Look a site up by ID, falling back to its verbose ID.
    pub async fn find_site(&self, key: &str) -> Result<Option<Site>> {
        if let Ok(id) = SiteId::parse(key) {
            if let Some(site) = self.get_site(&id).await? {
                return Ok(Some(site));
            }
        }
        let row = sqlx::query("SELECT * FROM sites WHERE verbose_id = ?")
            .bind(key.trim())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_site).transpose()
    }

    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let rows = sqlx::query("SELECT * FROM sites ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_site).collect()
    }

    pub async fn set_site_flags(&self, id: &SiteId, completed: bool, hidden: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sites SET completed = ?, hidden = ?, updated_at = ? WHERE id = ?",
        )
        .bind(completed)
        .bind(hidden)
        .bind(Self::now_millis())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("site {}", id)));
        }
        Ok(())
    }

    // ========================================================================
    // Contributors
    // ========================================================================

    /// Find a contributor by email, creating one if absent. An existing
    /// contributor keeps its stored name.
    pub async fn upsert_contributor(&self, name: &str, email: &str) -> Result<Contributor> {
        let email = email.trim().to_ascii_lowercase();
        sqlx::query(
            r#"
            INSERT INTO contributors (id, name, email, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(ContributorId::new().as_str())
        .bind(name)
        .bind(&email)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;

        self.contributor_by_email(&email)
            .await?
            .ok_or_else(|| DbError::not_found(format!("contributor {}", email)))
    }

    pub async fn contributor_by_email(&self, email: &str) -> Result<Option<Contributor>> {
        let row = sqlx::query("SELECT * FROM contributors WHERE email = ?")
            .bind(email.trim().to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_contributor).transpose()
    }

    pub async fn get_contributor(&self, id: &ContributorId) -> Result<Option<Contributor>> {
        let row = sqlx::query("SELECT * FROM contributors WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_contributor).transpose()
    }

    // ========================================================================
    // Contributions
    // ========================================================================

    pub async fn insert_contribution(
        &self,
        site_id: &SiteId,
        contributor_id: &ContributorId,
    ) -> Result<Contribution> {
        let id = ContributionId::new();
        sqlx::query(
            r#"
            INSERT INTO contributions (id, site_id, contributor_id, submitted_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id.as_str())
        .bind(site_id.as_str())
        .bind(contributor_id.as_str())
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;

        self.get_contribution(&id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("contribution {}", id)))
    }

    pub async fn get_contribution(&self, id: &ContributionId) -> Result<Option<Contribution>> {
        let row = sqlx::query("SELECT * FROM contributions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_contribution).transpose()
    }

    /// The contribution together with its site and contributor.
    pub async fn contribution_context(&self, id: &ContributionId) -> Result<ContributionContext> {
        let contribution = self
            .get_contribution(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("contribution {}", id)))?;
        let site = self
            .get_site(&contribution.site_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("site {}", contribution.site_id)))?;
        let contributor = self
            .get_contributor(&contribution.contributor_id)
            .await?
            .ok_or_else(|| {
                DbError::not_found(format!("contributor {}", contribution.contributor_id))
            })?;
        Ok(ContributionContext {
            contribution,
            site,
            contributor,
        })
    }

    pub async fn list_site_contributions(&self, site_id: &SiteId) -> Result<Vec<Contribution>> {
        let rows =
            sqlx::query("SELECT * FROM contributions WHERE site_id = ? ORDER BY submitted_at")
                .bind(site_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_contribution).collect()
    }

    pub async fn set_contribution_processed(
        &self,
        id: &ContributionId,
        processed: bool,
    ) -> Result<()> {
        let processed_at = processed.then(Self::now_millis);
        let result = sqlx::query(
            "UPDATE contributions SET processed = ?, processed_at = ? WHERE id = ?",
        )
        .bind(processed)
        .bind(processed_at)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("contribution {}", id)));
        }
        Ok(())
    }

    pub async fn set_gate_status(
        &self,
        id: &ContributionId,
        status: GateStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE contributions SET gate_status = ?, gate_reason = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(reason)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("contribution {}", id)));
        }
        Ok(())
    }

    // ========================================================================
    // Images
    // ========================================================================

    pub async fn insert_image(&self, contribution_id: &ContributionId, path: &str) -> Result<Image> {
        let id = ImageId::new();
        sqlx::query(
            "INSERT INTO images (id, contribution_id, path, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(contribution_id.as_str())
        .bind(path)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;

        Ok(Image {
            id,
            contribution_id: contribution_id.clone(),
            path: path.to_string(),
            label: ImageLabel::Unchecked,
            remark: None,
        })
    }

    pub async fn contribution_images(&self, id: &ContributionId) -> Result<Vec<Image>> {
        let rows = sqlx::query("SELECT * FROM images WHERE contribution_id = ? ORDER BY path")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_image).collect()
    }

    pub async fn set_image_label(
        &self,
        id: &ImageId,
        label: ImageLabel,
        remark: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE images SET label = ?, remark = ? WHERE id = ?")
            .bind(label.as_str())
            .bind(remark)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reset every image of a contribution to `unchecked` (re-trigger).
    pub async fn reset_image_labels(&self, id: &ContributionId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE images SET label = 'unchecked', remark = NULL WHERE contribution_id = ?",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Accumulated image counts across the site's gated contributions.
    pub async fn site_image_counts(&self, site_id: &SiteId) -> Result<ImageCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN c.gate_status = 'accepted'
                                   AND i.label IN ('good', 'unchecked')
                             THEN 1 ELSE 0 END), 0) AS usable
            FROM images i
            JOIN contributions c ON c.id = i.contribution_id
            WHERE c.site_id = ? AND c.gate_status != 'pending'
            "#,
        )
        .bind(site_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(ImageCounts {
            total: row.get::<i64, _>("total") as u64,
            usable: row.get::<i64, _>("usable") as u64,
        })
    }

    /// Images a new Run for the site is bound to: usable images of accepted
    /// contributions.
    pub async fn eligible_images(&self, site_id: &SiteId) -> Result<Vec<Image>> {
        let rows = sqlx::query(
            r#"
            SELECT i.* FROM images i
            JOIN contributions c ON c.id = i.contribution_id
            WHERE c.site_id = ?
              AND c.gate_status = 'accepted'
              AND i.label IN ('good', 'unchecked')
            ORDER BY c.submitted_at, i.path
            "#,
        )
        .bind(site_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_image).collect()
    }

    /// Contributors owning at least one eligible image of the site.
    pub async fn eligible_contributors(&self, site_id: &SiteId) -> Result<Vec<Contributor>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.* FROM contributors p
            JOIN contributions c ON c.contributor_id = p.id
            JOIN images i ON i.contribution_id = c.id
            WHERE c.site_id = ?
              AND c.gate_status = 'accepted'
              AND i.label IN ('good', 'unchecked')
            ORDER BY p.name
            "#,
        )
        .bind(site_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_contributor).collect()
    }
}

pub(crate) fn row_to_site(row: &SqliteRow) -> Result<Site> {
    Ok(Site {
        id: parse_column(row, "id")?,
        name: row.try_get("name")?,
        verbose_id: row.try_get("verbose_id")?,
        district: row.try_get("district")?,
        state: row.try_get("state")?,
        country: row.try_get("country")?,
        description: row.try_get("description")?,
        thumbnail: row.try_get("thumbnail")?,
        completed: row.try_get("completed")?,
        hidden: row.try_get("hidden")?,
        created_at: datetime_column(row, "created_at")?,
    })
}

pub(crate) fn row_to_contributor(row: &SqliteRow) -> Result<Contributor> {
    Ok(Contributor {
        id: parse_column(row, "id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        created_at: datetime_column(row, "created_at")?,
    })
}

fn row_to_contribution(row: &SqliteRow) -> Result<Contribution> {
    Ok(Contribution {
        id: parse_column(row, "id")?,
        site_id: parse_column(row, "site_id")?,
        contributor_id: parse_column(row, "contributor_id")?,
        submitted_at: datetime_column(row, "submitted_at")?,
        processed: row.try_get("processed")?,
        processed_at: optional_datetime_column(row, "processed_at")?,
        gate_status: parse_column(row, "gate_status")?,
        gate_reason: row.try_get("gate_reason")?,
    })
}

fn row_to_image(row: &SqliteRow) -> Result<Image> {
    Ok(Image {
        id: parse_column(row, "id")?,
        contribution_id: parse_column(row, "contribution_id")?,
        path: row.try_get("path")?,
        label: parse_column(row, "label")?,
        remark: row.try_get("remark")?,
    })
}
