//! Builders for sites, contributors, contributions and images backed by the
//! real schema and real files.

use anyhow::Result;
use tirtha_db::{Contribution, Contributor, Image, NewSite, Site, TirthaDb};
use tirtha_protocol::{GateStatus, ImageLabel};

use crate::env::TestEnv;

pub struct SiteFixture {
    site: NewSite,
}

impl SiteFixture {
    pub fn new(name: &str) -> Self {
        let verbose_id = name
            .to_ascii_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        Self {
            site: NewSite {
                name: name.to_string(),
                verbose_id,
                district: "Khordha".to_string(),
                state: "Odisha".to_string(),
                country: "India".to_string(),
                description: format!("{} (fixture)", name),
                thumbnail: None,
            },
        }
    }

    pub fn verbose_id(mut self, verbose_id: &str) -> Self {
        self.site.verbose_id = verbose_id.to_string();
        self
    }

    pub fn thumbnail(mut self, path: &str) -> Self {
        self.site.thumbnail = Some(path.to_string());
        self
    }

    pub async fn insert(self, db: &TirthaDb) -> Result<Site> {
        Ok(db.insert_site(&self.site).await?)
    }
}

/// A contribution as seeded by [`ContributionFixture`].
#[derive(Debug, Clone)]
pub struct SeededContribution {
    pub contribution: Contribution,
    pub contributor: Contributor,
    pub images: Vec<Image>,
}

pub struct ContributionFixture {
    site: Site,
    contributor_name: String,
    contributor_email: String,
    images: usize,
    gate: GateStatus,
    label: ImageLabel,
}

impl ContributionFixture {
    pub fn new(site: &Site) -> Self {
        Self {
            site: site.clone(),
            contributor_name: "Asha Contributor".to_string(),
            contributor_email: "asha@contrib.test".to_string(),
            images: 12,
            gate: GateStatus::Pending,
            label: ImageLabel::Unchecked,
        }
    }

    pub fn contributor(mut self, name: &str, email: &str) -> Self {
        self.contributor_name = name.to_string();
        self.contributor_email = email.to_string();
        self
    }

    pub fn images(mut self, count: usize) -> Self {
        self.images = count;
        self
    }

    /// Pretend the Ingestion Gate already ran.
    pub fn accepted(mut self) -> Self {
        self.gate = GateStatus::Accepted;
        self
    }

    pub fn gate(mut self, gate: GateStatus) -> Self {
        self.gate = gate;
        self
    }

    pub fn label(mut self, label: ImageLabel) -> Self {
        self.label = label;
        self
    }

    /// Insert the rows and write a small JPEG-ish file per image under
    /// `<home>/uploads/<contribution>/`.
    pub async fn insert(self, env: &TestEnv) -> Result<SeededContribution> {
        let db = &env.db;
        let contributor = db
            .upsert_contributor(&self.contributor_name, &self.contributor_email)
            .await?;
        let contribution = db.insert_contribution(&self.site.id, &contributor.id).await?;

        let mut images = Vec::with_capacity(self.images);
        for idx in 0..self.images {
            let path = env.write_file(
                &format!("uploads/{}/img_{:03}.jpg", contribution.id, idx),
                &[0xFF, 0xD8, 0xFF, idx as u8],
            )?;
            let mut image = db
                .insert_image(&contribution.id, &path.to_string_lossy())
                .await?;
            if self.label != ImageLabel::Unchecked {
                db.set_image_label(&image.id, self.label, None).await?;
                image.label = self.label;
            }
            images.push(image);
        }

        if self.gate != GateStatus::Pending {
            db.set_gate_status(&contribution.id, self.gate, None).await?;
        }
        let contribution = db
            .get_contribution(&contribution.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("contribution vanished"))?;

        Ok(SeededContribution {
            contribution,
            contributor,
            images,
        })
    }
}
