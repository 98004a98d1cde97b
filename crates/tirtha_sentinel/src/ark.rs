//! Identifier minting.
//!
//! An identifier is `<naan><shoulder><noid><check>`: a random opaque name
//! drawn from the betanumeric alphabet plus a NOID check character computed
//! over everything before it. Uniqueness is enforced by the store; a
//! collision just means drawing again.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tirtha_db::{ArkRecord, DbError, Run, Site, TirthaDb};
use tirtha_protocol::ArkConfig;
use tracing::{debug, info, warn};

use crate::metrics::METRICS;

/// Digits plus consonants without `l` and `y`.
pub const NOID_ALPHABET: &[u8] = b"0123456789bcdfghjkmnpqrstvwxz";

const NOTICE: &str =
    "This ARK was generated & is managed by Project Tirtha (https://smlab.niser.ac.in/project/tirtha/).";

/// Random opaque name of `len` characters.
pub fn generate_noid(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| NOID_ALPHABET[rng.gen_range(0..NOID_ALPHABET.len())] as char)
        .collect()
}

/// NOID check character: sum of (position × ordinal) over the string,
/// positions starting at 1, modulo the alphabet size. Characters outside
/// the alphabet (like `/`) have ordinal zero.
pub fn noid_check_digit(base: &str) -> char {
    let total: usize = base
        .bytes()
        .enumerate()
        .map(|(idx, byte)| {
            let ordinal = NOID_ALPHABET.iter().position(|&c| c == byte).unwrap_or(0);
            ordinal * (idx + 1)
        })
        .sum();
    NOID_ALPHABET[total % NOID_ALPHABET.len()] as char
}

/// `<naan><shoulder><noid>` plus its check character.
pub fn build_ark(naan: u64, shoulder: &str, noid: &str) -> (String, String) {
    let base = format!("{}{}{}", naan, shoulder, noid);
    let check = noid_check_digit(&base);
    (format!("{}{}", base, check), format!("{}{}", noid, check))
}

/// `<base-url>/ark:/<naan>/<shoulder-without-slash><assigned-name>`
pub fn resolver_url(base_url: &str, record: &ArkRecord) -> String {
    format!(
        "{}/ark:/{}/{}{}",
        base_url.trim_end_matches('/'),
        record.naan,
        record.shoulder.trim_start_matches('/'),
        record.assigned_name
    )
}

/// Third-party resolution: `<resolver>/ark:/<ark>`.
pub fn fallback_url(resolver: &str, record: &ArkRecord) -> String {
    format!("{}/ark:/{}", resolver.trim_end_matches('/'), record.ark)
}

/// Mint-time snapshot. Never refreshed afterwards.
pub fn mint_metadata(
    base_url: &str,
    site: &Site,
    run: &Run,
    contributors: &[String],
    image_count: u64,
) -> serde_json::Value {
    let thumbnail = site
        .thumbnail
        .as_deref()
        .map(|t| format!("{}{}", base_url.trim_end_matches('/'), t))
        .unwrap_or_default();
    let ended_at = run.ended_at.unwrap_or_else(Utc::now);
    json!({
        "monument": {
            "name": site.name,
            "location": site.location(),
            "verbose_id": site.verbose_id,
            "thumbnail": thumbnail,
            "description": site.description,
            "completed": site.completed,
        },
        "run": {
            "ID": run.id.as_str(),
            "ended_at": ended_at.to_rfc3339(),
            "contributors": contributors,
            "images": image_count,
        },
        "notice": NOTICE,
    })
}

/// Where identifier records are persisted. A duplicate identifier string
/// must come back as [`DbError::Constraint`].
#[async_trait]
pub trait ArkStore: Send + Sync {
    async fn insert_ark(&self, record: &ArkRecord) -> Result<(), DbError>;
}

#[async_trait]
impl ArkStore for TirthaDb {
    async fn insert_ark(&self, record: &ArkRecord) -> Result<(), DbError> {
        TirthaDb::insert_ark(self, record).await
    }
}

#[async_trait]
impl<T: ArkStore + ?Sized> ArkStore for std::sync::Arc<T> {
    async fn insert_ark(&self, record: &ArkRecord) -> Result<(), DbError> {
        (**self).insert_ark(record).await
    }
}

pub struct ArkMinter<S> {
    config: ArkConfig,
    store: S,
}

impl<S: ArkStore> ArkMinter<S> {
    pub fn new(config: ArkConfig, store: S) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ArkConfig {
        &self.config
    }

    /// Mint with the configured name length.
    pub async fn mint(
        &self,
        run: &Run,
        url: &str,
        metadata: serde_json::Value,
    ) -> Result<ArkRecord, DbError> {
        self.mint_with_len(run, url, metadata, self.config.noid_len)
            .await
    }

    /// Draw names until one is accepted by the store. Collisions are counted
    /// on the record; any other store error ends the loop.
    pub async fn mint_with_len(
        &self,
        run: &Run,
        url: &str,
        metadata: serde_json::Value,
        noid_len: usize,
    ) -> Result<ArkRecord, DbError> {
        let noid_len = noid_len.max(1);
        let mut collisions: u32 = 0;
        loop {
            let noid = generate_noid(noid_len);
            let (ark, assigned_name) = build_ark(self.config.naan, &self.config.shoulder, &noid);
            let record = ArkRecord {
                ark,
                naan: self.config.naan,
                shoulder: self.config.shoulder.clone(),
                assigned_name,
                url: url.to_string(),
                metadata: metadata.clone(),
                collisions,
                run_id: run.id.clone(),
                created_at: Utc::now(),
            };
            match self.store.insert_ark(&record).await {
                Ok(()) => {
                    METRICS.inc_arks_minted();
                    info!(run_id = %run.id, ark = %record.ark, collisions, "Identifier minted");
                    return Ok(record);
                }
                Err(DbError::Constraint(msg)) => {
                    collisions += 1;
                    METRICS.inc_ark_collisions();
                    if collisions % 100 == 0 {
                        warn!(run_id = %run.id, collisions, "Identifier keeps colliding");
                    } else {
                        debug!(run_id = %run.id, ark = %record.ark, "Identifier collision: {}", msg);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn resolver_url(&self, record: &ArkRecord) -> String {
        resolver_url(&self.config.base_url, record)
    }

    pub fn fallback_url(&self, record: &ArkRecord) -> String {
        fallback_url(&self.config.fallback_resolver, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_digit_matches_reference_value() {
        assert_eq!(noid_check_digit("13030/xf93gt2"), 'q');
    }

    #[test]
    fn check_digit_detects_transposition() {
        let a = noid_check_digit("999999/ab4c7");
        let b = noid_check_digit("999999/a4bc7");
        assert_ne!(a, b);
    }

    #[test]
    fn noid_uses_alphabet_and_length() {
        let noid = generate_noid(16);
        assert_eq!(noid.len(), 16);
        assert!(noid.bytes().all(|b| NOID_ALPHABET.contains(&b)));
    }

    #[test]
    fn ark_layout() {
        let (ark, assigned) = build_ark(999999, "/a", "0000000000000000");
        assert_eq!(ark, "999999/a0000000000000000h");
        assert_eq!(assigned, "0000000000000000h");
    }

    #[test]
    fn resolver_strips_shoulder_slash() {
        let record = ArkRecord {
            ark: "999999/abcdz".into(),
            naan: 999999,
            shoulder: "/a".into(),
            assigned_name: "bcdz".into(),
            url: String::new(),
            metadata: serde_json::Value::Null,
            collisions: 0,
            run_id: tirtha_ids::RunId::new(),
            created_at: Utc::now(),
        };
        assert_eq!(
            resolver_url("http://localhost:8000/", &record),
            "http://localhost:8000/ark:/999999/abcdz"
        );
        assert_eq!(
            fallback_url("https://n2t.net", &record),
            "https://n2t.net/ark:/999999/abcdz"
        );
    }
}
