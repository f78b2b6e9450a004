//! Gallery persistence
//!
//! File layout: `{ "_max_id": <id>, "<id>": { "last_seen": <epoch secs>, "embedding": [..] } }`.
//! `_max_id` is the highest id ever allocated, pruned or not.
//! One averaged, normalized vector per identity. Older files that stored
//! `feature` / `features` (single vector or list of vectors) are accepted.

use super::types::{GlobalId, GlobalIdentity};
use crate::error::Result;
use crate::vision::{l2_normalize, mean_vector};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct StoredIdentity {
    #[serde(default)]
    last_seen: Option<f64>,
    #[serde(default, alias = "feature", alias = "features")]
    embedding: Option<StoredVectors>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredVectors {
    Single(Vec<f32>),
    Many(Vec<Vec<f32>>),
}

impl StoredVectors {
    fn into_vector(self) -> Option<Vec<f32>> {
        match self {
            StoredVectors::Single(v) => l2_normalize(v),
            StoredVectors::Many(vs) => mean_vector(&vs).and_then(l2_normalize),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GalleryFile {
    /// Highest id ever allocated, so pruned ids are not handed out again
    #[serde(default, rename = "_max_id", skip_serializing_if = "Option::is_none")]
    max_id: Option<GlobalId>,
    #[serde(flatten)]
    identities: BTreeMap<String, StoredIdentity>,
}

/// Identity restored from disk
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: GlobalId,
    pub embedding: Vec<f32>,
    pub last_seen: DateTime<Utc>,
}

/// Everything the gallery file holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredGallery {
    pub entries: Vec<StoredEntry>,
    /// Highest id ever allocated; at least the largest stored id
    pub max_id: GlobalId,
}

/// Reads / writes the gallery file
#[derive(Debug, Clone)]
pub struct GalleryRepository {
    path: PathBuf,
}

impl GalleryRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load stored identities. A missing file is an empty gallery;
    /// malformed entries are skipped.
    pub fn load(&self) -> Result<StoredGallery> {
        if !self.path.exists() {
            return Ok(StoredGallery::default());
        }

        let raw = fs::read_to_string(&self.path)?;
        let file: GalleryFile = serde_json::from_str(&raw)?;

        let mut gallery = StoredGallery {
            entries: Vec::with_capacity(file.identities.len()),
            max_id: file.max_id.unwrap_or(0).max(0),
        };
        for (key, entry) in file.identities {
            let id = match key.parse::<GlobalId>() {
                Ok(id) if id > 0 => id,
                _ => {
                    tracing::warn!(key = %key, "Skipping gallery entry with invalid id");
                    continue;
                }
            };
            let Some(embedding) = entry.embedding.and_then(StoredVectors::into_vector) else {
                tracing::warn!(global_id = id, "Skipping gallery entry without embedding");
                continue;
            };
            let last_seen = entry
                .last_seen
                .and_then(epoch_to_datetime)
                .unwrap_or_else(Utc::now);

            gallery.max_id = gallery.max_id.max(id);
            gallery.entries.push(StoredEntry {
                id,
                embedding,
                last_seen,
            });
        }

        gallery.entries.sort_by_key(|e| e.id);
        Ok(gallery)
    }

    /// Write the gallery compactly (mean of each ring buffer) along with the
    /// id high-water mark. Written to a temp file then renamed over the target.
    pub fn save<'a>(
        &self,
        identities: impl IntoIterator<Item = &'a GlobalIdentity>,
        max_id: GlobalId,
    ) -> Result<usize> {
        let mut file = GalleryFile {
            max_id: Some(max_id),
            identities: BTreeMap::new(),
        };
        for identity in identities {
            let buffered: Vec<Vec<f32>> = identity.embeddings.iter().cloned().collect();
            let Some(vector) = mean_vector(&buffered).and_then(l2_normalize) else {
                continue;
            };
            file.identities.insert(
                identity.id.to_string(),
                StoredIdentity {
                    last_seen: Some(datetime_to_epoch(identity.last_seen)),
                    embedding: Some(StoredVectors::Single(vector)),
                },
            );
        }

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        fs::rename(&tmp, &self.path)?;

        Ok(file.identities.len())
    }
}

fn datetime_to_epoch(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt((secs * 1000.0) as i64).single()
}
