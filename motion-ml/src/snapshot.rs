//! Snapshot artifacts and the store they live in.
//!
//! An artifact name is the one persisted-state contract that must be honored
//! exactly: `"<epoch>-<best_accuracy>-<tag>"`, dash-delimited, with the epoch
//! parsed back as an integer and the accuracy as a float when a run resumes.

use crate::error::MotionError;
use crate::persistence;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Parsed form of a snapshot artifact name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotName {
    /// Epochs completed when the snapshot was taken.
    pub epoch: usize,
    /// Best video-level accuracy at that point.
    pub accuracy: f64,
    /// Free-form trailing tag, may be empty.
    pub tag: String,
}

impl SnapshotName {
    pub fn new(epoch: usize, accuracy: f64, tag: impl Into<String>) -> Self {
        Self {
            epoch,
            accuracy,
            tag: tag.into(),
        }
    }

    /// Parse `"<epoch>-<accuracy>-<tag>"`. A name whose two leading fields are
    /// missing or non-numeric marks a malformed remote artifact and is a fatal
    /// startup error, never a silent fresh start.
    pub fn parse(name: &str) -> Result<Self, MotionError> {
        let mut parts = name.splitn(3, '-');
        let epoch = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MotionError::snapshot(format!("malformed artifact name: {name:?}")))?
            .parse::<usize>()
            .map_err(|_| {
                MotionError::snapshot(format!("artifact {name:?}: epoch field is not an integer"))
            })?;
        let accuracy = parts
            .next()
            .ok_or_else(|| {
                MotionError::snapshot(format!("artifact {name:?}: missing accuracy field"))
            })?
            .parse::<f64>()
            .map_err(|_| {
                MotionError::snapshot(format!("artifact {name:?}: accuracy field is not a float"))
            })?;
        if !accuracy.is_finite() {
            return Err(MotionError::snapshot(format!(
                "artifact {name:?}: accuracy field is not finite"
            )));
        }
        let tag = parts.next().unwrap_or("").to_string();
        Ok(Self {
            epoch,
            accuracy,
            tag,
        })
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.is_empty() {
            write!(f, "{}-{}", self.epoch, self.accuracy)
        } else {
            write!(f, "{}-{}-{}", self.epoch, self.accuracy, self.tag)
        }
    }
}

/// Manifest entry for one stored snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub name: String,
    pub epoch: usize,
    pub accuracy: f64,
    /// SHA-256 of the weights file as uploaded.
    pub weights_hash: String,
    pub weights_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Remote store keyed by experiment identifier.
///
/// Supports exactly the two operations resume needs: find the latest artifact
/// for an identifier, and upload a new one that supersedes it.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot for the experiment (highest epoch), if any.
    async fn find_latest(&self, experiment_id: &str) -> Result<Option<SnapshotRecord>, MotionError>;

    /// Fetch the record's weights and prediction files to the given local paths.
    async fn download(
        &self,
        experiment_id: &str,
        record: &SnapshotRecord,
        weights_to: &Path,
        preds_to: &Path,
    ) -> Result<(), MotionError>;

    /// Store a new snapshot from local weights and prediction files.
    async fn upload(
        &self,
        experiment_id: &str,
        name: &SnapshotName,
        weights_from: &Path,
        preds_from: &Path,
    ) -> Result<SnapshotRecord, MotionError>;
}

/// Directory-backed snapshot store.
///
/// Layout: `<base>/<experiment_id>/manifest.json` plus one weights and one
/// predictions file per snapshot. Oldest snapshots are evicted past
/// `max_snapshots`.
pub struct DirStore {
    base_dir: PathBuf,
    max_snapshots: usize,
}

impl DirStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            max_snapshots: 5,
        }
    }

    pub fn with_max_snapshots(mut self, max_snapshots: usize) -> Self {
        self.max_snapshots = max_snapshots.max(1);
        self
    }

    fn manifest_path(&self, experiment_id: &str) -> PathBuf {
        self.base_dir.join(experiment_id).join("manifest.json")
    }

    fn weights_path(&self, experiment_id: &str, name: &str) -> PathBuf {
        self.base_dir
            .join(experiment_id)
            .join(format!("{name}.weights.json"))
    }

    fn preds_path(&self, experiment_id: &str, name: &str) -> PathBuf {
        self.base_dir
            .join(experiment_id)
            .join(format!("{name}.preds.json"))
    }

    fn load_manifest(&self, experiment_id: &str) -> Result<Vec<SnapshotRecord>, MotionError> {
        Ok(persistence::read_json(&self.manifest_path(experiment_id))?.unwrap_or_default())
    }
}

#[async_trait]
impl SnapshotStore for DirStore {
    async fn find_latest(
        &self,
        experiment_id: &str,
    ) -> Result<Option<SnapshotRecord>, MotionError> {
        let manifest = self.load_manifest(experiment_id)?;
        // manifest is in upload order: on an epoch tie the later upload wins
        Ok(manifest
            .into_iter()
            .fold(None::<SnapshotRecord>, |latest, record| match latest {
                Some(best) if best.epoch > record.epoch => Some(best),
                _ => Some(record),
            }))
    }

    async fn download(
        &self,
        experiment_id: &str,
        record: &SnapshotRecord,
        weights_to: &Path,
        preds_to: &Path,
    ) -> Result<(), MotionError> {
        let weights_from = self.weights_path(experiment_id, &record.name);
        if !weights_from.exists() {
            return Err(MotionError::not_found(format!(
                "weights for snapshot {}",
                record.name
            )));
        }
        std::fs::copy(&weights_from, weights_to)?;
        let preds_from = self.preds_path(experiment_id, &record.name);
        if preds_from.exists() {
            std::fs::copy(&preds_from, preds_to)?;
        }
        Ok(())
    }

    async fn upload(
        &self,
        experiment_id: &str,
        name: &SnapshotName,
        weights_from: &Path,
        preds_from: &Path,
    ) -> Result<SnapshotRecord, MotionError> {
        let dir = self.base_dir.join(experiment_id);
        std::fs::create_dir_all(&dir)?;

        let rendered = name.to_string();
        let weights = std::fs::read(weights_from)?;
        let mut hasher = Sha256::new();
        hasher.update(&weights);
        let weights_hash = format!("{:x}", hasher.finalize());

        persistence::write_bytes(&self.weights_path(experiment_id, &rendered), &weights)?;
        if preds_from.exists() {
            let preds = std::fs::read(preds_from)?;
            persistence::write_bytes(&self.preds_path(experiment_id, &rendered), &preds)?;
        }

        let record = SnapshotRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: rendered,
            epoch: name.epoch,
            accuracy: name.accuracy,
            weights_bytes: weights.len() as u64,
            weights_hash,
            created_at: Utc::now(),
        };

        let mut manifest = self.load_manifest(experiment_id)?;
        manifest.push(record.clone());
        while manifest.len() > self.max_snapshots {
            let evicted = manifest.remove(0);
            let _ = std::fs::remove_file(self.weights_path(experiment_id, &evicted.name));
            let _ = std::fs::remove_file(self.preds_path(experiment_id, &evicted.name));
        }
        persistence::write_json(&self.manifest_path(experiment_id), &manifest)?;

        Ok(record)
    }
}

/// Front door to the snapshot store for one experiment.
///
/// Owns the experiment identifier and the fixed local file paths the rest of
/// the process reads and writes.
pub struct DriveManager {
    experiment_id: String,
    store: std::sync::Arc<dyn SnapshotStore>,
    weights_path: PathBuf,
    preds_path: PathBuf,
}

impl DriveManager {
    pub fn new(
        experiment_id: String,
        store: std::sync::Arc<dyn SnapshotStore>,
        weights_path: PathBuf,
        preds_path: PathBuf,
    ) -> Self {
        Self {
            experiment_id,
            store,
            weights_path,
            preds_path,
        }
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    pub fn preds_path(&self) -> &Path {
        &self.preds_path
    }

    /// Query the store for this experiment's latest snapshot. When one exists
    /// its weights and prediction files are downloaded to the local paths and
    /// the parsed name is returned; `None` selects the fresh-start branch.
    pub async fn get_latest_snapshot(&self) -> Result<Option<SnapshotName>, MotionError> {
        let Some(record) = self.store.find_latest(&self.experiment_id).await? else {
            return Ok(None);
        };
        let name = SnapshotName::parse(&record.name)?;
        self.store
            .download(
                &self.experiment_id,
                &record,
                &self.weights_path,
                &self.preds_path,
            )
            .await?;
        tracing::info!(
            experiment = %self.experiment_id,
            snapshot = %record.name,
            "snapshot downloaded"
        );
        Ok(Some(name))
    }

    /// Upload the local weights and prediction files as a new snapshot,
    /// superseding the previous latest for this experiment.
    pub async fn upload_snapshot(&self, name: &SnapshotName) -> Result<SnapshotRecord, MotionError> {
        let record = self
            .store
            .upload(
                &self.experiment_id,
                name,
                &self.weights_path,
                &self.preds_path,
            )
            .await?;
        tracing::info!(
            experiment = %self.experiment_id,
            snapshot = %record.name,
            bytes = record.weights_bytes,
            "snapshot uploaded"
        );
        Ok(record)
    }
}
