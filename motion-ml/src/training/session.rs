//! Session resolution — one abstraction over the restore and fresh-start
//! branches, both converging on the same training-ready tuple.

use crate::config::MotionConfig;
use crate::error::MotionError;
use crate::loader::{BatchIter, LoaderFactory};
use crate::model::{CustomObjects, MotionModel};
use crate::snapshot::{DriveManager, SnapshotName};
use crate::training::callbacks::{
    ReduceLrOnPlateau, ScalarLogCallback, TrainingCallback, ValidationCallback,
};
use std::path::Path;
use std::sync::Arc;

/// Everything the fit loop needs, regardless of which branch produced it.
pub struct TrainingSession {
    pub model: MotionModel,
    pub train_loader: Arc<dyn BatchIter>,
    pub test_loader: Arc<dyn BatchIter>,
    pub test_video_labels: Vec<usize>,
    /// Epochs already completed; the fit loop starts here and skips the rest.
    pub start_epoch: usize,
    /// Best video-level accuracy, owned by the session and mutated only
    /// through the validation callback.
    pub best_accuracy: f64,
    /// Plateau patience, asymmetric between the two branches.
    pub plateau_patience: usize,
}

impl TrainingSession {
    /// The standard ordered callback list: scalar logger, validation with
    /// checkpointing, then the plateau reducer reading what validation wrote.
    pub fn standard_callbacks(
        &self,
        config: &MotionConfig,
    ) -> Result<Vec<Box<dyn TrainingCallback>>, MotionError> {
        Ok(vec![
            Box::new(ScalarLogCallback::new(Path::new(&config.logs_dir))?),
            Box::new(ValidationCallback::new(
                config.validate_every,
                Arc::clone(&self.test_loader),
                self.test_video_labels.clone(),
                config.architecture.to_string(),
            )),
            Box::new(ReduceLrOnPlateau::new(self.plateau_patience)),
        ])
    }
}

/// Which branch a run takes, decided by the snapshot store.
pub enum SessionSource {
    /// A snapshot exists; its weights are already downloaded locally.
    Restored(SnapshotName),
    Fresh,
}

impl SessionSource {
    /// Ask the store for the latest snapshot. Store errors are fatal here;
    /// an empty result is simply the fresh branch.
    pub async fn detect(drive: &DriveManager) -> Result<Self, MotionError> {
        match drive.get_latest_snapshot().await? {
            Some(name) => Ok(Self::Restored(name)),
            None => Ok(Self::Fresh),
        }
    }

    /// Produce the session. Restored runs resume at the snapshot's epoch with
    /// its best accuracy and a short plateau patience; fresh runs start at
    /// epoch zero with a ten-fold patience, since they are far from converged.
    pub fn resolve(
        self,
        config: &MotionConfig,
        factory: &dyn LoaderFactory,
        weights_path: &Path,
        objects: &CustomObjects,
    ) -> Result<TrainingSession, MotionError> {
        match self {
            Self::Restored(name) => {
                let model = MotionModel::restore(weights_path, objects)?;
                tracing::info!(epoch = name.epoch, "Model restored");
                tracing::info!(best = name.accuracy, "Current Best");
                let loader = model.loader_config();
                let (train_loader, test_loader, test_video_labels) =
                    factory.run(loader.width, loader.height, loader.batch_size)?;
                Ok(TrainingSession {
                    model,
                    train_loader,
                    test_loader,
                    test_video_labels,
                    start_epoch: name.epoch,
                    best_accuracy: name.accuracy,
                    plateau_patience: config.validate_every,
                })
            }
            Self::Fresh => {
                tracing::info!("Starting from scratch");
                let model = MotionModel::fresh(
                    config.architecture,
                    config.num_actions,
                    config.low_memory,
                    config.pretrained,
                    config.stacked_frames,
                    config.optimizer,
                    config.learning_rate,
                    objects,
                )?;
                for line in model.summary().lines() {
                    tracing::info!("{line}");
                }
                let loader = model.loader_config();
                let (train_loader, test_loader, test_video_labels) =
                    factory.run(loader.width, loader.height, loader.batch_size)?;
                Ok(TrainingSession {
                    model,
                    train_loader,
                    test_loader,
                    test_video_labels,
                    start_epoch: 0,
                    best_accuracy: 0.0,
                    plateau_patience: config.validate_every * 10,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchitectureName, AugmenterLevel, OptimizerKind};
    use crate::loader::SyntheticLoaderFactory;
    use crate::snapshot::DirStore;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config() -> MotionConfig {
        MotionConfig {
            architecture: ArchitectureName::Resnet,
            optimizer: OptimizerKind::Adam,
            augmenter_level: AugmenterLevel::Light,
            stacked_frames: 4,
            num_actions: 3,
            validate_every: 2,
            ..MotionConfig::default()
        }
    }

    fn factory(config: &MotionConfig) -> SyntheticLoaderFactory {
        SyntheticLoaderFactory {
            videos: 6,
            train_clips_per_video: 2,
            testing_samples_per_video: 2,
            stacked_frames: config.stacked_frames,
            num_actions: config.num_actions,
            augmenter_level: config.augmenter_level,
            seed: 3,
        }
    }

    #[tokio::test]
    async fn test_no_snapshot_selects_fresh_branch() {
        let tmp = TempDir::new().unwrap();
        let config = config();
        let drive = DriveManager::new(
            "exp".to_string(),
            Arc::new(DirStore::new(tmp.path().join("store"))),
            tmp.path().join("w.json"),
            tmp.path().join("p.json"),
        );
        let source = SessionSource::detect(&drive).await.unwrap();
        assert!(matches!(source, SessionSource::Fresh));

        let session = source
            .resolve(
                &config,
                &factory(&config),
                drive.weights_path(),
                &CustomObjects::standard(),
            )
            .unwrap();
        assert_eq!(session.start_epoch, 0);
        assert_eq!(session.best_accuracy, 0.0);
        assert_eq!(session.plateau_patience, config.validate_every * 10);
        // architecture-specific loader config drives the batch layout
        let batch = session.train_loader.batch(0).unwrap();
        assert_eq!(batch.width, 224);
    }

    #[tokio::test]
    async fn test_found_snapshot_restores_epoch_and_best() {
        let tmp = TempDir::new().unwrap();
        let config = config();
        let weights = tmp.path().join("w.json");
        let preds = tmp.path().join("p.json");
        std::fs::write(&preds, b"{}").unwrap();

        // seed the store with a snapshot named 5-0.72-foo
        let model = MotionModel::fresh(
            config.architecture,
            config.num_actions,
            false,
            true,
            config.stacked_frames,
            OptimizerKind::Adam,
            config.learning_rate,
            &CustomObjects::standard(),
        )
        .unwrap();
        model.save(&weights).unwrap();
        let store = Arc::new(DirStore::new(tmp.path().join("store")));
        let drive = DriveManager::new("exp".to_string(), store, weights.clone(), preds);
        drive
            .upload_snapshot(&SnapshotName::new(5, 0.72, "foo"))
            .await
            .unwrap();
        std::fs::remove_file(&weights).unwrap();

        let source = SessionSource::detect(&drive).await.unwrap();
        let session = source
            .resolve(
                &config,
                &factory(&config),
                drive.weights_path(),
                &CustomObjects::standard(),
            )
            .unwrap();
        assert_eq!(session.start_epoch, 5);
        assert_eq!(session.best_accuracy, 0.72);
        assert_eq!(session.plateau_patience, config.validate_every);
    }
}
