//! End-to-end: fresh run on the synthetic loader, checkpoint upload on
//! improvement, then resume from the uploaded snapshot.

use motion_ml::config::{ArchitectureName, AugmenterLevel, MotionConfig, OptimizerKind};
use motion_ml::loader::SyntheticLoaderFactory;
use motion_ml::model::CustomObjects;
use motion_ml::snapshot::{DirStore, DriveManager};
use motion_ml::training::{FitOptions, SessionSource, Trainer};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(tmp: &Path) -> MotionConfig {
    MotionConfig {
        suffix: "e2e".to_string(),
        architecture: ArchitectureName::Resnet,
        optimizer: OptimizerKind::Adam,
        learning_rate: 0.2,
        pretrained: true,
        augmenter_level: AugmenterLevel::Light,
        epochs: 10,
        workers: 2,
        stacked_frames: 4,
        validate_every: 2,
        testing_samples_per_video: 2,
        num_actions: 2,
        logs_dir: tmp.join("logs").to_string_lossy().into_owned(),
        ..MotionConfig::default()
    }
}

fn test_factory(config: &MotionConfig) -> SyntheticLoaderFactory {
    SyntheticLoaderFactory {
        videos: 8,
        train_clips_per_video: 4,
        testing_samples_per_video: config.testing_samples_per_video,
        stacked_frames: config.stacked_frames,
        num_actions: config.num_actions,
        augmenter_level: config.augmenter_level,
        seed: 77,
    }
}

fn drive_for(tmp: &Path, config: &MotionConfig) -> DriveManager {
    DriveManager::new(
        config.experiment_identifier(),
        Arc::new(DirStore::new(tmp.join("store"))),
        tmp.join("motion.weights.json"),
        tmp.join("motion.preds.json"),
    )
}

#[tokio::test]
async fn fresh_run_then_resume_from_snapshot() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let factory = test_factory(&config);
    let objects = CustomObjects::standard();

    // --- fresh run ---
    let drive = drive_for(tmp.path(), &config);
    let source = SessionSource::detect(&drive).await.unwrap();
    assert!(matches!(source, SessionSource::Fresh));
    let mut session = source
        .resolve(&config, &factory, drive.weights_path(), &objects)
        .unwrap();
    assert_eq!(session.start_epoch, 0);
    assert_eq!(session.plateau_patience, config.validate_every * 10);

    let mut callbacks = session.standard_callbacks(&config).unwrap();
    let trainer = Trainer::new(
        drive,
        FitOptions {
            epochs: config.epochs,
            workers: config.workers,
        },
    );
    let metrics = trainer.fit(&mut session, &mut callbacks).await.unwrap();
    assert_eq!(metrics.epochs_completed, config.epochs);
    // validation ran on the configured cadence
    assert_eq!(
        metrics.val_accuracy_history.len(),
        config.epochs / config.validate_every
    );
    let best = session.best_accuracy;
    assert!(
        best > 0.0,
        "the synthetic split is learnable, best accuracy stayed at zero"
    );

    // --- resume ---
    let drive = drive_for(tmp.path(), &config);
    let source = SessionSource::detect(&drive).await.unwrap();
    let snapshot = match &source {
        SessionSource::Restored(name) => name.clone(),
        SessionSource::Fresh => panic!("expected an uploaded snapshot"),
    };
    assert_eq!(snapshot.accuracy, best);
    assert!(snapshot.epoch >= 1 && snapshot.epoch <= config.epochs);

    let session = source
        .resolve(&config, &factory, drive.weights_path(), &objects)
        .unwrap();
    assert_eq!(session.start_epoch, snapshot.epoch);
    assert_eq!(session.best_accuracy, best);
    assert_eq!(session.plateau_patience, config.validate_every);
}

#[tokio::test]
async fn resume_with_all_epochs_done_trains_nothing() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.epochs = 2;
    config.validate_every = 1;
    let factory = test_factory(&config);
    let objects = CustomObjects::standard();

    let drive = drive_for(tmp.path(), &config);
    let mut session = SessionSource::detect(&drive)
        .await
        .unwrap()
        .resolve(&config, &factory, drive.weights_path(), &objects)
        .unwrap();
    let mut callbacks = session.standard_callbacks(&config).unwrap();
    Trainer::new(
        drive,
        FitOptions {
            epochs: config.epochs,
            workers: config.workers,
        },
    )
    .fit(&mut session, &mut callbacks)
    .await
    .unwrap();

    // second run asks for no more epochs than the snapshot already covers
    let drive = drive_for(tmp.path(), &config);
    let source = SessionSource::detect(&drive).await.unwrap();
    if let SessionSource::Restored(name) = &source {
        let epochs_done = name.epoch;
        let mut session = source
            .resolve(&config, &factory, drive.weights_path(), &objects)
            .unwrap();
        let metrics = Trainer::new(
            drive,
            FitOptions {
                epochs: epochs_done,
                workers: 1,
            },
        )
        .fit(&mut session, &mut [])
        .await
        .unwrap();
        assert_eq!(metrics.epochs_completed, 0);
    }
}
