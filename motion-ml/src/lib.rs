//! # motion-ml — motion-stream training orchestration
//!
//! Drives training of a motion-stream action-recognition network: resolves
//! the experiment identifier, restores the latest snapshot from the store or
//! starts fresh, builds the frame-batch loaders, and runs the fit loop with
//! validation, checkpointing, and plateau learning-rate reduction.
//!
//! The convolutional backbones, the real optical-flow pipeline, and the real
//! cloud store sit behind trait seams (`LoaderFactory`, `SnapshotStore`);
//! deterministic in-crate implementations of both ship for driving and
//! testing the orchestration.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod experiment;
pub mod loader;
pub mod model;
pub mod persistence;
pub mod snapshot;
pub mod training;

pub use config::{ArchitectureName, AugmenterLevel, MotionConfig, OptimizerKind};
pub use error::MotionError;
pub use experiment::experiment_identifier;
pub use loader::{BatchIter, LoaderFactory, SyntheticLoaderFactory};
pub use model::{CustomObjects, MotionModel};
pub use snapshot::{DirStore, DriveManager, SnapshotName, SnapshotStore};
pub use training::{FitOptions, SessionSource, Trainer, TrainingSession};
