//! Training infrastructure — session resolution, the fit loop, callbacks,
//! and metric history.

pub mod callbacks;
pub mod metrics;
pub mod runner;
pub mod session;

pub use callbacks::{
    CheckpointRequest, EpochContext, ReduceLrOnPlateau, ScalarLogCallback, TrainingCallback,
    ValidationCallback,
};
pub use metrics::{EpochMetrics, TrainingMetrics};
pub use runner::{FitOptions, Trainer};
pub use session::{SessionSource, TrainingSession};
