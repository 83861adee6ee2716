//! Epoch-boundary callbacks: scalar logging, validation with checkpointing,
//! and learning-rate reduction on plateau.
//!
//! Callbacks observe the fit loop through `on_epoch_end` and may hand back a
//! `CheckpointRequest`; the runner owns the actual persistence and upload, so
//! no callback talks to the snapshot store directly. Order matters: the
//! validation callback fills `val_loss` / `val_accuracy` into the epoch
//! metrics for the plateau reducer behind it.

use crate::error::MotionError;
use crate::evaluation::{self, VideoPredictions};
use crate::loader::BatchIter;
use crate::model::MotionModel;
use crate::snapshot::SnapshotName;
use crate::training::metrics::EpochMetrics;
use chrono::Utc;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Checkpoint the validation callback asks the runner to persist.
#[derive(Debug, Clone)]
pub struct CheckpointRequest {
    pub name: SnapshotName,
    pub predictions: VideoPredictions,
}

/// Mutable view of the run handed to each callback at an epoch boundary.
pub struct EpochContext<'a> {
    /// Zero-based epoch index that just finished.
    pub epoch: usize,
    pub metrics: &'a mut EpochMetrics,
    pub model: &'a mut MotionModel,
    /// Best video-level accuracy so far; mutated only by validation.
    pub best_accuracy: &'a mut f64,
}

pub trait TrainingCallback: Send {
    fn on_epoch_end(
        &mut self,
        cx: &mut EpochContext<'_>,
    ) -> Result<Option<CheckpointRequest>, MotionError>;
}

/// Appends one JSON line of scalars per epoch under a per-run directory.
pub struct ScalarLogCallback {
    scalars_path: PathBuf,
}

impl ScalarLogCallback {
    /// Creates `<logs_dir>/<run timestamp>/scalars.jsonl`.
    pub fn new(logs_dir: &Path) -> Result<Self, MotionError> {
        let run_dir = logs_dir.join(Utc::now().timestamp().to_string());
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self {
            scalars_path: run_dir.join("scalars.jsonl"),
        })
    }
}

impl TrainingCallback for ScalarLogCallback {
    fn on_epoch_end(
        &mut self,
        cx: &mut EpochContext<'_>,
    ) -> Result<Option<CheckpointRequest>, MotionError> {
        let line = serde_json::json!({
            "ts": Utc::now().to_rfc3339(),
            "epoch": cx.epoch,
            "loss": cx.metrics.train_loss,
            "lr": cx.metrics.learning_rate,
        });
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.scalars_path)?;
        writeln!(file, "{line}")?;
        Ok(None)
    }
}

/// Periodic evaluation over the test loader.
///
/// Every `validate_every` epochs this runs inference on the test split,
/// aggregates clip predictions to video level, and compares against the
/// session's best. A strict improvement updates the tracker and requests a
/// checkpoint named `(completed_epochs, new_best)`; anything else writes
/// nothing.
pub struct ValidationCallback {
    validate_every: usize,
    test_loader: Arc<dyn BatchIter>,
    test_video_labels: Vec<usize>,
    /// Trailing tag for snapshot names, typically the architecture.
    run_tag: String,
}

impl ValidationCallback {
    pub fn new(
        validate_every: usize,
        test_loader: Arc<dyn BatchIter>,
        test_video_labels: Vec<usize>,
        run_tag: impl Into<String>,
    ) -> Self {
        Self {
            validate_every: validate_every.max(1),
            test_loader,
            test_video_labels,
            run_tag: run_tag.into(),
        }
    }

    fn evaluate(&self, model: &MotionModel) -> Result<(f64, VideoPredictions), MotionError> {
        let mut clip_logits = Vec::new();
        let mut clip_videos = Vec::new();
        let mut loss_sum = 0.0;
        let mut clip_count = 0usize;
        for step in 0..self.test_loader.len() {
            let batch = self.test_loader.batch(step)?;
            let logits = model.predict_batch(&batch)?;
            for (l, &label) in logits.iter().zip(&batch.labels) {
                loss_sum += evaluation::sparse_categorical_cross_entropy(l, label);
            }
            clip_count += logits.len();
            clip_videos.extend_from_slice(&batch.video_ids);
            clip_logits.extend(logits);
        }
        if clip_count == 0 {
            return Err(MotionError::Evaluation("empty test loader".to_string()));
        }
        let predictions = evaluation::video_level_predictions(
            &clip_logits,
            &clip_videos,
            &self.test_video_labels,
        )?;
        Ok((loss_sum / clip_count as f64, predictions))
    }
}

impl TrainingCallback for ValidationCallback {
    fn on_epoch_end(
        &mut self,
        cx: &mut EpochContext<'_>,
    ) -> Result<Option<CheckpointRequest>, MotionError> {
        let completed = cx.epoch + 1;
        if completed % self.validate_every != 0 {
            return Ok(None);
        }
        let (val_loss, predictions) = self.evaluate(cx.model)?;
        cx.metrics.val_loss = Some(val_loss);
        cx.metrics.val_accuracy = Some(predictions.accuracy);
        tracing::info!(
            epoch = cx.epoch,
            val_loss,
            video_accuracy = predictions.accuracy,
            "validation"
        );
        if predictions.accuracy > *cx.best_accuracy {
            *cx.best_accuracy = predictions.accuracy;
            tracing::info!(best = predictions.accuracy, "Current Best");
            return Ok(Some(CheckpointRequest {
                name: SnapshotName::new(completed, predictions.accuracy, self.run_tag.clone()),
                predictions,
            }));
        }
        Ok(None)
    }
}

/// Lowers the learning rate after `patience` validation observations without
/// improvement in validation loss. Epochs without a validation pass do not
/// advance the wait counter.
pub struct ReduceLrOnPlateau {
    patience: usize,
    factor: f64,
    min_delta: f64,
    best: Option<f64>,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(patience: usize) -> Self {
        Self {
            patience: patience.max(1),
            factor: 0.1,
            min_delta: 1e-4,
            best: None,
            wait: 0,
        }
    }
}

impl TrainingCallback for ReduceLrOnPlateau {
    fn on_epoch_end(
        &mut self,
        cx: &mut EpochContext<'_>,
    ) -> Result<Option<CheckpointRequest>, MotionError> {
        let Some(val_loss) = cx.metrics.val_loss else {
            return Ok(None);
        };
        match self.best {
            Some(best) if val_loss < best - self.min_delta => {
                self.best = Some(val_loss);
                self.wait = 0;
            }
            Some(_) => {
                self.wait += 1;
                if self.wait >= self.patience {
                    let old = cx.model.learning_rate();
                    let new = old * self.factor;
                    cx.model.set_learning_rate(new);
                    cx.metrics.learning_rate = new;
                    self.wait = 0;
                    tracing::info!(epoch = cx.epoch, old_lr = old, new_lr = new, "plateau: reducing learning rate");
                }
            }
            None => self.best = Some(val_loss),
        }
        Ok(None)
    }
}
