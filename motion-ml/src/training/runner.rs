//! The fit loop.
//!
//! One awaited call trains from the session's start epoch to the configured
//! total. Batches are prefetched by a pool of worker tasks claiming step
//! indices off a shared counter, so each step consumes exactly one complete
//! batch with no ordering requirement between workers.

use crate::error::MotionError;
use crate::persistence;
use crate::snapshot::DriveManager;
use crate::training::callbacks::{EpochContext, TrainingCallback};
use crate::training::metrics::{EpochMetrics, TrainingMetrics};
use crate::training::session::TrainingSession;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    /// Total epochs, counting any the session already completed.
    pub epochs: usize,
    /// Prefetch worker tasks.
    pub workers: usize,
}

pub struct Trainer {
    drive: DriveManager,
    options: FitOptions,
}

impl Trainer {
    pub fn new(drive: DriveManager, options: FitOptions) -> Self {
        Self { drive, options }
    }

    /// Run training to completion. Checkpoint requests coming back from the
    /// callbacks are persisted here: weights and predictions to their fixed
    /// local paths, then uploaded as the experiment's new latest snapshot.
    pub async fn fit(
        &self,
        session: &mut TrainingSession,
        callbacks: &mut [Box<dyn TrainingCallback>],
    ) -> Result<TrainingMetrics, MotionError> {
        let steps = session.train_loader.len();
        if steps == 0 {
            return Err(MotionError::training("training loader has no batches"));
        }
        let workers = self.options.workers.max(1);
        let mut metrics = TrainingMetrics::default();
        if session.start_epoch >= self.options.epochs {
            tracing::warn!(
                start_epoch = session.start_epoch,
                epochs = self.options.epochs,
                "nothing to train, snapshot already covers all epochs"
            );
            return Ok(metrics);
        }
        tracing::info!(
            steps_per_epoch = steps,
            workers,
            start_epoch = session.start_epoch,
            epochs = self.options.epochs,
            "fit"
        );

        let started = Instant::now();
        for epoch in session.start_epoch..self.options.epochs {
            let train_loss = self.run_epoch(session, steps, workers).await?;

            let mut epoch_metrics = EpochMetrics {
                epoch,
                train_loss,
                val_loss: None,
                val_accuracy: None,
                learning_rate: session.model.learning_rate(),
            };
            let mut request = None;
            for callback in callbacks.iter_mut() {
                let mut cx = EpochContext {
                    epoch,
                    metrics: &mut epoch_metrics,
                    model: &mut session.model,
                    best_accuracy: &mut session.best_accuracy,
                };
                if let Some(r) = callback.on_epoch_end(&mut cx)? {
                    request = Some(r);
                }
            }
            if let Some(request) = request {
                session.model.save(self.drive.weights_path())?;
                persistence::write_json(self.drive.preds_path(), &request.predictions)?;
                self.drive.upload_snapshot(&request.name).await?;
            }
            tracing::debug!(epoch, loss = epoch_metrics.train_loss, "epoch complete");
            metrics.record(&epoch_metrics);
        }
        metrics.total_training_time_secs = started.elapsed().as_secs_f64();
        Ok(metrics)
    }

    /// One pass over the training loader; returns the mean step loss.
    async fn run_epoch(
        &self,
        session: &mut TrainingSession,
        steps: usize,
        workers: usize,
    ) -> Result<f64, MotionError> {
        let (tx, mut rx) = mpsc::channel(workers * 2);
        let next_step = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let loader = Arc::clone(&session.train_loader);
            let next_step = Arc::clone(&next_step);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let step = next_step.fetch_add(1, Ordering::Relaxed);
                    if step >= steps {
                        break;
                    }
                    // a closed channel means the consumer bailed; just stop
                    if tx.send(loader.batch(step)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut loss_sum = 0.0;
        let mut consumed = 0usize;
        while let Some(batch) = rx.recv().await {
            loss_sum += session.model.train_step(&batch?)?;
            consumed += 1;
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| MotionError::training(format!("prefetch worker panicked: {e}")))?;
        }
        if consumed != steps {
            return Err(MotionError::training(format!(
                "epoch consumed {consumed} of {steps} batches"
            )));
        }
        Ok(loss_sum / steps as f64)
    }
}
