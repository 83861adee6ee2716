//! Motion-stream model variants, compile settings, and snapshot restore.
//!
//! The convolutional backbone itself is out of scope here; the model keeps a
//! trainable linear readout over per-channel clip features, which is enough
//! state for the orchestration layer to exercise real optimizer updates,
//! loss curves, and weight round-trips through snapshots.

use crate::config::{ArchitectureName, OptimizerKind};
use crate::error::MotionError;
use crate::evaluation::{self, LossFn, MetricFn};
use crate::loader::ClipBatch;
use crate::persistence;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

pub const LOSS_SPARSE_CE: &str = "sparse_categorical_cross_entropy_loss";
pub const METRIC_TOP_1: &str = "acc_top_1";
pub const METRIC_TOP_5: &str = "acc_top_5";

/// Loader parameters an architecture dictates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub width: usize,
    pub height: usize,
    pub batch_size: usize,
}

impl ArchitectureName {
    /// Square input edge expected by the backbone.
    pub fn input_size(&self) -> usize {
        match self {
            Self::Resnet => 224,
            Self::Xception => 299,
        }
    }

    /// Largest batch that fits; halved on low-memory hardware.
    pub fn batch_size(&self, low_memory: bool) -> usize {
        let full = match self {
            Self::Resnet => 32,
            Self::Xception => 16,
        };
        if low_memory { full / 2 } else { full }
    }

    pub fn loader_config(&self, low_memory: bool) -> LoaderConfig {
        LoaderConfig {
            width: self.input_size(),
            height: self.input_size(),
            batch_size: self.batch_size(low_memory),
        }
    }
}

/// Optimizer with its full per-weight state, serialized into every snapshot
/// so a restored run continues exactly where the last one stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerState {
    Adam {
        lr: f64,
        beta_1: f64,
        beta_2: f64,
        epsilon: f64,
        step: u64,
        m: Vec<f64>,
        v: Vec<f64>,
    },
    Sgd {
        lr: f64,
        momentum: f64,
        velocity: Vec<f64>,
    },
}

impl OptimizerState {
    pub fn new(kind: OptimizerKind, lr: f64) -> Self {
        match kind {
            OptimizerKind::Adam => Self::Adam {
                lr,
                beta_1: 0.9,
                beta_2: 0.999,
                epsilon: 1e-8,
                step: 0,
                m: Vec::new(),
                v: Vec::new(),
            },
            OptimizerKind::Sgd => Self::Sgd {
                lr,
                momentum: 0.9,
                velocity: Vec::new(),
            },
        }
    }

    pub fn lr(&self) -> f64 {
        match self {
            Self::Adam { lr, .. } | Self::Sgd { lr, .. } => *lr,
        }
    }

    pub fn set_lr(&mut self, new_lr: f64) {
        match self {
            Self::Adam { lr, .. } | Self::Sgd { lr, .. } => *lr = new_lr,
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        match self {
            Self::Adam { .. } => OptimizerKind::Adam,
            Self::Sgd { .. } => OptimizerKind::Sgd,
        }
    }

    /// One update step in-place.
    fn apply(&mut self, weights: &mut [f64], grads: &[f64]) {
        match self {
            Self::Adam {
                lr,
                beta_1,
                beta_2,
                epsilon,
                step,
                m,
                v,
            } => {
                if m.len() != weights.len() {
                    m.resize(weights.len(), 0.0);
                    v.resize(weights.len(), 0.0);
                }
                *step += 1;
                let t = *step as f64;
                for i in 0..weights.len() {
                    m[i] = *beta_1 * m[i] + (1.0 - *beta_1) * grads[i];
                    v[i] = *beta_2 * v[i] + (1.0 - *beta_2) * grads[i] * grads[i];
                    let m_hat = m[i] / (1.0 - beta_1.powf(t));
                    let v_hat = v[i] / (1.0 - beta_2.powf(t));
                    weights[i] -= *lr * m_hat / (v_hat.sqrt() + *epsilon);
                }
            }
            Self::Sgd {
                lr,
                momentum,
                velocity,
            } => {
                if velocity.len() != weights.len() {
                    velocity.resize(weights.len(), 0.0);
                }
                for i in 0..weights.len() {
                    velocity[i] = *momentum * velocity[i] - *lr * grads[i];
                    weights[i] += velocity[i];
                }
            }
        }
    }
}

/// Loss and metric names the model was compiled with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileSettings {
    pub optimizer: OptimizerState,
    pub loss: String,
    pub metrics: Vec<String>,
}

impl CompileSettings {
    pub fn standard(kind: OptimizerKind, lr: f64) -> Self {
        Self {
            optimizer: OptimizerState::new(kind, lr),
            loss: LOSS_SPARSE_CE.to_string(),
            metrics: vec![METRIC_TOP_1.to_string(), METRIC_TOP_5.to_string()],
        }
    }
}

/// Everything a snapshot persists about the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub architecture: ArchitectureName,
    pub num_classes: usize,
    pub stacked_frames: usize,
    pub input_width: usize,
    pub input_height: usize,
    pub batch_size: usize,
    pub weights: Vec<f64>,
    pub compile: CompileSettings,
}

/// Registry of custom loss and metric functions, resolved by name when a
/// snapshot is deserialized.
pub struct CustomObjects {
    losses: HashMap<String, LossFn>,
    metrics: HashMap<String, MetricFn>,
}

impl CustomObjects {
    pub fn empty() -> Self {
        Self {
            losses: HashMap::new(),
            metrics: HashMap::new(),
        }
    }

    /// The three objects every motion model is compiled with.
    pub fn standard() -> Self {
        let mut objects = Self::empty();
        objects.register_loss(LOSS_SPARSE_CE, evaluation::sparse_categorical_cross_entropy);
        objects.register_metric(METRIC_TOP_1, evaluation::acc_top_1);
        objects.register_metric(METRIC_TOP_5, evaluation::acc_top_5);
        objects
    }

    pub fn register_loss(&mut self, name: &str, f: LossFn) {
        self.losses.insert(name.to_string(), f);
    }

    pub fn register_metric(&mut self, name: &str, f: MetricFn) {
        self.metrics.insert(name.to_string(), f);
    }

    fn resolve(&self, compile: &CompileSettings) -> Result<LossFn, MotionError> {
        let loss = self
            .losses
            .get(&compile.loss)
            .copied()
            .ok_or_else(|| MotionError::model(format!("unknown loss {:?}", compile.loss)))?;
        for metric in &compile.metrics {
            if !self.metrics.contains_key(metric) {
                return Err(MotionError::model(format!("unknown metric {metric:?}")));
            }
        }
        Ok(loss)
    }
}

/// A compiled motion-stream model.
pub struct MotionModel {
    state: ModelState,
    loss: LossFn,
}

impl MotionModel {
    /// Build and compile a fresh model for one of the two architecture
    /// variants. Pretrained initialization is a fixed deterministic seed per
    /// architecture; from-scratch draws a fresh seed.
    pub fn fresh(
        architecture: ArchitectureName,
        num_classes: usize,
        low_memory: bool,
        pretrained: bool,
        stacked_frames: usize,
        optimizer: OptimizerKind,
        lr: f64,
        objects: &CustomObjects,
    ) -> Result<Self, MotionError> {
        let loader = architecture.loader_config(low_memory);
        let n_params = num_classes * (stacked_frames + 1);
        let mut rng = if pretrained {
            StdRng::seed_from_u64(match architecture {
                ArchitectureName::Resnet => 0x5e50,
                ArchitectureName::Xception => 0xce97,
            })
        } else {
            StdRng::from_entropy()
        };
        let scale = 1.0 / (stacked_frames as f64).sqrt();
        let weights = (0..n_params)
            .map(|_| rng.gen_range(-scale..scale))
            .collect();
        let compile = CompileSettings::standard(optimizer, lr);
        let state = ModelState {
            architecture,
            num_classes,
            stacked_frames,
            input_width: loader.width,
            input_height: loader.height,
            batch_size: loader.batch_size,
            weights,
            compile,
        };
        let loss = objects.resolve(&state.compile)?;
        Ok(Self { state, loss })
    }

    /// Deserialize model and optimizer state from a downloaded weights file,
    /// rebinding custom loss and metric functions by name.
    pub fn restore(path: &Path, objects: &CustomObjects) -> Result<Self, MotionError> {
        let state: ModelState = persistence::read_json(path)?
            .ok_or_else(|| MotionError::not_found(format!("weights file {}", path.display())))?;
        let expected = state.num_classes * (state.stacked_frames + 1);
        if state.weights.len() != expected {
            return Err(MotionError::model(format!(
                "weights file holds {} parameters, expected {expected}",
                state.weights.len()
            )));
        }
        let loss = objects.resolve(&state.compile)?;
        Ok(Self { state, loss })
    }

    /// Persist the full model and optimizer state.
    pub fn save(&self, path: &Path) -> Result<(), MotionError> {
        persistence::write_json(path, &self.state)
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// Loader parameters for this model, from its recorded input shape.
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            width: self.state.input_width,
            height: self.state.input_height,
            batch_size: self.state.batch_size,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.state.compile.optimizer.lr()
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.state.compile.optimizer.set_lr(lr);
    }

    /// Textual structure summary, logged at startup.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "motion model: {}", self.state.architecture);
        let _ = writeln!(
            out,
            "  input: {}x{}x{} (stacked flow frames)",
            self.state.input_width, self.state.input_height, self.state.stacked_frames
        );
        let _ = writeln!(
            out,
            "  readout: {} classes, {} trainable parameters",
            self.state.num_classes,
            self.state.weights.len()
        );
        let _ = writeln!(
            out,
            "  optimizer: {:?} (lr {}), loss {}, metrics {:?}",
            self.state.compile.optimizer.kind(),
            self.learning_rate(),
            self.state.compile.loss,
            self.state.compile.metrics
        );
        out
    }

    /// Per-channel mean features for one clip.
    fn clip_features(&self, clip: &[f32]) -> Result<Vec<f64>, MotionError> {
        let stacked = self.state.stacked_frames;
        if stacked == 0 || clip.len() % stacked != 0 {
            return Err(MotionError::model(format!(
                "clip of {} values does not divide into {stacked} stacked frames",
                clip.len()
            )));
        }
        let channel = clip.len() / stacked;
        Ok((0..stacked)
            .map(|c| {
                let slice = &clip[c * channel..(c + 1) * channel];
                slice.iter().map(|&p| p as f64).sum::<f64>() / channel as f64
            })
            .collect())
    }

    fn logits(&self, features: &[f64]) -> Vec<f64> {
        let row = self.state.stacked_frames + 1;
        (0..self.state.num_classes)
            .map(|k| {
                let w = &self.state.weights[k * row..(k + 1) * row];
                let bias = w[row - 1];
                bias
                    + w[..row - 1]
                        .iter()
                        .zip(features)
                        .map(|(wi, fi)| wi * fi)
                        .sum::<f64>()
            })
            .collect()
    }

    fn check_batch(&self, batch: &ClipBatch) -> Result<(), MotionError> {
        if batch.stacked_frames != self.state.stacked_frames {
            return Err(MotionError::model(format!(
                "batch stacks {} frames, model expects {}",
                batch.stacked_frames, self.state.stacked_frames
            )));
        }
        if batch.clips.len() != batch.labels.len() {
            return Err(MotionError::model(
                "batch clips and labels out of step".to_string(),
            ));
        }
        Ok(())
    }

    /// Inference over a batch, one logit vector per clip.
    pub fn predict_batch(&self, batch: &ClipBatch) -> Result<Vec<Vec<f64>>, MotionError> {
        self.check_batch(batch)?;
        batch
            .clips
            .iter()
            .map(|clip| Ok(self.logits(&self.clip_features(clip)?)))
            .collect()
    }

    /// One optimizer step on a batch; returns the mean batch loss.
    pub fn train_step(&mut self, batch: &ClipBatch) -> Result<f64, MotionError> {
        self.check_batch(batch)?;
        if batch.clips.is_empty() {
            return Err(MotionError::training("empty training batch".to_string()));
        }
        let row = self.state.stacked_frames + 1;
        let mut grads = vec![0.0; self.state.weights.len()];
        let mut total_loss = 0.0;
        for (clip, &label) in batch.clips.iter().zip(&batch.labels) {
            let features = self.clip_features(clip)?;
            let logits = self.logits(&features);
            total_loss += (self.loss)(&logits, label);
            let probs = evaluation::softmax(&logits);
            for k in 0..self.state.num_classes {
                let g = probs[k] - if k == label { 1.0 } else { 0.0 };
                let base = k * row;
                for (c, f) in features.iter().enumerate() {
                    grads[base + c] += g * f;
                }
                grads[base + row - 1] += g;
            }
        }
        let n = batch.clips.len() as f64;
        for g in &mut grads {
            *g /= n;
        }
        self.state
            .compile
            .optimizer
            .apply(&mut self.state.weights, &grads);
        Ok(total_loss / n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn tiny_batch(stacked: usize, labels: &[usize]) -> ClipBatch {
        let channel = 4;
        ClipBatch {
            width: 2,
            height: 2,
            stacked_frames: stacked,
            clips: labels
                .iter()
                .map(|&l| vec![l as f32 * 0.5; stacked * channel])
                .collect(),
            labels: labels.to_vec(),
            video_ids: (0..labels.len()).collect(),
        }
    }

    #[test]
    fn test_loader_configs_per_architecture() {
        assert_eq!(
            ArchitectureName::Resnet.loader_config(false),
            LoaderConfig {
                width: 224,
                height: 224,
                batch_size: 32
            }
        );
        assert_eq!(
            ArchitectureName::Xception.loader_config(true),
            LoaderConfig {
                width: 299,
                height: 299,
                batch_size: 8
            }
        );
    }

    #[test]
    fn test_fresh_model_shapes() {
        let model = MotionModel::fresh(
            ArchitectureName::Xception,
            10,
            false,
            true,
            10,
            OptimizerKind::Adam,
            1e-5,
            &CustomObjects::standard(),
        )
        .unwrap();
        assert_eq!(model.state().weights.len(), 10 * 11);
        assert_eq!(model.loader_config().batch_size, 16);
        assert_eq!(model.learning_rate(), 1e-5);
    }

    #[test]
    fn test_pretrained_init_is_deterministic() {
        let objects = CustomObjects::standard();
        let a = MotionModel::fresh(
            ArchitectureName::Resnet,
            5,
            false,
            true,
            4,
            OptimizerKind::Sgd,
            0.01,
            &objects,
        )
        .unwrap();
        let b = MotionModel::fresh(
            ArchitectureName::Resnet,
            5,
            false,
            true,
            4,
            OptimizerKind::Sgd,
            0.01,
            &objects,
        )
        .unwrap();
        assert_eq!(a.state().weights, b.state().weights);
    }

    #[test]
    fn test_train_step_reduces_loss() {
        let objects = CustomObjects::standard();
        let mut model = MotionModel::fresh(
            ArchitectureName::Resnet,
            3,
            false,
            true,
            2,
            OptimizerKind::Sgd,
            0.5,
            &objects,
        )
        .unwrap();
        let batch = tiny_batch(2, &[0, 1, 2]);
        let first = model.train_step(&batch).unwrap();
        let mut last = first;
        for _ in 0..50 {
            last = model.train_step(&batch).unwrap();
        }
        assert!(last < first, "loss did not improve: {first} -> {last}");
    }

    #[test]
    fn test_save_restore_roundtrip_preserves_optimizer() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("weights.json");
        let objects = CustomObjects::standard();
        let mut model = MotionModel::fresh(
            ArchitectureName::Xception,
            4,
            true,
            true,
            3,
            OptimizerKind::Adam,
            1e-3,
            &objects,
        )
        .unwrap();
        model.train_step(&tiny_batch(3, &[0, 1])).unwrap();
        model.set_learning_rate(1e-4);
        model.save(&path).unwrap();

        let restored = MotionModel::restore(&path, &objects).unwrap();
        assert_eq!(restored.state().weights, model.state().weights);
        assert_eq!(restored.learning_rate(), 1e-4);
        assert_eq!(restored.loader_config(), model.loader_config());
        match &restored.state().compile.optimizer {
            OptimizerState::Adam { step, m, .. } => {
                assert_eq!(*step, 1);
                assert_eq!(m.len(), restored.state().weights.len());
            }
            other => panic!("expected adam state, got {other:?}"),
        }
    }

    #[test]
    fn test_restore_rejects_unknown_custom_objects() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("weights.json");
        let model = MotionModel::fresh(
            ArchitectureName::Resnet,
            2,
            false,
            true,
            2,
            OptimizerKind::Adam,
            1e-3,
            &CustomObjects::standard(),
        )
        .unwrap();
        model.save(&path).unwrap();

        let err = MotionModel::restore(&path, &CustomObjects::empty());
        assert!(matches!(err, Err(MotionError::Model(_))));
    }
}
