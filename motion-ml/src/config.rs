//! Configuration for a motion stream training run.
//!
//! Defaults are compiled in; a TOML file can override any subset of fields.
//! The configuration is loaded once at startup and never mutated afterwards.

use crate::error::MotionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Network architecture for the motion stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchitectureName {
    Resnet,
    Xception,
}

impl fmt::Display for ArchitectureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resnet => write!(f, "resnet"),
            Self::Xception => write!(f, "xception"),
        }
    }
}

/// Optimizer selection. Adam and SGD are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

/// How aggressively training clips are augmented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmenterLevel {
    None,
    Light,
    Heavy,
}

impl AugmenterLevel {
    /// Short text used inside the experiment identifier.
    pub fn text(&self) -> &'static str {
        match self {
            Self::None => "noaug",
            Self::Light => "light",
            Self::Heavy => "heavy",
        }
    }

    /// Amplitude of the per-pixel jitter applied by the loader.
    pub fn jitter(&self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::Light => 0.05,
            Self::Heavy => 0.15,
        }
    }
}

/// Static hyperparameters for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Free-form tag prefixed to the experiment identifier.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    #[serde(default = "default_architecture")]
    pub architecture: ArchitectureName,
    #[serde(default = "default_optimizer")]
    pub optimizer: OptimizerKind,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Initialize fresh models from pretrained weights rather than random.
    #[serde(default = "default_true")]
    pub pretrained: bool,
    #[serde(default = "default_augmenter_level")]
    pub augmenter_level: AugmenterLevel,
    /// Total epochs, including any already completed by a restored snapshot.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Parallel prefetch workers feeding the fit loop.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Optical-flow frames stacked into one input clip.
    #[serde(default = "default_stacked_frames")]
    pub stacked_frames: usize,
    /// Validation cadence, in epochs.
    #[serde(default = "default_validate_every")]
    pub validate_every: usize,
    /// Clips sampled per video on the evaluation split.
    #[serde(default = "default_testing_samples")]
    pub testing_samples_per_video: usize,
    /// Number of action classes.
    #[serde(default = "default_num_actions")]
    pub num_actions: usize,
    /// Halve the per-architecture batch size for memory-constrained hardware.
    #[serde(default)]
    pub low_memory: bool,
    /// Append-only text log written for the life of the process.
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// Local weights file, written on checkpoint and read on restore.
    #[serde(default = "default_weights_file")]
    pub weights_file: String,
    /// Local prediction log uploaded alongside the weights.
    #[serde(default = "default_preds_file")]
    pub preds_file: String,
    /// Directory backing the snapshot store.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
    /// Per-run scalar logs land under `<logs_dir>/<run timestamp>/`.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            architecture: default_architecture(),
            optimizer: default_optimizer(),
            learning_rate: default_learning_rate(),
            pretrained: true,
            augmenter_level: default_augmenter_level(),
            epochs: default_epochs(),
            workers: default_workers(),
            stacked_frames: default_stacked_frames(),
            validate_every: default_validate_every(),
            testing_samples_per_video: default_testing_samples(),
            num_actions: default_num_actions(),
            low_memory: false,
            log_file: default_log_file(),
            weights_file: default_weights_file(),
            preds_file: default_preds_file(),
            snapshot_dir: default_snapshot_dir(),
            logs_dir: default_logs_dir(),
        }
    }
}

impl MotionConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file does not set.
    pub fn load(path: &Path) -> Result<Self, MotionError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations training cannot start from.
    pub fn validate(&self) -> Result<(), MotionError> {
        if !(self.learning_rate > 0.0) {
            return Err(MotionError::config("learning_rate must be positive"));
        }
        if self.epochs == 0 {
            return Err(MotionError::config("epochs must be positive"));
        }
        if self.workers == 0 {
            return Err(MotionError::config("workers must be positive"));
        }
        if self.stacked_frames == 0 {
            return Err(MotionError::config("stacked_frames must be positive"));
        }
        if self.validate_every == 0 {
            return Err(MotionError::config("validate_every must be positive"));
        }
        if self.testing_samples_per_video == 0 {
            return Err(MotionError::config(
                "testing_samples_per_video must be positive",
            ));
        }
        if self.num_actions == 0 {
            return Err(MotionError::config("num_actions must be positive"));
        }
        Ok(())
    }

    pub fn is_adam(&self) -> bool {
        self.optimizer == OptimizerKind::Adam
    }
}

fn default_suffix() -> String {
    "hater".to_string()
}

fn default_architecture() -> ArchitectureName {
    ArchitectureName::Xception
}

fn default_optimizer() -> OptimizerKind {
    OptimizerKind::Adam
}

fn default_learning_rate() -> f64 {
    1e-5
}

fn default_augmenter_level() -> AugmenterLevel {
    AugmenterLevel::Heavy
}

fn default_epochs() -> usize {
    200
}

fn default_workers() -> usize {
    4
}

fn default_stacked_frames() -> usize {
    10
}

fn default_validate_every() -> usize {
    5
}

fn default_testing_samples() -> usize {
    19
}

fn default_num_actions() -> usize {
    10
}

fn default_log_file() -> String {
    "motion.log".to_string()
}

fn default_weights_file() -> String {
    "motion.weights.json".to_string()
}

fn default_preds_file() -> String {
    "motion.preds.json".to_string()
}

fn default_snapshot_dir() -> String {
    ".motion/snapshots".to_string()
}

fn default_logs_dir() -> String {
    "logs".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MotionConfig::default();
        assert_eq!(config.architecture, ArchitectureName::Xception);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert_eq!(config.learning_rate, 1e-5);
        assert!(config.pretrained);
        assert_eq!(config.augmenter_level, AugmenterLevel::Heavy);
        assert_eq!(config.num_actions, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_override() {
        let config: MotionConfig =
            toml::from_str("architecture = \"resnet\"\noptimizer = \"sgd\"\nworkers = 2\n")
                .unwrap();
        assert_eq!(config.architecture, ArchitectureName::Resnet);
        assert_eq!(config.optimizer, OptimizerKind::Sgd);
        assert_eq!(config.workers, 2);
        // untouched fields keep their defaults
        assert_eq!(config.stacked_frames, 10);
        assert_eq!(config.log_file, "motion.log");
    }

    #[test]
    fn test_validate_rejects_zero_lr() {
        let config = MotionConfig {
            learning_rate: 0.0,
            ..MotionConfig::default()
        };
        assert!(matches!(config.validate(), Err(MotionError::Config(_))));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = MotionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: MotionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.architecture, config.architecture);
        assert_eq!(parsed.validate_every, config.validate_every);
    }
}
