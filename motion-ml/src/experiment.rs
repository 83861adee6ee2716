//! Experiment identifier — the stable key namespacing snapshots and logs.
//!
//! The identifier is a pure function of the hyperparameters it encodes:
//! the same configuration always maps to the same remote folder, which is
//! what lets a rerun find and resume its own checkpoints.

use crate::config::{ArchitectureName, AugmenterLevel, MotionConfig};

/// Stream-kind literal for the motion (optical flow) stream.
pub const MOTION_STREAM: &str = "mot";

/// Build the experiment identifier.
///
/// Shape: `<suffix>-<aug>-<stream>-<arch>-<adam|SGD>-<lr>-<imnet|scrat>`,
/// with the leading `<suffix>-` omitted when the suffix is empty. Distinct
/// inputs yield distinct identifiers.
pub fn experiment_identifier(
    suffix: &str,
    augmenter_level: AugmenterLevel,
    stream: &str,
    architecture: ArchitectureName,
    is_adam: bool,
    learning_rate: f64,
    pretrained: bool,
) -> String {
    let mut id = String::new();
    if !suffix.is_empty() {
        id.push_str(suffix);
        id.push('-');
    }
    id.push_str(augmenter_level.text());
    id.push('-');
    id.push_str(stream);
    id.push('-');
    id.push_str(&architecture.to_string());
    id.push('-');
    id.push_str(if is_adam { "adam" } else { "SGD" });
    id.push('-');
    id.push_str(&format_learning_rate(learning_rate));
    id.push('-');
    id.push_str(if pretrained { "imnet" } else { "scrat" });
    id
}

impl MotionConfig {
    /// Identifier for this configuration's motion stream run.
    pub fn experiment_identifier(&self) -> String {
        experiment_identifier(
            &self.suffix,
            self.augmenter_level,
            MOTION_STREAM,
            self.architecture,
            self.is_adam(),
            self.learning_rate,
            self.pretrained,
        )
    }
}

/// Render a learning rate the way checkpoint folders have always been named:
/// plain decimal down to 1e-4, then scientific with a two-digit exponent
/// (`1e-05`, `2.5e-06`).
pub fn format_learning_rate(lr: f64) -> String {
    let sci = format!("{lr:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exponent.parse().unwrap_or(0);
    if exp < -4 {
        if exp <= -10 {
            format!("{mantissa}e-{}", -exp)
        } else {
            format!("{mantissa}e-0{}", -exp)
        }
    } else {
        lr.to_string()
    }
}
