//! Loss, accuracy metrics, and clip-to-video aggregation.
//!
//! A test split yields several clips per video; video-level accuracy is the
//! classification accuracy after averaging the clip logits belonging to the
//! same source video.

use crate::error::MotionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Loss function signature registered under a name for model restore.
pub type LossFn = fn(&[f64], usize) -> f64;
/// Metric over a set of per-sample logits and their labels.
pub type MetricFn = fn(&[Vec<f64>], &[usize]) -> f64;

pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Cross entropy against an integer class label.
pub fn sparse_categorical_cross_entropy(logits: &[f64], label: usize) -> f64 {
    let probs = softmax(logits);
    let p = probs.get(label).copied().unwrap_or(0.0);
    -(p.max(1e-12)).ln()
}

fn top_k_hit(logits: &[f64], label: usize, k: usize) -> bool {
    let own = match logits.get(label) {
        Some(v) => *v,
        None => return false,
    };
    let better = logits.iter().filter(|&&v| v > own).count();
    better < k
}

fn accuracy_top_k(predictions: &[Vec<f64>], labels: &[usize], k: usize) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let hits = predictions
        .iter()
        .zip(labels)
        .filter(|(logits, label)| top_k_hit(logits, **label, k))
        .count();
    hits as f64 / predictions.len() as f64
}

pub fn acc_top_1(predictions: &[Vec<f64>], labels: &[usize]) -> f64 {
    accuracy_top_k(predictions, labels, 1)
}

pub fn acc_top_5(predictions: &[Vec<f64>], labels: &[usize]) -> f64 {
    accuracy_top_k(predictions, labels, 5)
}

/// Mean clip logits per video id, ordered by video id.
pub fn aggregate_by_video(
    clip_logits: &[Vec<f64>],
    clip_video_ids: &[usize],
) -> Result<BTreeMap<usize, Vec<f64>>, MotionError> {
    if clip_logits.len() != clip_video_ids.len() {
        return Err(MotionError::Evaluation(format!(
            "{} clip predictions for {} video ids",
            clip_logits.len(),
            clip_video_ids.len()
        )));
    }
    let mut sums: BTreeMap<usize, (Vec<f64>, usize)> = BTreeMap::new();
    for (logits, &video) in clip_logits.iter().zip(clip_video_ids) {
        let entry = sums
            .entry(video)
            .or_insert_with(|| (vec![0.0; logits.len()], 0));
        if entry.0.len() != logits.len() {
            return Err(MotionError::Evaluation(
                "inconsistent logit width across clips".to_string(),
            ));
        }
        for (acc, v) in entry.0.iter_mut().zip(logits) {
            *acc += v;
        }
        entry.1 += 1;
    }
    Ok(sums
        .into_iter()
        .map(|(video, (sum, count))| {
            let mean = sum.into_iter().map(|v| v / count as f64).collect();
            (video, mean)
        })
        .collect())
}

/// Per-video predictions for one validation pass, persisted alongside the
/// weights in every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoPredictions {
    pub video_ids: Vec<usize>,
    pub labels: Vec<usize>,
    pub logits: Vec<Vec<f64>>,
    pub accuracy: f64,
}

/// Aggregate clip predictions and score them against per-video labels
/// (indexed by video id).
pub fn video_level_predictions(
    clip_logits: &[Vec<f64>],
    clip_video_ids: &[usize],
    video_labels: &[usize],
) -> Result<VideoPredictions, MotionError> {
    let aggregated = aggregate_by_video(clip_logits, clip_video_ids)?;
    let mut video_ids = Vec::with_capacity(aggregated.len());
    let mut labels = Vec::with_capacity(aggregated.len());
    let mut logits = Vec::with_capacity(aggregated.len());
    for (video, mean) in aggregated {
        let label = video_labels.get(video).copied().ok_or_else(|| {
            MotionError::Evaluation(format!("no ground-truth label for video {video}"))
        })?;
        video_ids.push(video);
        labels.push(label);
        logits.push(mean);
    }
    let accuracy = acc_top_1(&logits, &labels);
    Ok(VideoPredictions {
        video_ids,
        labels,
        logits,
        accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_cross_entropy_prefers_correct_class() {
        let confident = sparse_categorical_cross_entropy(&[5.0, 0.0, 0.0], 0);
        let wrong = sparse_categorical_cross_entropy(&[5.0, 0.0, 0.0], 1);
        assert!(confident < wrong);
    }

    #[test]
    fn test_top_k_accuracy() {
        let preds = vec![
            vec![0.9, 0.1, 0.0, 0.0, 0.0, 0.0],
            vec![0.1, 0.2, 0.7, 0.0, 0.0, 0.0],
        ];
        let labels = vec![0, 1];
        assert_eq!(acc_top_1(&preds, &labels), 0.5);
        assert_eq!(acc_top_5(&preds, &labels), 1.0);
    }

    #[test]
    fn test_video_aggregation_majority_wins() {
        // video 0: two clips agreeing on class 1, one off vote
        let clip_logits = vec![
            vec![0.0, 2.0, 0.0],
            vec![0.0, 3.0, 0.0],
            vec![4.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let clip_videos = vec![0, 0, 0, 1];
        let preds = video_level_predictions(&clip_logits, &clip_videos, &[1, 2]).unwrap();
        assert_eq!(preds.video_ids, vec![0, 1]);
        assert_eq!(preds.accuracy, 1.0);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let err = aggregate_by_video(&[vec![0.0]], &[0, 1]);
        assert!(matches!(err, Err(MotionError::Evaluation(_))));
    }
}
