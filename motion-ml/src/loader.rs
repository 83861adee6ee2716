//! Frame-batch loaders feeding the fit loop.
//!
//! A loader yields a finite, restartable sequence of batches per epoch.
//! Batches are addressed by index, so any number of prefetch workers can pull
//! from one loader concurrently without duplicating or dropping a step.

use crate::config::{AugmenterLevel, MotionConfig};
use crate::error::MotionError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// One batch of stacked-flow clips with their labels.
#[derive(Debug, Clone)]
pub struct ClipBatch {
    pub width: usize,
    pub height: usize,
    pub stacked_frames: usize,
    /// Flattened `stacked_frames * width * height` values per clip.
    pub clips: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
    /// Source video of each clip, used for video-level aggregation.
    pub video_ids: Vec<usize>,
}

/// A finite, restartable-per-epoch batch sequence with random access.
pub trait BatchIter: Send + Sync {
    /// Number of steps (batches) in one epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the batch at `index`, `0..len()`.
    fn batch(&self, index: usize) -> Result<ClipBatch, MotionError>;
}

/// Builds the training iterator, testing iterator, and the ground-truth
/// video-level labels aligned with the testing iterator's video grouping.
pub trait LoaderFactory: Send + Sync {
    fn run(
        &self,
        width: usize,
        height: usize,
        batch_size: usize,
    ) -> Result<(Arc<dyn BatchIter>, Arc<dyn BatchIter>, Vec<usize>), MotionError>;
}

/// Deterministic synthetic flow-frame source.
///
/// Each video's clips carry a per-channel signature of the video's action
/// label plus augmentation jitter, so the readout has something real to fit.
#[derive(Debug, Clone)]
pub struct SyntheticLoaderFactory {
    pub videos: usize,
    pub train_clips_per_video: usize,
    pub testing_samples_per_video: usize,
    pub stacked_frames: usize,
    pub num_actions: usize,
    pub augmenter_level: AugmenterLevel,
    pub seed: u64,
}

impl SyntheticLoaderFactory {
    pub fn from_config(config: &MotionConfig) -> Self {
        Self {
            videos: 40,
            train_clips_per_video: 6,
            testing_samples_per_video: config.testing_samples_per_video,
            stacked_frames: config.stacked_frames,
            num_actions: config.num_actions,
            augmenter_level: config.augmenter_level,
            seed: 0x6d6f74,
        }
    }

    fn video_label(&self, video: usize) -> usize {
        video % self.num_actions
    }

    fn split(
        &self,
        clips_per_video: usize,
        width: usize,
        height: usize,
        batch_size: usize,
        split_salt: u64,
        augment: bool,
    ) -> SyntheticIter {
        let clips = (0..self.videos)
            .flat_map(|video| {
                (0..clips_per_video).map(move |clip| ClipKey {
                    video,
                    label: self.video_label(video),
                    clip,
                })
            })
            .collect();
        SyntheticIter {
            clips,
            width,
            height,
            stacked_frames: self.stacked_frames,
            num_actions: self.num_actions,
            batch_size,
            jitter: if augment {
                self.augmenter_level.jitter()
            } else {
                0.0
            },
            seed: self.seed ^ split_salt,
        }
    }
}

impl LoaderFactory for SyntheticLoaderFactory {
    fn run(
        &self,
        width: usize,
        height: usize,
        batch_size: usize,
    ) -> Result<(Arc<dyn BatchIter>, Arc<dyn BatchIter>, Vec<usize>), MotionError> {
        if batch_size == 0 {
            return Err(MotionError::loader("batch_size must be positive"));
        }
        if width == 0 || height == 0 {
            return Err(MotionError::loader("clip dimensions must be positive"));
        }
        let train = self.split(
            self.train_clips_per_video,
            width,
            height,
            batch_size,
            0x7472,
            true,
        );
        let test = self.split(
            self.testing_samples_per_video,
            width,
            height,
            batch_size,
            0x7465,
            false,
        );
        let labels = (0..self.videos).map(|v| self.video_label(v)).collect();
        Ok((Arc::new(train), Arc::new(test), labels))
    }
}

#[derive(Debug, Clone, Copy)]
struct ClipKey {
    video: usize,
    label: usize,
    clip: usize,
}

struct SyntheticIter {
    clips: Vec<ClipKey>,
    width: usize,
    height: usize,
    stacked_frames: usize,
    num_actions: usize,
    batch_size: usize,
    jitter: f32,
    seed: u64,
}

impl SyntheticIter {
    fn render_clip(&self, key: ClipKey) -> Vec<f32> {
        let channel = self.width * self.height;
        let mut rng = StdRng::seed_from_u64(
            self.seed
                .wrapping_mul(0x9e3779b97f4a7c15)
                .wrapping_add((key.video as u64) << 20)
                .wrapping_add(key.clip as u64),
        );
        let mut clip = Vec::with_capacity(self.stacked_frames * channel);
        for frame in 0..self.stacked_frames {
            // label signature for this flow channel
            let base = ((key.label * (frame + 1)) % self.num_actions) as f32
                / self.num_actions as f32;
            for _ in 0..channel {
                let noise: f32 = rng.gen_range(-1.0..1.0);
                clip.push(base + noise * (0.02 + self.jitter));
            }
        }
        clip
    }
}

impl BatchIter for SyntheticIter {
    fn len(&self) -> usize {
        self.clips.len().div_ceil(self.batch_size)
    }

    fn batch(&self, index: usize) -> Result<ClipBatch, MotionError> {
        let start = index * self.batch_size;
        if start >= self.clips.len() {
            return Err(MotionError::loader(format!(
                "batch index {index} out of range ({} steps)",
                self.len()
            )));
        }
        let end = (start + self.batch_size).min(self.clips.len());
        let keys = &self.clips[start..end];
        Ok(ClipBatch {
            width: self.width,
            height: self.height,
            stacked_frames: self.stacked_frames,
            clips: keys.iter().map(|&k| self.render_clip(k)).collect(),
            labels: keys.iter().map(|k| k.label).collect(),
            video_ids: keys.iter().map(|k| k.video).collect(),
        })
    }
}
