//! Burn Dataset implementation for goal windows

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::features::sequence::{sample_shape, SequenceSample};
use crate::Result;

/// In-memory dataset of equally shaped windows
#[derive(Debug, Clone)]
pub struct GoalDataset {
    samples: Vec<SequenceSample>,
    seq_len: usize,
    width: usize,
}

impl GoalDataset {
    /// Wrap samples, rejecting empty or ragged input
    pub fn new(samples: Vec<SequenceSample>) -> Result<Self> {
        let (seq_len, width) = sample_shape(&samples)?;
        Ok(GoalDataset {
            samples,
            seq_len,
            width,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Features per row
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn samples(&self) -> &[SequenceSample] {
        &self.samples
    }
}

impl Dataset<SequenceSample> for GoalDataset {
    fn get(&self, index: usize) -> Option<SequenceSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Batch of windows for training
#[derive(Debug, Clone)]
pub struct GoalBatch<B: Backend> {
    /// Feature windows: [batch, seq_len, features]
    pub windows: Tensor<B, 3>,
    /// Target goals: [batch, 1]
    pub targets: Tensor<B, 2>,
}

/// Batcher for creating training batches
#[derive(Clone)]
pub struct GoalBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> GoalBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        GoalBatcher { device }
    }

    /// Stack windows into a [batch, seq_len, features] tensor
    pub fn windows_tensor(&self, windows: &[&[Vec<f32>]]) -> Tensor<B, 3> {
        let batch_size = windows.len();
        let seq_len = windows.first().map(|w| w.len()).unwrap_or(0);
        let width = windows
            .first()
            .and_then(|w| w.first())
            .map(|r| r.len())
            .unwrap_or(0);

        let data: Vec<f32> = windows
            .iter()
            .flat_map(|w| w.iter().flatten().copied())
            .collect();

        Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([
            batch_size,
            seq_len,
            width,
        ])
    }
}

impl<B: Backend> Batcher<B, SequenceSample, GoalBatch<B>> for GoalBatcher<B> {
    fn batch(&self, items: Vec<SequenceSample>, _device: &B::Device) -> GoalBatch<B> {
        let windows: Vec<&[Vec<f32>]> = items.iter().map(|s| s.window.as_slice()).collect();
        let targets: Vec<f32> = items.iter().map(|s| s.target).collect();

        GoalBatch {
            windows: self.windows_tensor(&windows),
            targets: Tensor::<B, 1>::from_floats(targets.as_slice(), &self.device)
                .reshape([items.len(), 1]),
        }
    }
}
