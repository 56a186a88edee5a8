//! Model training
//!
//! Training loop, checkpoint selection, the versioned checkpoint store and the
//! end-to-end training run.

pub mod checkpoint;
pub mod metrics;
pub mod pipeline;
pub mod trainer;

pub use checkpoint::{CheckpointStore, RunSummary};
pub use metrics::{BestSnapshot, EpochLoss, TrainingHistory};
pub use pipeline::{run_training, scale_samples, TrainBackend};
pub use trainer::{evaluate, Trainer, TrainingOutcome};
