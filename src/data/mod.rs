//! Data ingestion and batching
//!
//! CSV tables, persisted training bundles and the burn dataset/batcher.

pub mod bundle;
pub mod dataset;
pub mod table;

pub use bundle::{FeatureSet, TrainingBundle};
pub use dataset::{GoalBatch, GoalBatcher, GoalDataset};
pub use table::Table;
