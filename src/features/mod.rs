//! Feature preparation
//!
//! Turns per-entity rows into model-ready windows and standardizes them.

pub mod scaler;
pub mod sequence;

pub use scaler::ScalerState;
pub use sequence::{SequenceBuilder, SequenceSample, TargetMode, Window};
