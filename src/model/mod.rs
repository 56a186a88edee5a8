//! Neural network architecture
//!
//! A stacked LSTM regressor over match feature windows.

pub mod lstm;

pub use lstm::{GoalLstm, GoalLstmConfig};
