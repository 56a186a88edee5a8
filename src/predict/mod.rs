//! Prediction and reporting
//!
//! Load a trained run, predict goals for uploaded CSVs and render the result
//! page.

pub mod inference;
pub mod report;

pub use inference::{
    round_goal, GoalRegressor, InferenceService, LstmRegressor, ServeBackend, ServiceContext,
};
pub use report::{Page, PredictionReport};
