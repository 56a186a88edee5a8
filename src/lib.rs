//! Team goal prediction using a stacked LSTM regressor
//!
//! Builds per-match feature windows, standardizes them, trains a small
//! recurrent network and serves rounded goal predictions for uploaded CSVs.

pub mod data;
pub mod features;
pub mod model;
pub mod predict;
pub mod training;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of features per match row the deployed model expects
pub const INPUT_SIZE: usize = 40;

/// Ground-truth column dropped from uploads before scaling
pub const LABEL_COLUMN: &str = "Actual_Team_Goals";

/// Column appended to uploads with the rounded predictions
pub const PREDICTION_COLUMN: &str = "Predicted_Team_Goals";

/// Application-wide errors
#[derive(Debug, Error)]
pub enum GoalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Got {actual} features; model expects {expected}. Please upload a CSV with the correct columns.")]
    Validation { expected: usize, actual: usize },

    #[error("Data error: {0}")]
    Data(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("No checkpoint found in {0} - run `goalnet train` first")]
    NoCheckpoint(String),

    #[error("Record error: {0}")]
    Record(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GoalError {
    /// Whether the error comes from the caller's data rather than the deployment
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            GoalError::Validation { .. } | GoalError::Data(_) | GoalError::Csv(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GoalError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub training: TrainingConfig,
    pub model: ModelConfig,
    pub data: DataConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub dropout: f64,
    pub seed: u64,
    /// Fraction of samples held out by `data build` / `data split`
    pub validation_ratio: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub bundle_path: String,
    pub checkpoint_dir: String,
    pub scaler_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub label_column: String,
    pub prediction_column: String,
    pub report_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            training: TrainingConfig {
                epochs: 50,
                batch_size: 32,
                learning_rate: 1e-3,
                dropout: 0.2,
                seed: 42,
                validation_ratio: 0.2,
            },
            model: ModelConfig {
                input_size: INPUT_SIZE,
                hidden_size: 128,
                num_layers: 2,
            },
            data: DataConfig {
                bundle_path: "data/training.json".to_string(),
                checkpoint_dir: "model".to_string(),
                scaler_path: "data/scaler.json".to_string(),
            },
            service: ServiceConfig {
                label_column: LABEL_COLUMN.to_string(),
                prediction_column: PREDICTION_COLUMN.to_string(),
                report_path: "report.html".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GoalError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| GoalError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GoalError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.training.epochs = 7;
        config.save(path).unwrap();

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded.training.epochs, 7);
        assert_eq!(loaded.model.input_size, INPUT_SIZE);
        assert_eq!(loaded.service.label_column, LABEL_COLUMN);
    }

    #[test]
    fn test_config_missing_file() {
        let err = Config::load("/nonexistent/goalnet.toml").unwrap_err();
        assert!(matches!(err, GoalError::Config(_)));
    }

    #[test]
    fn test_validation_message() {
        let err = GoalError::Validation {
            expected: 40,
            actual: 39,
        };
        assert_eq!(
            err.to_string(),
            "Got 39 features; model expects 40. Please upload a CSV with the correct columns."
        );
        assert!(err.is_request_error());
        assert!(!GoalError::Config("x".into()).is_request_error());
    }
}
