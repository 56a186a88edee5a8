//! Stacked LSTM regressor for team goal prediction
//!
//! Processes a window of match feature rows and regresses goals scored from
//! the final time step.

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Lstm, LstmConfig};
use burn::record::{FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::{GoalError, Result};

/// Configuration for the goal LSTM
#[derive(Debug, Clone, PartialEq)]
pub struct GoalLstmConfig {
    /// Features per match row
    pub input_size: usize,
    /// LSTM hidden size
    pub hidden_size: usize,
    /// Number of stacked LSTM layers
    pub num_layers: usize,
    /// Dropout between LSTM layers (training only)
    pub dropout: f64,
}

impl Default for GoalLstmConfig {
    fn default() -> Self {
        GoalLstmConfig {
            input_size: crate::INPUT_SIZE,
            hidden_size: 128,
            num_layers: 2,
            dropout: 0.2,
        }
    }
}

impl GoalLstmConfig {
    pub fn from_config(model: &crate::ModelConfig, training: &crate::TrainingConfig) -> Self {
        GoalLstmConfig {
            input_size: model.input_size,
            hidden_size: model.hidden_size,
            num_layers: model.num_layers,
            dropout: training.dropout,
        }
    }
}

/// LSTM goal regressor
///
/// Architecture:
/// 1. `num_layers` stacked LSTMs, dropout between consecutive layers
/// 2. Output at the last time step -> Linear -> goals
///
/// The output is unconstrained; callers round it.
#[derive(Module, Debug)]
pub struct GoalLstm<B: Backend> {
    layers: Vec<Lstm<B>>,
    dropout: Dropout,
    head: Linear<B>,
    input_size: usize,
    hidden_size: usize,
}

impl<B: Backend> GoalLstm<B> {
    /// Create a freshly initialized model
    pub fn new(device: &B::Device, config: GoalLstmConfig) -> Self {
        let layers = (0..config.num_layers.max(1))
            .map(|i| {
                let d_input = if i == 0 {
                    config.input_size
                } else {
                    config.hidden_size
                };
                LstmConfig::new(d_input, config.hidden_size, true).init(device)
            })
            .collect();

        GoalLstm {
            layers,
            dropout: DropoutConfig::new(config.dropout).init(),
            head: LinearConfig::new(config.hidden_size, 1).init(device),
            input_size: config.input_size,
            hidden_size: config.hidden_size,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `windows` - Feature windows [batch, seq_len, input_size]
    ///
    /// # Returns
    /// Predicted goals [batch, 1]
    pub fn forward(&self, windows: Tensor<B, 3>) -> Tensor<B, 2> {
        let mut x = windows;
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                x = self.dropout.forward(x);
            }
            let (output, _) = layer.forward(x, None);
            x = output;
        }

        let [batch_size, seq_len, hidden] = x.dims();
        let last = x
            .slice([0..batch_size, seq_len - 1..seq_len, 0..hidden])
            .reshape([batch_size, self.hidden_size]);

        self.head.forward(last)
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Save parameters to `path` (the recorder adds `.mpk`)
    pub fn save(&self, path: &str) -> Result<()>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        let recorder = burn::record::NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(self.clone().into_record(), path.into())
            .map_err(|e| GoalError::Record(e.to_string()))
    }

    /// Load parameters into a freshly constructed model
    pub fn load(device: &B::Device, path: &str, config: GoalLstmConfig) -> Result<Self>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        let recorder = burn::record::NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(path.into(), device)
            .map_err(|e| GoalError::Record(e.to_string()))?;

        let model = Self::new(device, config);
        Ok(model.load_record(record))
    }
}
