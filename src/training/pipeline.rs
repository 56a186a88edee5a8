//! Full training run: fit the scaler, standardize, train, commit

use burn::backend::{Autodiff, NdArray};

use crate::data::{GoalDataset, TrainingBundle};
use crate::features::{ScalerState, SequenceSample, Window};
use crate::model::{GoalLstm, GoalLstmConfig};
use crate::training::checkpoint::{CheckpointStore, RunSummary};
use crate::training::trainer::Trainer;
use crate::{Config, GoalError, Result};

/// Backend used for training; validation and checkpoints use its inner NdArray
pub type TrainBackend = Autodiff<NdArray<f32>>;

/// Standardize every window, keeping targets as they are
pub fn scale_samples(
    scaler: &ScalerState,
    samples: Vec<SequenceSample>,
) -> Result<Vec<SequenceSample>> {
    let (windows, targets): (Vec<Window>, Vec<f32>) =
        samples.into_iter().map(|s| (s.window, s.target)).unzip();
    let scaled = scaler.transform_windows(&windows)?;
    Ok(scaled
        .into_iter()
        .zip(targets)
        .map(|(window, target)| SequenceSample { window, target })
        .collect())
}

/// Train on a bundle and commit the run to `data.checkpoint_dir`.
///
/// The scaler is fitted on the training windows unless one is supplied; it is
/// stored with the run either way.
pub fn run_training(
    config: &Config,
    bundle: &TrainingBundle,
    scaler: Option<ScalerState>,
) -> Result<RunSummary> {
    let train_samples = bundle.train_samples()?;
    let val_samples = bundle.val_samples()?;
    log::info!(
        "Training on {} samples, validating on {}",
        train_samples.len(),
        val_samples.as_ref().map(|v| v.len()).unwrap_or(0)
    );

    let scaler = match scaler {
        Some(scaler) => {
            if scaler.width() != config.model.input_size {
                return Err(GoalError::Config(format!(
                    "supplied scaler has {} features but the model expects {}",
                    scaler.width(),
                    config.model.input_size
                )));
            }
            scaler
        }
        None => ScalerState::fit_windows(&bundle.train_windows())?,
    };

    let train_dataset = GoalDataset::new(scale_samples(&scaler, train_samples)?)?;
    let val_dataset = match val_samples {
        Some(v) if !v.is_empty() => Some(GoalDataset::new(scale_samples(&scaler, v)?)?),
        _ => None,
    };

    let model_config = GoalLstmConfig::from_config(&config.model, &config.training);
    let device = Default::default();
    let model = GoalLstm::<TrainBackend>::new(&device, model_config.clone());
    let trainer = Trainer::new(model, config.training.clone(), device);
    let outcome = trainer.train(train_dataset, val_dataset)?;

    let store = CheckpointStore::new(&config.data.checkpoint_dir);
    store.commit(&outcome.model, &scaler, outcome.summary(model_config.hidden_size))
}
