//! Training loop and loss computation

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::DataLoaderBuilder;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};

use crate::data::dataset::{GoalBatch, GoalBatcher, GoalDataset};
use crate::features::sequence::SequenceSample;
use crate::model::GoalLstm;
use crate::training::checkpoint::RunSummary;
use crate::training::metrics::{BestSnapshot, EpochLoss, TrainingHistory};
use crate::{GoalError, Result, TrainingConfig};

/// Mean squared error over a batch
pub fn mse_loss<B: Backend>(predictions: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (predictions - targets).powf_scalar(2.0).mean()
}

/// MSE of a model over a set of samples, evaluated in one batch
pub fn evaluate<B: Backend>(
    model: &GoalLstm<B>,
    samples: &[SequenceSample],
    device: &B::Device,
) -> Result<f64> {
    if samples.is_empty() {
        return Err(GoalError::Data("cannot evaluate on zero samples".to_string()));
    }
    let batcher = GoalBatcher::<B>::new(device.clone());
    let batch = batcher.batch(samples.to_vec(), device);
    let predictions = model.forward(batch.windows);
    let loss: f32 = mse_loss(predictions, batch.targets).into_scalar().elem();
    Ok(loss as f64)
}

/// Result of a completed training run
#[derive(Debug)]
pub struct TrainingOutcome<B: Backend> {
    /// Parameters selected for persistence
    pub model: GoalLstm<B>,
    pub history: TrainingHistory,
    /// 1-based epoch the model was taken from, if any epoch improved
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub had_validation: bool,
    pub train_samples: usize,
    pub val_samples: usize,
}

impl<B: Backend> TrainingOutcome<B> {
    /// Summary for the checkpoint store; the run id is assigned on commit
    pub fn summary(&self, hidden_size: usize) -> RunSummary {
        RunSummary {
            run_id: String::new(),
            created_at: String::new(),
            input_size: self.model.input_size(),
            hidden_size,
            num_layers: self.model.num_layers(),
            epochs: self.history.epochs(),
            best_epoch: self.best_epoch,
            best_val_loss: self.best_val_loss,
            final_train_loss: self.history.final_train_loss().unwrap_or(f64::NAN),
            had_validation: self.had_validation,
            train_samples: self.train_samples,
            val_samples: self.val_samples,
        }
    }
}

/// Trainer for the goal LSTM
pub struct Trainer<B: AutodiffBackend> {
    model: GoalLstm<B>,
    optimizer: burn::optim::adaptor::OptimizerAdaptor<burn::optim::Adam, GoalLstm<B>, B>,
    config: TrainingConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a new trainer
    pub fn new(model: GoalLstm<B>, config: TrainingConfig, device: B::Device) -> Self {
        let optimizer = AdamConfig::new().init();

        Trainer {
            model,
            optimizer,
            config,
            device,
        }
    }

    /// Train the model
    ///
    /// Without validation data the training loss stands in for the
    /// validation loss, so selection degenerates to the last improving epoch.
    pub fn train(
        mut self,
        train_dataset: GoalDataset,
        val_dataset: Option<GoalDataset>,
    ) -> Result<TrainingOutcome<B::InnerBackend>> {
        if self.config.epochs == 0 {
            return Err(GoalError::Config("epochs must be at least 1".to_string()));
        }
        if self.config.batch_size == 0 {
            return Err(GoalError::Config("batch size must be at least 1".to_string()));
        }
        self.check_width("training", &train_dataset)?;
        if let Some(val) = &val_dataset {
            self.check_width("validation", val)?;
        }

        let train_samples = train_dataset.len();
        let val_samples = val_dataset.as_ref().map(|v| v.len()).unwrap_or(0);

        let train_loader = DataLoaderBuilder::new(GoalBatcher::<B>::new(self.device.clone()))
            .batch_size(self.config.batch_size)
            .shuffle(self.config.seed)
            .build(train_dataset);

        // Validation runs on the inner backend, where dropout is inactive
        let val_batch: Option<GoalBatch<B::InnerBackend>> = val_dataset.map(|val| {
            GoalBatcher::<B::InnerBackend>::new(self.device.clone())
                .batch(val.samples().to_vec(), &self.device)
        });

        let mut history = TrainingHistory::new();
        let mut best = BestSnapshot::new();

        log::info!(
            "Starting training for {} epochs ({} train, {} val samples)",
            self.config.epochs,
            train_samples,
            val_samples
        );

        for epoch in 1..=self.config.epochs {
            let train_loss = self.train_epoch(train_loader.iter())?;

            let val_loss = match &val_batch {
                Some(batch) => self.validate(batch),
                None => train_loss.avg_loss(),
            };

            history.record_epoch(train_loss.avg_loss(), val_loss);

            log::info!(
                "Epoch {}/{} - train loss: {:.4} - val loss: {:.4}",
                epoch,
                self.config.epochs,
                train_loss.avg_loss(),
                val_loss
            );

            if best.offer(epoch, val_loss, || self.model.valid()) {
                log::debug!("  New best model (val_loss: {:.4})", val_loss);
            }
        }

        let best_epoch = best.best_epoch();
        let best_val_loss = best.best_loss();
        let model = match best.into_snapshot() {
            Some(model) => model,
            None => {
                log::warn!("No epoch improved on the initial loss; keeping final parameters");
                self.model.valid()
            }
        };

        if let Some(epoch) = best_epoch {
            log::info!(
                "Best model from epoch {} (val loss: {:.4})",
                epoch,
                best_val_loss.unwrap_or(f64::NAN)
            );
        }

        Ok(TrainingOutcome {
            model,
            history,
            best_epoch,
            best_val_loss,
            had_validation: val_batch.is_some(),
            train_samples,
            val_samples,
        })
    }

    fn check_width(&self, split: &str, dataset: &GoalDataset) -> Result<()> {
        if dataset.width() != self.model.input_size() {
            return Err(GoalError::Config(format!(
                "{} data has {} features but the model expects {}",
                split,
                dataset.width(),
                self.model.input_size()
            )));
        }
        Ok(())
    }

    /// Train one epoch
    fn train_epoch(&mut self, loader: impl Iterator<Item = GoalBatch<B>>) -> Result<EpochLoss> {
        let mut epoch_loss = EpochLoss::new();

        for batch in loader {
            let batch_size = batch.windows.dims()[0];

            // Forward pass
            let predictions = self.model.forward(batch.windows);
            let loss = mse_loss(predictions, batch.targets);

            let loss_val: f32 = loss.clone().into_scalar().elem();
            if !loss_val.is_finite() {
                return Err(GoalError::Training(format!(
                    "loss became {} after {} batches",
                    loss_val, epoch_loss.batch_count
                )));
            }

            // Backward pass
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);

            // Update weights
            self.model = self
                .optimizer
                .step(self.config.learning_rate, self.model.clone(), grads);

            epoch_loss.update(loss_val, batch_size);
        }

        Ok(epoch_loss)
    }

    /// Validation MSE with dropout disabled
    fn validate(&self, batch: &GoalBatch<B::InnerBackend>) -> f64 {
        let model = self.model.valid();
        let predictions = model.forward(batch.windows.clone());
        let loss: f32 = mse_loss(predictions, batch.targets.clone())
            .into_scalar()
            .elem();
        loss as f64
    }
}
