//! Versioned checkpoint store
//!
//! Every training run gets its own directory under the store root:
//!
//! ```text
//! model/
//!   run-20240301-101500-123/
//!     model.mpk     parameters
//!     scaler.json   scaler the run was trained with
//!     run.json      run summary
//! ```
//!
//! Runs are written to a staging directory and renamed into place, so a run
//! that fails part-way leaves nothing behind. Run ids sort chronologically.

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::features::ScalerState;
use crate::model::{GoalLstm, GoalLstmConfig};
use crate::{GoalError, Result};

const MODEL_FILE: &str = "model";
const SCALER_FILE: &str = "scaler.json";
const SUMMARY_FILE: &str = "run.json";
const STAGING_PREFIX: &str = ".staging-";

/// Metadata stored next to each checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    /// RFC 3339 commit time
    pub created_at: String,
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub epochs: usize,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub final_train_loss: f64,
    pub had_validation: bool,
    pub train_samples: usize,
    pub val_samples: usize,
}

impl RunSummary {
    /// Architecture needed to rebuild the model before loading parameters
    pub fn model_config(&self) -> GoalLstmConfig {
        GoalLstmConfig {
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            num_layers: self.num_layers,
            dropout: 0.0,
        }
    }
}

/// Directory of training runs
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        CheckpointStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Parameter file path without the `.mpk` extension the recorder adds
    pub fn model_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(MODEL_FILE)
    }

    pub fn scaler_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(SCALER_FILE)
    }

    /// Persist a run and return its summary with id and timestamp filled in
    pub fn commit<B: Backend>(
        &self,
        model: &GoalLstm<B>,
        scaler: &ScalerState,
        mut summary: RunSummary,
    ) -> Result<RunSummary>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        std::fs::create_dir_all(&self.root)?;

        let now = Utc::now();
        let run_id = self.unique_run_id(&now.format("run-%Y%m%d-%H%M%S-%3f").to_string());
        summary.run_id = run_id.clone();
        summary.created_at = now.to_rfc3339();

        let staging = self.root.join(format!("{}{}", STAGING_PREFIX, run_id));
        std::fs::create_dir_all(&staging)?;

        let written = write_run(&staging, model, scaler, &summary);
        if let Err(e) = written {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        std::fs::rename(&staging, self.run_dir(&run_id))?;
        log::info!("Committed checkpoint {}", self.run_dir(&run_id).display());
        Ok(summary)
    }

    fn unique_run_id(&self, base: &str) -> String {
        let mut run_id = base.to_string();
        let mut n = 1;
        while self.run_dir(&run_id).exists() {
            run_id = format!("{}-{}", base, n);
            n += 1;
        }
        run_id
    }

    /// All committed runs, oldest first
    pub fn list(&self) -> Result<Vec<RunSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().join(SUMMARY_FILE).exists() {
                continue;
            }
            runs.push(self.get(&name)?);
        }
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }

    pub fn get(&self, run_id: &str) -> Result<RunSummary> {
        let path = self.run_dir(run_id).join(SUMMARY_FILE);
        if !path.exists() {
            return Err(GoalError::NoCheckpoint(self.run_dir(run_id).display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn latest(&self) -> Result<RunSummary> {
        self.list()?
            .pop()
            .ok_or_else(|| GoalError::NoCheckpoint(self.root.display().to_string()))
    }

    /// The named run, or the latest one
    pub fn resolve(&self, run_id: Option<&str>) -> Result<RunSummary> {
        match run_id {
            Some(id) => self.get(id),
            None => self.latest(),
        }
    }

    pub fn load_model<B: Backend>(
        &self,
        summary: &RunSummary,
        device: &B::Device,
    ) -> Result<GoalLstm<B>>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        let path = self.model_path(&summary.run_id);
        GoalLstm::load(device, &path.to_string_lossy(), summary.model_config())
    }

    pub fn load_scaler(&self, summary: &RunSummary) -> Result<ScalerState> {
        ScalerState::load(self.scaler_path(&summary.run_id))
    }
}

fn write_run<B: Backend>(
    dir: &Path,
    model: &GoalLstm<B>,
    scaler: &ScalerState,
    summary: &RunSummary,
) -> Result<()>
where
    B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
    B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
{
    model.save(&dir.join(MODEL_FILE).to_string_lossy())?;
    scaler.save(dir.join(SCALER_FILE))?;
    let file = std::fs::File::create(dir.join(SUMMARY_FILE))?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}
