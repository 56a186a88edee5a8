//! Persisted training/validation feature bundle

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::features::sequence::{SequenceSample, Window};
use crate::{GoalError, Result};

/// Features stored either as a plain matrix (one row per sample) or as
/// explicit windows (samples × steps × features)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureSet {
    Windows(Vec<Window>),
    Matrix(Vec<Vec<f32>>),
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        match self {
            FeatureSet::Windows(w) => w.len(),
            FeatureSet::Matrix(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every sample as a window; matrix rows become length-1 windows
    pub fn into_windows(self) -> Vec<Window> {
        match self {
            FeatureSet::Windows(w) => w,
            FeatureSet::Matrix(m) => m.into_iter().map(|row| vec![row]).collect(),
        }
    }

    fn from_windows(windows: Vec<Window>) -> Self {
        if windows.iter().all(|w| w.len() == 1) {
            FeatureSet::Matrix(windows.into_iter().flatten().collect())
        } else {
            FeatureSet::Windows(windows)
        }
    }
}

/// Training inputs with an optional validation split under parallel keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingBundle {
    pub x_train: FeatureSet,
    pub y_train: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_val: Option<FeatureSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_val: Option<Vec<f32>>,
}

impl TrainingBundle {
    pub fn from_samples(train: Vec<SequenceSample>, val: Option<Vec<SequenceSample>>) -> Self {
        let (x_train, y_train) = unzip(train);
        let (x_val, y_val) = match val {
            Some(v) if !v.is_empty() => {
                let (x, y) = unzip(v);
                (Some(x), Some(y))
            }
            _ => (None, None),
        };
        TrainingBundle {
            x_train,
            y_train,
            x_val,
            y_val,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            GoalError::Data(format!("cannot open bundle {}: {}", path.display(), e))
        })?;
        let bundle = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(bundle)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn has_validation(&self) -> bool {
        self.x_val.is_some()
    }

    pub fn train_samples(&self) -> Result<Vec<SequenceSample>> {
        zip("train", self.x_train.clone(), &self.y_train)
    }

    pub fn val_samples(&self) -> Result<Option<Vec<SequenceSample>>> {
        match (&self.x_val, &self.y_val) {
            (None, None) => Ok(None),
            (Some(x), Some(y)) => zip("validation", x.clone(), y).map(Some),
            _ => Err(GoalError::Data(
                "validation split needs both x_val and y_val".to_string(),
            )),
        }
    }

    /// Training windows, as used to fit the scaler
    pub fn train_windows(&self) -> Vec<Window> {
        self.x_train.clone().into_windows()
    }
}

fn unzip(samples: Vec<SequenceSample>) -> (FeatureSet, Vec<f32>) {
    let (windows, targets): (Vec<Window>, Vec<f32>) =
        samples.into_iter().map(|s| (s.window, s.target)).unzip();
    (FeatureSet::from_windows(windows), targets)
}

fn zip(split: &str, x: FeatureSet, y: &[f32]) -> Result<Vec<SequenceSample>> {
    if x.len() != y.len() {
        return Err(GoalError::Data(format!(
            "{} split has {} feature rows but {} targets",
            split,
            x.len(),
            y.len()
        )));
    }
    Ok(x.into_windows()
        .into_iter()
        .zip(y.iter().copied())
        .map(|(window, target)| SequenceSample { window, target })
        .collect())
}

/// Shuffle with a fixed seed and hold out `val_ratio` of the samples.
///
/// Returns `(train, val)`.
pub fn split_samples(
    mut samples: Vec<SequenceSample>,
    val_ratio: f32,
    seed: u64,
) -> Result<(Vec<SequenceSample>, Vec<SequenceSample>)> {
    if !(0.0..1.0).contains(&val_ratio) {
        return Err(GoalError::Config(format!(
            "validation ratio must be in [0, 1), got {}",
            val_ratio
        )));
    }
    samples.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_val = (samples.len() as f32 * val_ratio).round() as usize;
    let train = samples.split_off(n_val);
    Ok((train, samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<SequenceSample> {
        (0..n)
            .map(|i| SequenceSample::single(vec![i as f32, 1.0], i as f32))
            .collect()
    }

    #[test]
    fn test_matrix_json() {
        let json = r#"{"x_train": [[1.0, 2.0], [3.0, 4.0]], "y_train": [1.0, 2.0]}"#;
        let bundle: TrainingBundle = serde_json::from_str(json).unwrap();
        assert!(matches!(bundle.x_train, FeatureSet::Matrix(_)));
        assert!(!bundle.has_validation());

        let train = bundle.train_samples().unwrap();
        assert_eq!(train[1], SequenceSample::single(vec![3.0, 4.0], 2.0));
        assert_eq!(bundle.val_samples().unwrap(), None);
    }

    #[test]
    fn test_windows_json() {
        let json = r#"{"x_train": [[[1.0], [2.0]]], "y_train": [5.0],
                       "x_val": [[[3.0], [4.0]]], "y_val": [6.0]}"#;
        let bundle: TrainingBundle = serde_json::from_str(json).unwrap();
        assert!(matches!(bundle.x_train, FeatureSet::Windows(_)));
        let val = bundle.val_samples().unwrap().unwrap();
        assert_eq!(val[0].window, vec![vec![3.0], vec![4.0]]);
        assert_eq!(bundle.train_windows(), vec![vec![vec![1.0], vec![2.0]]]);
    }

    #[test]
    fn test_length_mismatch() {
        let json = r#"{"x_train": [[1.0], [2.0]], "y_train": [1.0]}"#;
        let bundle: TrainingBundle = serde_json::from_str(json).unwrap();
        assert!(matches!(bundle.train_samples(), Err(GoalError::Data(_))));
    }

    #[test]
    fn test_half_validation_split() {
        let json = r#"{"x_train": [[1.0]], "y_train": [1.0], "x_val": [[2.0]]}"#;
        let bundle: TrainingBundle = serde_json::from_str(json).unwrap();
        assert!(matches!(bundle.val_samples(), Err(GoalError::Data(_))));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bundle.json");
        let bundle = TrainingBundle::from_samples(samples(5), Some(samples(2)));
        bundle.save(&path).unwrap();
        assert_eq!(TrainingBundle::load(&path).unwrap(), bundle);
    }

    #[test]
    fn test_split_samples() {
        let (train, val) = split_samples(samples(100), 0.2, 42).unwrap();
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(), 20);

        let (train2, _) = split_samples(samples(100), 0.2, 42).unwrap();
        assert_eq!(train, train2);

        assert!(split_samples(samples(10), 1.0, 1).is_err());
    }
}
