//! Per-column standardization (z-score) of feature rows

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::features::sequence::Window;
use crate::{GoalError, Result};

/// Below this a column is treated as constant
const STD_EPSILON: f64 = 1e-9;

/// Per-column mean and population standard deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    /// Rows seen when fitting
    pub n_samples: usize,
}

impl ScalerState {
    /// Fit on a set of rows.
    ///
    /// Column values are sorted before summing, so the state is identical
    /// for any permutation of `rows`.
    pub fn fit(rows: &[Vec<f32>]) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| GoalError::Data("cannot fit scaler on zero rows".to_string()))?;
        let width = first.len();
        if width == 0 {
            return Err(GoalError::Data("cannot fit scaler on zero columns".to_string()));
        }
        if let Some(i) = rows.iter().position(|r| r.len() != width) {
            return Err(GoalError::Data(format!(
                "row {} has {} columns, expected {}",
                i + 1,
                rows[i].len(),
                width
            )));
        }

        let n = rows.len() as f64;
        let mut means = Vec::with_capacity(width);
        let mut stds = Vec::with_capacity(width);

        for col in 0..width {
            let mut values: Vec<f64> = rows.iter().map(|r| r[col] as f64).collect();
            values.sort_by(f64::total_cmp);

            let mean = values.iter().sum::<f64>() / n;
            let mut sq: Vec<f64> = values.iter().map(|v| (v - mean).powi(2)).collect();
            sq.sort_by(f64::total_cmp);
            let variance = sq.iter().sum::<f64>() / n;

            means.push(mean);
            stds.push(variance.sqrt());
        }

        Ok(ScalerState {
            means,
            stds,
            n_samples: rows.len(),
        })
    }

    /// Fit on every row of every window
    pub fn fit_windows(windows: &[Window]) -> Result<Self> {
        let rows: Vec<Vec<f32>> = windows.iter().flatten().cloned().collect();
        Self::fit(&rows)
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    /// Whether column `col` had no spread in the fitted data
    pub fn is_constant(&self, col: usize) -> bool {
        self.stds[col] < STD_EPSILON
    }

    /// `(value - mean) / std` per column; constant columns map to 0.
    ///
    /// Any row whose width differs from the fitted width fails the whole call.
    pub fn transform(&self, rows: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        if let Some(i) = rows.iter().position(|r| r.len() != self.width()) {
            return Err(GoalError::Config(format!(
                "scaler was fitted on {} columns but row {} has {}",
                self.width(),
                i + 1,
                rows[i].len()
            )));
        }

        Ok(rows.iter().map(|row| self.transform_row(row)).collect())
    }

    pub fn transform_windows(&self, windows: &[Window]) -> Result<Vec<Window>> {
        windows.iter().map(|w| self.transform(w)).collect()
    }

    fn transform_row(&self, row: &[f32]) -> Vec<f32> {
        row.iter()
            .enumerate()
            .map(|(col, &v)| {
                if self.is_constant(col) {
                    0.0
                } else {
                    ((v as f64 - self.means[col]) / self.stds[col]) as f32
                }
            })
            .collect()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let state: ScalerState = serde_json::from_reader(std::io::BufReader::new(file))?;
        if state.stds.len() != state.means.len() {
            return Err(GoalError::Config(format!(
                "scaler has {} means but {} standard deviations",
                state.means.len(),
                state.stds.len()
            )));
        }
        Ok(state)
    }
}
