//! Per-entity sequence windows built from time-ordered rows
//!
//! Each entity (team, player) is sorted by its time key and sliced into
//! windows of `sequence_length` consecutive feature rows. Windows never
//! cross entity boundaries.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::Table;
use crate::{GoalError, Result};

/// Time-ordered feature rows of a single entity
pub type Window = Vec<Vec<f32>>;

/// One training example: a window and the goals that follow it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceSample {
    pub window: Window,
    pub target: f32,
}

impl SequenceSample {
    /// Length-1 window around a single row
    pub fn single(row: Vec<f32>, target: f32) -> Self {
        SequenceSample {
            window: vec![row],
            target,
        }
    }

    pub fn seq_len(&self) -> usize {
        self.window.len()
    }

    pub fn width(&self) -> usize {
        self.window.first().map(|r| r.len()).unwrap_or(0)
    }
}

/// Check all samples share one window length and one row width.
///
/// Returns `(seq_len, width)`.
pub fn sample_shape(samples: &[SequenceSample]) -> Result<(usize, usize)> {
    let first = samples
        .first()
        .ok_or_else(|| GoalError::Data("no samples".to_string()))?;
    let (seq_len, width) = (first.seq_len(), first.width());
    if seq_len == 0 || width == 0 {
        return Err(GoalError::Data("sample 1 has an empty window".to_string()));
    }

    for (i, sample) in samples.iter().enumerate() {
        if sample.seq_len() != seq_len {
            return Err(GoalError::Data(format!(
                "sample {} has {} steps, expected {}",
                i + 1,
                sample.seq_len(),
                seq_len
            )));
        }
        if let Some(row) = sample.window.iter().find(|r| r.len() != width) {
            return Err(GoalError::Data(format!(
                "sample {} has a row of {} features, expected {}",
                i + 1,
                row.len(),
                width
            )));
        }
    }

    Ok((seq_len, width))
}

/// Where a window's target comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Target column of the row right after the window
    NextStep,
    /// Target column of the window's own (single) row
    SameRow,
}

/// Builds `(window, target)` samples from a per-entity table
#[derive(Debug, Clone)]
pub struct SequenceBuilder {
    pub feature_columns: Vec<String>,
    pub entity_column: String,
    pub time_column: String,
    pub target_column: String,
    pub sequence_length: usize,
    pub target_mode: TargetMode,
}

impl SequenceBuilder {
    /// Look-ahead builder: `sequence_length` rows predict the next row's target
    pub fn next_step(
        feature_columns: Vec<String>,
        entity_column: &str,
        time_column: &str,
        target_column: &str,
        sequence_length: usize,
    ) -> Self {
        SequenceBuilder {
            feature_columns,
            entity_column: entity_column.to_string(),
            time_column: time_column.to_string(),
            target_column: target_column.to_string(),
            sequence_length,
            target_mode: TargetMode::NextStep,
        }
    }

    /// One row per window, target taken from the same row
    pub fn per_row(
        feature_columns: Vec<String>,
        entity_column: &str,
        time_column: &str,
        target_column: &str,
    ) -> Self {
        SequenceBuilder {
            feature_columns,
            entity_column: entity_column.to_string(),
            time_column: time_column.to_string(),
            target_column: target_column.to_string(),
            sequence_length: 1,
            target_mode: TargetMode::SameRow,
        }
    }

    /// Every column that isn't the entity, time or target column
    pub fn default_feature_columns(
        table: &Table,
        entity_column: &str,
        time_column: &str,
        target_column: &str,
    ) -> Vec<String> {
        table
            .headers()
            .iter()
            .filter(|h| {
                h.as_str() != entity_column && h.as_str() != time_column && h.as_str() != target_column
            })
            .cloned()
            .collect()
    }

    pub fn build(&self, table: &Table) -> Result<Vec<SequenceSample>> {
        if self.sequence_length == 0 {
            return Err(GoalError::Config("sequence length must be at least 1".to_string()));
        }
        if self.target_mode == TargetMode::SameRow && self.sequence_length != 1 {
            return Err(GoalError::Config(
                "same-row targets require a sequence length of 1".to_string(),
            ));
        }
        if self.feature_columns.is_empty() {
            return Err(GoalError::Config("no feature columns selected".to_string()));
        }

        // All columns resolved before any row is touched
        let feature_idx = table.require_columns(&self.feature_columns)?;
        let key_idx = table.require_columns(&[
            self.entity_column.clone(),
            self.time_column.clone(),
            self.target_column.clone(),
        ])?;
        let (entity_idx, time_idx, target_idx) = (key_idx[0], key_idx[1], key_idx[2]);

        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, row) in table.rows().iter().enumerate() {
            groups.entry(row[entity_idx].as_str()).or_default().push(i);
        }

        let times: Vec<&str> = table.rows().iter().map(|r| r[time_idx].as_str()).collect();
        let keys = time_keys(&times);

        let mut samples = Vec::new();
        for (entity, mut rows) in groups {
            rows.sort_by(|&a, &b| keys[a].compare(&keys[b]));

            match self.target_mode {
                TargetMode::SameRow => {
                    for &r in &rows {
                        let features = row_features(table, r, &feature_idx)?;
                        let target = table.numeric_cell(r, target_idx)?;
                        samples.push(SequenceSample::single(features, target));
                    }
                }
                TargetMode::NextStep => {
                    if rows.len() < self.sequence_length + 1 {
                        log::debug!(
                            "Skipping entity {}: {} rows, need {}",
                            entity,
                            rows.len(),
                            self.sequence_length + 1
                        );
                        continue;
                    }
                    let features = rows
                        .iter()
                        .map(|&r| row_features(table, r, &feature_idx))
                        .collect::<Result<Vec<_>>>()?;

                    for start in 0..rows.len() - self.sequence_length {
                        let end = start + self.sequence_length;
                        samples.push(SequenceSample {
                            window: features[start..end].to_vec(),
                            target: table.numeric_cell(rows[end], target_idx)?,
                        });
                    }
                }
            }
        }

        log::debug!("Built {} samples from {} rows", samples.len(), table.len());
        Ok(samples)
    }
}

fn row_features(table: &Table, row: usize, columns: &[usize]) -> Result<Vec<f32>> {
    columns
        .iter()
        .map(|&col| table.numeric_cell(row, col))
        .collect()
}

/// Parsed time column. The whole column is read with one interpretation.
#[derive(Debug, Clone, PartialEq)]
enum TimeKey<'a> {
    Number(f64),
    Date(NaiveDate),
    Text(&'a str),
}

impl TimeKey<'_> {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (TimeKey::Number(x), TimeKey::Number(y)) => x.total_cmp(y),
            (TimeKey::Date(x), TimeKey::Date(y)) => x.cmp(y),
            (TimeKey::Text(x), TimeKey::Text(y)) => x.cmp(y),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TimeKey::Number(_) => 0,
            TimeKey::Date(_) => 1,
            TimeKey::Text(_) => 2,
        }
    }
}

/// Numbers if every value is numeric, else dates if every value is an ISO
/// date, else text
fn time_keys<'a>(values: &[&'a str]) -> Vec<TimeKey<'a>> {
    let numbers: Option<Vec<f64>> = values.iter().map(|v| v.parse::<f64>().ok()).collect();
    if let Some(numbers) = numbers {
        return numbers.into_iter().map(TimeKey::Number).collect();
    }
    let dates: Option<Vec<NaiveDate>> = values.iter().map(|v| parse_date(v)).collect();
    if let Some(dates) = dates {
        return dates.into_iter().map(TimeKey::Date).collect();
    }
    values.iter().map(|v| TimeKey::Text(*v)).collect()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    // Match dates often carry a midnight time suffix
    let date_part = s.split_whitespace().next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> Table {
        Table::from_bytes(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_next_step_windows() {
        let t = table(
            "team,date,f1,goals\n\
             a,2020-01-03,3,30\n\
             a,2020-01-01,1,10\n\
             b,2020-01-01,100,1\n\
             a,2020-01-02,2,20\n\
             b,2020-01-02,200,2\n\
             b,2020-01-03,300,3\n",
        );
        let builder = SequenceBuilder::next_step(vec!["f1".into()], "team", "date", "goals", 2);
        let samples = builder.build(&t).unwrap();

        // One window per entity with exactly three rows
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].window, vec![vec![1.0], vec![2.0]]);
        assert_eq!(samples[0].target, 30.0);
        assert_eq!(samples[1].window, vec![vec![100.0], vec![200.0]]);
        assert_eq!(samples[1].target, 3.0);
    }

    #[test]
    fn test_windows_never_mix_entities() {
        let t = table(
            "team,t,f1,goals\n\
             a,1,1,0\n\
             a,2,2,0\n\
             b,1,10,0\n\
             b,2,20,0\n\
             b,3,30,0\n",
        );
        let builder = SequenceBuilder::next_step(vec!["f1".into()], "team", "t", "goals", 1);
        let samples = builder.build(&t).unwrap();
        assert_eq!(samples.len(), 3);
        let windows: Vec<f32> = samples.iter().map(|s| s.window[0][0]).collect();
        assert_eq!(windows, vec![1.0, 10.0, 20.0]);
    }

    #[test]
    fn test_short_entities_dropped() {
        let t = table("team,t,f1,goals\na,1,1,0\na,2,2,0\nb,1,5,0\n");
        let builder = SequenceBuilder::next_step(vec!["f1".into()], "team", "t", "goals", 2);
        assert!(builder.build(&t).unwrap().is_empty());
    }

    #[test]
    fn test_same_row_targets() {
        let t = table("team,t,f1,f2,goals\na,2,3,4,1\na,1,1,2,5\n");
        let builder = SequenceBuilder::per_row(vec!["f1".into(), "f2".into()], "team", "t", "goals");
        let samples = builder.build(&t).unwrap();
        assert_eq!(samples[0], SequenceSample::single(vec![1.0, 2.0], 5.0));
        assert_eq!(samples[1], SequenceSample::single(vec![3.0, 4.0], 1.0));
    }

    #[test]
    fn test_missing_column_before_rows() {
        // Bad cell would fail row parsing; the missing column must win
        let t = table("team,t,f1,goals\na,1,oops,0\n");
        let builder =
            SequenceBuilder::next_step(vec!["f1".into(), "f9".into()], "team", "t", "goals", 1);
        let err = builder.build(&t).unwrap_err();
        assert!(matches!(err, GoalError::Config(ref m) if m.contains("f9")), "{:?}", err);
    }

    #[test]
    fn test_zero_sequence_length() {
        let t = table("team,t,f1,goals\na,1,1,0\n");
        let builder = SequenceBuilder::next_step(vec!["f1".into()], "team", "t", "goals", 0);
        assert!(matches!(builder.build(&t), Err(GoalError::Config(_))));
    }

    #[test]
    fn test_time_key_ordering() {
        let numeric = time_keys(&["9", "10"]);
        assert_eq!(numeric[0].compare(&numeric[1]), Ordering::Less);

        let dates = time_keys(&["2008-12-01", "2009-01-01"]);
        assert_eq!(dates[0].compare(&dates[1]), Ordering::Less);

        let stamped = time_keys(&["2009-01-02 00:00:00", "2009-01-01 00:00:00"]);
        assert_eq!(stamped[0].compare(&stamped[1]), Ordering::Greater);

        let text = time_keys(&["b", "a"]);
        assert_eq!(text[0].compare(&text[1]), Ordering::Greater);
    }

    #[test]
    fn test_mixed_time_column_sorts_as_text() {
        let keys = time_keys(&["5", "100", "2020-01-01"]);
        assert!(keys.iter().all(|k| matches!(k, TimeKey::Text(_))));

        // Any input order yields the same sequence of targets
        let rows = [("5", "1", "50"), ("100", "2", "100"), ("2020-01-01", "3", "7")];
        let orders = [[0, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]];
        let builder = SequenceBuilder::next_step(vec!["f1".into()], "team", "t", "goals", 1);
        let mut results = Vec::new();
        for order in orders {
            let mut csv = String::from("team,t,f1,goals\n");
            for i in order {
                let (t, f, g) = rows[i];
                csv.push_str(&format!("a,{},{},{}\n", t, f, g));
            }
            let samples = builder.build(&table(&csv)).unwrap();
            results.push(samples);
        }

        // Text order: "100" < "2020-01-01" < "5"
        assert_eq!(results[0][0].window, vec![vec![2.0]]);
        assert_eq!(results[0][0].target, 7.0);
        assert_eq!(results[0][1].target, 50.0);
        assert!(results.iter().all(|r| r == &results[0]));
    }

    #[test]
    fn test_default_feature_columns() {
        let t = table("team,t,f1,f2,goals\na,1,1,2,0\n");
        let cols = SequenceBuilder::default_feature_columns(&t, "team", "t", "goals");
        assert_eq!(cols, vec!["f1", "f2"]);
    }

    #[test]
    fn test_sample_shape() {
        let samples = vec![
            SequenceSample::single(vec![1.0, 2.0], 0.0),
            SequenceSample::single(vec![3.0, 4.0], 1.0),
        ];
        assert_eq!(sample_shape(&samples).unwrap(), (1, 2));

        let ragged = vec![
            SequenceSample::single(vec![1.0, 2.0], 0.0),
            SequenceSample::single(vec![3.0], 1.0),
        ];
        assert!(matches!(sample_shape(&ragged), Err(GoalError::Data(_))));
        assert!(sample_shape(&[]).is_err());
    }
}
