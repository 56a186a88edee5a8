//! Delimited text tables with a header row

use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim, WriterBuilder};

use crate::{GoalError, Result};

/// A parsed CSV: column names plus rows of raw cells
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Create a table, checking every row has one cell per header
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if headers.is_empty() {
            return Err(GoalError::Data("table has no columns".to_string()));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != headers.len()) {
            return Err(GoalError::Data(format!(
                "row {} has {} cells, header has {}",
                i + 1,
                row.len(),
                headers.len()
            )));
        }
        Ok(Table { headers, rows })
    }

    /// Parse CSV text. Empty input and header-only input are rejected.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| GoalError::Data(format!("malformed CSV header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(GoalError::Data("file is empty".to_string()));
        }

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(|e| GoalError::Data(format!("malformed CSV: {}", e)))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        if rows.is_empty() {
            return Err(GoalError::Data("file has a header but no rows".to_string()));
        }

        Table::new(headers, rows)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(bytes)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Resolve every name up front; the first missing one is a configuration error
    pub fn require_columns(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| GoalError::Config(format!("missing column '{}'", name)))
            })
            .collect()
    }

    /// Copy of the table without `name`. Absent columns are left alone.
    pub fn without_column(&self, name: &str) -> Table {
        match self.column_index(name) {
            None => self.clone(),
            Some(idx) => Table {
                headers: remove_at(&self.headers, idx),
                rows: self.rows.iter().map(|r| remove_at(r, idx)).collect(),
            },
        }
    }

    /// Append a column of values, one per row
    pub fn with_column(&self, name: &str, values: &[String]) -> Result<Table> {
        if values.len() != self.rows.len() {
            return Err(GoalError::Data(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        let mut headers = self.headers.clone();
        headers.push(name.to_string());
        let rows = self
            .rows
            .iter()
            .zip(values)
            .map(|(row, v)| {
                let mut row = row.clone();
                row.push(v.clone());
                row
            })
            .collect();
        Ok(Table { headers, rows })
    }

    /// Parse one cell as a finite number. `NaN` and `inf` are rejected.
    pub fn numeric_cell(&self, row: usize, col: usize) -> Result<f32> {
        let cell = &self.rows[row][col];
        match cell.parse::<f32>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(GoalError::Data(format!(
                "row {}, column '{}': '{}' is not a finite number",
                row + 1,
                self.headers[col],
                cell
            ))),
        }
    }

    /// Numeric matrix of the given columns, rows in table order
    pub fn numeric_rows(&self, columns: &[usize]) -> Result<Vec<Vec<f32>>> {
        (0..self.rows.len())
            .map(|row| {
                columns
                    .iter()
                    .map(|&col| self.numeric_cell(row, col))
                    .collect()
            })
            .collect()
    }

    /// Numeric matrix of every column
    pub fn to_matrix(&self) -> Result<Vec<Vec<f32>>> {
        let all: Vec<usize> = (0..self.headers.len()).collect();
        self.numeric_rows(&all)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = WriterBuilder::new().from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn remove_at(values: &[String], idx: usize) -> Vec<String> {
    values
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != idx)
        .map(|(_, v)| v.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table() {
        let table = Table::from_bytes(b"a,b,c\n1,2,3\n4, 5 ,6\n").unwrap();
        assert_eq!(table.headers(), &["a", "b", "c"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.to_matrix().unwrap(), vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_empty_input() {
        let err = Table::from_bytes(b"").unwrap_err();
        assert!(matches!(err, GoalError::Data(_)), "got {:?}", err);

        let err = Table::from_bytes(b"a,b\n").unwrap_err();
        assert!(matches!(err, GoalError::Data(_)), "got {:?}", err);
    }

    #[test]
    fn test_ragged_rows() {
        let err = Table::from_bytes(b"a,b\n1,2\n3\n").unwrap_err();
        assert!(matches!(err, GoalError::Data(_)), "got {:?}", err);
    }

    #[test]
    fn test_non_numeric_cell() {
        let table = Table::from_bytes(b"a,b\n1,x\n").unwrap();
        let err = table.to_matrix().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("row 1"), "{}", msg);
        assert!(msg.contains("'b'"), "{}", msg);
    }

    #[test]
    fn test_non_finite_cells_rejected() {
        let table = Table::from_bytes(b"a,b\n1,NaN\ninf,2\n-infinity,3\n").unwrap();
        let err = table.numeric_cell(0, 1).unwrap_err();
        assert!(matches!(err, GoalError::Data(ref m) if m.contains("row 1, column 'b'")), "{:?}", err);
        assert!(table.numeric_cell(1, 0).is_err());
        assert!(table.numeric_cell(2, 0).is_err());
        assert_eq!(table.numeric_cell(1, 1).unwrap(), 2.0);
        assert!(table.to_matrix().is_err());
    }

    #[test]
    fn test_without_column() {
        let table = Table::from_bytes(b"a,label,b\n1,2,3\n").unwrap();
        let dropped = table.without_column("label");
        assert_eq!(dropped.headers(), &["a", "b"]);
        assert_eq!(dropped.rows()[0], vec!["1", "3"]);

        let untouched = dropped.without_column("label");
        assert_eq!(untouched, dropped);
    }

    #[test]
    fn test_with_column() {
        let table = Table::from_bytes(b"a\n1\n2\n").unwrap();
        let out = table
            .with_column("pred", &["3".to_string(), "4".to_string()])
            .unwrap();
        assert_eq!(out.headers(), &["a", "pred"]);
        assert_eq!(out.rows()[1], vec!["2", "4"]);

        assert!(table.with_column("pred", &["3".to_string()]).is_err());
    }

    #[test]
    fn test_require_columns() {
        let table = Table::from_bytes(b"a,b\n1,2\n").unwrap();
        assert_eq!(table.require_columns(&["b".into(), "a".into()]).unwrap(), vec![1, 0]);
        let err = table.require_columns(&["a".into(), "zz".into()]).unwrap_err();
        assert!(matches!(err, GoalError::Config(ref m) if m.contains("zz")));
    }
}
