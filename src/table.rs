//! Uploaded CSV parsing into a time-indexed feature table.

use std::collections::HashSet;
use std::io::Cursor;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use ndarray::Array2;
use thiserror::Error;

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "utc_time";

const NAIVE_TIMESTAMP_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

const OFFSET_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Could not read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Could not read CSV: file has no header row")]
    Empty,
    #[error("Duplicate column in CSV header: {0}")]
    DuplicateColumn(String),
    #[error("CSV must contain {0} column")]
    MissingTimestampColumn(String),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Unexpected column not known to the model: {0}")]
    UnexpectedColumn(String),
    #[error("Could not parse {column} column: invalid timestamp '{value}' at data row {row}")]
    InvalidTimestamp {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Invalid numeric value '{value}' in column {column} at data row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("column {column} has {found} values, expected {expected}")]
    ColumnLength {
        column: String,
        found: usize,
        expected: usize,
    },
}

/// Header plus string records of an uploaded CSV, not yet typed.
#[derive(Debug, Clone)]
pub struct RawCsv {
    headers: Vec<String>,
    records: Vec<StringRecord>,
}

impl RawCsv {
    pub fn parse(bytes: &[u8]) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(Cursor::new(bytes));

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(TableError::Empty);
        }

        let mut seen = HashSet::new();
        for header in &headers {
            if !seen.insert(header.as_str()) {
                return Err(TableError::DuplicateColumn(header.clone()));
            }
        }

        let mut records = Vec::new();
        for record in reader.records() {
            records.push(record?);
        }

        Ok(Self { headers, records })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, TableError> {
        self.column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    pub fn parse_timestamps(&self, column: &str) -> Result<Vec<DateTime<Utc>>, TableError> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| TableError::MissingTimestampColumn(column.to_string()))?;

        self.records
            .iter()
            .enumerate()
            .map(|(row, record)| {
                let raw = record.get(idx).unwrap_or_default();
                parse_utc_timestamp(raw).ok_or_else(|| TableError::InvalidTimestamp {
                    column: column.to_string(),
                    row: row + 1,
                    value: raw.to_string(),
                })
            })
            .collect()
    }

    /// Parses one numeric column; empty and NaN-like cells become `f64::NAN`.
    pub fn parse_values(&self, column: &str) -> Result<Vec<f64>, TableError> {
        let idx = self.require_column(column)?;

        self.records
            .iter()
            .enumerate()
            .map(|(row, record)| {
                let raw = record.get(idx).unwrap_or_default();
                parse_cell(raw).ok_or_else(|| TableError::InvalidValue {
                    column: column.to_string(),
                    row: row + 1,
                    value: raw.to_string(),
                })
            })
            .collect()
    }
}

/// Time-indexed table with an explicit feature column order.
///
/// Values are stored column-major; missing cells are `NaN` until imputation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesTable {
    timestamps: Vec<DateTime<Utc>>,
    feature_names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl TimeSeriesTable {
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        feature_names: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self, TableError> {
        if feature_names.len() != columns.len() {
            return Err(TableError::ColumnLength {
                column: "<feature names>".to_string(),
                found: feature_names.len(),
                expected: columns.len(),
            });
        }
        for (name, values) in feature_names.iter().zip(&columns) {
            if values.len() != timestamps.len() {
                return Err(TableError::ColumnLength {
                    column: name.clone(),
                    found: values.len(),
                    expected: timestamps.len(),
                });
            }
        }

        Ok(Self {
            timestamps,
            feature_names,
            columns,
        })
    }

    /// Every non-timestamp column becomes a feature, in header order.
    pub fn from_csv(raw: &RawCsv, timestamp_column: &str) -> Result<Self, TableError> {
        let feature_names: Vec<String> = raw
            .headers()
            .iter()
            .filter(|h| h.as_str() != timestamp_column)
            .cloned()
            .collect();
        Self::from_csv_columns(raw, timestamp_column, &feature_names)
    }

    /// Only the named columns become features, in the given order.
    pub fn from_csv_columns(
        raw: &RawCsv,
        timestamp_column: &str,
        feature_names: &[String],
    ) -> Result<Self, TableError> {
        let timestamps = raw.parse_timestamps(timestamp_column)?;
        let columns = feature_names
            .iter()
            .map(|name| raw.parse_values(name))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(timestamps, feature_names.to_vec(), columns)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn column(&self, idx: usize) -> &[f64] {
        &self.columns[idx]
    }

    pub fn columns_mut(&mut self) -> impl Iterator<Item = &mut Vec<f64>> {
        self.columns.iter_mut()
    }

    pub fn missing_count(&self) -> usize {
        self.columns
            .iter()
            .map(|values| values.iter().filter(|v| v.is_nan()).count())
            .sum()
    }

    /// Features must be exactly `order`: surplus headers are rejected before any
    /// cell is parsed, then columns are read in `order`.
    pub fn from_csv_exact(
        raw: &RawCsv,
        timestamp_column: &str,
        order: &[String],
    ) -> Result<Self, TableError> {
        if raw.column_index(timestamp_column).is_none() {
            return Err(TableError::MissingTimestampColumn(
                timestamp_column.to_string(),
            ));
        }
        if let Some(extra) = raw
            .headers()
            .iter()
            .find(|h| h.as_str() != timestamp_column && !order.contains(h))
        {
            return Err(TableError::UnexpectedColumn(extra.clone()));
        }
        if let Some(missing) = order.iter().find(|name| raw.column_index(name).is_none()) {
            return Err(TableError::MissingColumn(missing.clone()));
        }

        Self::from_csv_columns(raw, timestamp_column, order)
    }

    /// Writes the timestamp column then every feature, timestamps as
    /// `YYYY-MM-DD HH:MM:SS` UTC.
    pub fn write_csv<W: std::io::Write>(
        &self,
        timestamp_column: &str,
        out: W,
    ) -> Result<(), TableError> {
        let mut writer = csv::Writer::from_writer(out);
        let mut header = Vec::with_capacity(self.n_features() + 1);
        header.push(timestamp_column);
        header.extend(self.feature_names.iter().map(String::as_str));
        writer.write_record(&header)?;

        for (row, ts) in self.timestamps.iter().enumerate() {
            let mut record = Vec::with_capacity(self.n_features() + 1);
            record.push(ts.format("%Y-%m-%d %H:%M:%S").to_string());
            record.extend(self.columns.iter().map(|col| col[row].to_string()));
            writer.write_record(&record)?;
        }
        writer
            .flush()
            .map_err(|err| TableError::Csv(csv::Error::from(err)))
    }

    /// Last `rows` rows as a `(rows, n_features)` matrix, or fewer if the table is shorter.
    pub fn tail_matrix(&self, rows: usize) -> Array2<f64> {
        let take = rows.min(self.len());
        let start = self.len() - take;
        Array2::from_shape_fn((take, self.n_features()), |(r, c)| {
            self.columns[c][start + r]
        })
    }
}

pub fn parse_utc_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_cell(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(f64::NAN);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" | "na" | "n/a" | "null" | "none" => return Some(f64::NAN),
        _ => {}
    }

    let value = trimmed.parse::<f64>().ok()?;
    if value.is_finite() {
        Some(value)
    } else {
        Some(f64::NAN)
    }
}
