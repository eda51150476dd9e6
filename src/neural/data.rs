// projeto: lstmseqtrain
// file: src/neural/data.rs
// Loading of delimited quote tables (WTI, GOLD, US DOLLAR INDEX, ...)

use csv::{ReaderBuilder, Trim};
use log::{debug, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelimiterHint {
    #[default]
    Auto,
    Comma,
    Semicolon,
}

impl DelimiterHint {
    /// Resolves `Auto` by looking at the header line.
    pub fn resolve(self, raw: &str) -> u8 {
        match self {
            DelimiterHint::Comma => b',',
            DelimiterHint::Semicolon => b';',
            DelimiterHint::Auto => {
                let header = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                if header.contains(';') { b';' } else { b',' }
            }
        }
    }
}

/// One data line. `values` is aligned with the table header; `None` marks a
/// missing or unparsable field.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub line: usize,
    pub values: Vec<Option<f64>>,
}

/// Chronologically ordered records addressed by column name.
#[derive(Debug, Clone)]
pub struct Table {
    header: Vec<String>,
    index: HashMap<String, usize>,
    records: Vec<Record>,
    dropped_rows: usize,
}

impl Table {
    fn with_header(header: Vec<String>) -> Self {
        let mut index = HashMap::new();
        for (i, name) in header.iter().enumerate() {
            if index.contains_key(name) {
                warn!("⚠️ [DataLoader] Duplicate column '{}', keeping the first occurrence", name);
                continue;
            }
            index.insert(name.clone(), i);
        }
        Table {
            header,
            index,
            records: Vec::new(),
            dropped_rows: 0,
        }
    }

    /// Builds a table from already numeric rows (synthetic series, tests).
    /// NaN and infinities are stored as missing, like unparsable CSV fields.
    pub fn from_rows(header: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, TrainingError> {
        let mut table = Table::with_header(header);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != table.header.len() {
                return Err(TrainingError::Format(format!(
                    "row {} has {} values, header has {} columns",
                    i,
                    row.len(),
                    table.header.len()
                )));
            }
            table.records.push(Record {
                line: i + 2,
                values: row.into_iter().map(|v| Some(v).filter(|v| v.is_finite())).collect(),
            });
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.header
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows rejected by validation while parsing.
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    pub fn get(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.index_of(column)?;
        self.records.get(row)?.values.get(idx).copied().flatten()
    }

    /// All values of a column, failing on the first missing one.
    pub fn column(&self, name: &str) -> Result<Vec<f64>, TrainingError> {
        let idx = self.index_of(name).ok_or_else(|| {
            TrainingError::Format(format!("column '{}' not present in table", name))
        })?;
        self.records
            .iter()
            .enumerate()
            .map(|(row, record)| {
                record.values.get(idx).copied().flatten().ok_or_else(|| {
                    TrainingError::Format(format!(
                        "column '{}' has a missing value at row {} (line {})",
                        name, row, record.line
                    ))
                })
            })
            .collect()
    }

    /// Rows x columns matrix in the requested column order.
    pub fn select(&self, columns: &[String]) -> Result<Array2<f64>, TrainingError> {
        let mut matrix = Array2::zeros((self.len(), columns.len()));
        for (j, name) in columns.iter().enumerate() {
            let values = self.column(name)?;
            for (i, v) in values.into_iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }
        Ok(matrix)
    }

    /// First `n` rows, used to fit statistics on the training prefix only.
    pub fn head(&self, n: usize) -> Table {
        Table {
            header: self.header.clone(),
            index: self.index.clone(),
            records: self.records.iter().take(n).cloned().collect(),
            dropped_rows: 0,
        }
    }

    /// Last `n` rows, the input of a next-step forecast.
    pub fn tail(&self, n: usize) -> Table {
        let skip = self.records.len().saturating_sub(n);
        Table {
            header: self.header.clone(),
            index: self.index.clone(),
            records: self.records[skip..].to_vec(),
            dropped_rows: 0,
        }
    }
}

/// Parses one numeric field. `#N/A`, empty and unparsable text are missing.
/// A lone comma is the decimal separator. With both separators present the
/// last one is the decimal point and the other groups thousands, so
/// "1.234,5" and "1,234.5" are both 1234.5.
pub fn parse_field(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("#N/A") {
        return None;
    }
    let normalized = match (field.rfind(','), field.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => field.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => field.replace(',', ""),
        (Some(_), None) => field.replace(',', "."),
        _ => field.to_string(),
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses delimited text into a `Table`, keeping only rows whose `required`
/// columns are all present and finite.
pub fn parse_table(
    raw: &str,
    hint: DelimiterHint,
    required: &[String],
) -> Result<Table, TrainingError> {
    if raw.trim().is_empty() {
        return Err(TrainingError::Format("input is empty, header row is missing".to_string()));
    }

    let delimiter = hint.resolve(raw);
    debug!("📥 [DataLoader] Parsing with delimiter '{}'", delimiter as char);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(raw.as_bytes());

    let header: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    if header.iter().all(|h| h.is_empty()) {
        return Err(TrainingError::Format("header row is missing".to_string()));
    }

    let mut table = Table::with_header(header);

    let mut required_idx = Vec::with_capacity(required.len());
    for name in required {
        let idx = table.index_of(name).ok_or_else(|| {
            TrainingError::Format(format!(
                "required column '{}' not found in header {:?}",
                name, table.header
            ))
        })?;
        required_idx.push(idx);
    }

    let width = table.header.len();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(row + 2);

        let mut values: Vec<Option<f64>> = record.iter().take(width).map(parse_field).collect();
        values.resize(width, None);

        if let Some(&bad) = required_idx.iter().find(|&&idx| values[idx].is_none()) {
            debug!(
                "[DataLoader] Dropping line {}: column '{}' is missing or not finite",
                line, table.header[bad]
            );
            table.dropped_rows += 1;
            continue;
        }

        table.records.push(Record { line, values });
    }

    if table.records.is_empty() {
        return Err(TrainingError::Format(format!(
            "no valid rows survived validation ({} dropped)",
            table.dropped_rows
        )));
    }

    info!(
        "✅ [DataLoader] Loaded {} valid records ({} dropped, {} columns)",
        table.len(),
        table.dropped_rows,
        table.header.len()
    );
    Ok(table)
}

pub fn load_table(
    path: impl AsRef<Path>,
    hint: DelimiterHint,
    required: &[String],
) -> Result<Table, TrainingError> {
    let path = path.as_ref();
    info!("📥 [DataLoader] Reading {}", path.display());
    let raw = fs::read_to_string(path)?;
    parse_table(&raw, hint, required)
}
