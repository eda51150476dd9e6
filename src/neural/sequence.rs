// projeto: lstmseqtrain
// file: src/neural/sequence.rs
// Sliding-window sequence construction and chronological train/test split

use log::{debug, info, warn};
use ndarray::{Array1, Array2, Array3, s};
use serde::{Deserialize, Serialize};

use crate::neural::scaler::ScaledTable;
use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Scaled value of each target column.
    #[default]
    Value,
    /// 1.0 when the raw next-step return is positive, else 0.0.
    Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub length: usize,
    pub train_fraction: f64,
    /// Steps between the last window row and the target row (1 = next row).
    pub horizon: usize,
    pub target_mode: TargetMode,
    pub feature_columns: Vec<String>,
    pub target_columns: Vec<String>,
}

impl SequenceConfig {
    /// Minimum row count: more than `length + horizon - 1` rows are needed.
    pub fn required_rows(&self) -> usize {
        self.length + self.horizon - 1
    }

    fn validate(&self) -> Result<(), TrainingError> {
        if self.length == 0 || self.horizon == 0 {
            return Err(TrainingError::PreconditionViolation(
                "sequence length and horizon must be at least 1".to_string(),
            ));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(TrainingError::PreconditionViolation(format!(
                "train fraction must be in (0, 1), got {}",
                self.train_fraction
            )));
        }
        if self.feature_columns.is_empty() || self.target_columns.is_empty() {
            return Err(TrainingError::PreconditionViolation(
                "feature and target column lists must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// `length` consecutive feature rows and the target drawn from
/// `source_index`, the row the window predicts.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub source_index: usize,
    pub features: Array2<f64>,
    pub target: Array1<f64>,
}

impl Window {
    fn is_finite(&self) -> bool {
        self.features.iter().chain(self.target.iter()).all(|v| v.is_finite())
    }
}

/// Windows in ascending chronological order.
#[derive(Debug, Clone, Default)]
pub struct WindowSet {
    pub windows: Vec<Window>,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn first_source_index(&self) -> Option<usize> {
        self.windows.first().map(|w| w.source_index)
    }

    pub fn last_source_index(&self) -> Option<usize> {
        self.windows.last().map(|w| w.source_index)
    }

    /// (windows, length, features) tensor.
    pub fn features_tensor(&self) -> Array3<f64> {
        let (len, n_features) = self
            .windows
            .first()
            .map(|w| w.features.dim())
            .unwrap_or((0, 0));
        let mut tensor = Array3::zeros((self.windows.len(), len, n_features));
        for (i, w) in self.windows.iter().enumerate() {
            tensor.slice_mut(s![i, .., ..]).assign(&w.features);
        }
        tensor
    }

    /// (windows, targets) matrix.
    pub fn targets_matrix(&self) -> Array2<f64> {
        let n_targets = self.windows.first().map(|w| w.target.len()).unwrap_or(0);
        let mut matrix = Array2::zeros((self.windows.len(), n_targets));
        for (i, w) in self.windows.iter().enumerate() {
            matrix.row_mut(i).assign(&w.target);
        }
        matrix
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub train: WindowSet,
    pub test: WindowSet,
    /// Windows skipped for containing non-finite values.
    pub discarded: usize,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sequence_length(&self) -> usize {
        self.train.windows.first().map(|w| w.features.nrows()).unwrap_or(0)
    }

    pub fn feature_count(&self) -> usize {
        self.train.windows.first().map(|w| w.features.ncols()).unwrap_or(0)
    }

    pub fn target_count(&self) -> usize {
        self.train.windows.first().map(|w| w.target.len()).unwrap_or(0)
    }
}

/// Number of leading rows that only training windows touch, so statistics
/// fitted on them never see a test target.
pub fn train_visible_rows(rows: usize, config: &SequenceConfig) -> usize {
    if rows <= config.required_rows() {
        return rows;
    }
    let window_count = rows - config.required_rows();
    let split = (window_count as f64 * config.train_fraction).floor() as usize;
    (split + config.required_rows()).min(rows)
}

fn column_indices(table: &ScaledTable, columns: &[String]) -> Result<Vec<usize>, TrainingError> {
    columns
        .iter()
        .map(|name| {
            table.column_index(name).ok_or_else(|| {
                TrainingError::Format(format!("column '{}' is not part of the scaled table", name))
            })
        })
        .collect()
}

/// Slides the window over `table` and splits the result at
/// `floor(windows * train_fraction)`.
pub fn build(table: &ScaledTable, config: &SequenceConfig) -> Result<Dataset, TrainingError> {
    config.validate()?;

    let rows = table.rows();
    if rows <= config.required_rows() {
        return Err(TrainingError::InsufficientData {
            rows,
            required: config.required_rows(),
        });
    }

    let feature_idx = column_indices(table, &config.feature_columns)?;
    let target_idx = column_indices(table, &config.target_columns)?;
    debug!(
        "🔧 [Sequences] length {} horizon {} over {} rows",
        config.length, config.horizon, rows
    );

    let mut windows = Vec::with_capacity(rows - config.required_rows());
    let mut discarded = 0;

    for t in config.required_rows()..rows {
        let start = t + 1 - config.horizon - config.length;
        let mut features = Array2::zeros((config.length, feature_idx.len()));
        for (j, &col) in feature_idx.iter().enumerate() {
            features
                .column_mut(j)
                .assign(&table.values.slice(s![start..start + config.length, col]));
        }

        let target = match config.target_mode {
            TargetMode::Value => Array1::from_iter(target_idx.iter().map(|&c| table.values[[t, c]])),
            TargetMode::Direction => Array1::from_iter(target_idx.iter().map(|&c| {
                let current = table.raw[[t - 1, c]];
                let next = table.raw[[t, c]];
                let ret = (next - current) / current;
                if !ret.is_finite() {
                    f64::NAN
                } else if ret > 0.0 {
                    1.0
                } else {
                    0.0
                }
            })),
        };

        let window = Window {
            source_index: t,
            features,
            target,
        };
        if !window.is_finite() {
            debug!("[Sequences] Discarding window targeting row {}: non-finite values", t);
            discarded += 1;
            continue;
        }
        windows.push(window);
    }

    if discarded > 0 {
        warn!("⚠️ [Sequences] Discarded {} windows with non-finite values", discarded);
    }

    let split = (windows.len() as f64 * config.train_fraction).floor() as usize;
    let test_windows = windows.split_off(split);
    let dataset = Dataset {
        train: WindowSet { windows },
        test: WindowSet {
            windows: test_windows,
        },
        discarded,
    };

    if dataset.train.is_empty() || dataset.test.is_empty() {
        return Err(TrainingError::InsufficientData {
            rows,
            required: config.required_rows() + 1,
        });
    }

    info!(
        "✅ [Sequences] {} windows → train {} | test {}",
        dataset.len(),
        dataset.train.len(),
        dataset.test.len()
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::Table;
    use crate::neural::scaler::{ColumnScaler, ScalerKind};

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn scaled(rows: usize) -> ScaledTable {
        let data = (0..rows)
            .map(|i| vec![i as f64 + 1.0, 100.0 - i as f64, (i % 3) as f64])
            .collect();
        let table = Table::from_rows(names(&["WTI", "GOLD", "USD"]), data).unwrap();
        let cols = names(&["WTI", "GOLD", "USD"]);
        ColumnScaler::new(ScalerKind::MinMax)
            .fit(&table, &cols)
            .unwrap()
            .transform(&table)
            .unwrap()
    }

    fn config(length: usize) -> SequenceConfig {
        SequenceConfig {
            length,
            train_fraction: 0.8,
            horizon: 1,
            target_mode: TargetMode::Value,
            feature_columns: names(&["WTI", "GOLD", "USD"]),
            target_columns: names(&["WTI"]),
        }
    }

    #[test]
    fn test_window_alignment() {
        let table = scaled(10);
        let dataset = build(&table, &config(3)).unwrap();
        assert_eq!(dataset.len(), 7);
        let first = &dataset.train.windows[0];
        assert_eq!(first.source_index, 3);
        assert_eq!(first.features.dim(), (3, 3));
        assert_eq!(first.features[[0, 0]], table.values[[0, 0]]);
        assert_eq!(first.features[[2, 0]], table.values[[2, 0]]);
        assert_eq!(first.target[0], table.values[[3, 0]]);
    }

    #[test]
    fn test_split_is_chronological_and_complete() {
        let table = scaled(50);
        let dataset = build(&table, &config(10)).unwrap();
        // 40 windows, floor(40 * 0.8) = 32
        assert_eq!(dataset.train.len(), 32);
        assert_eq!(dataset.test.len(), 8);
        assert_eq!(dataset.train.len() + dataset.test.len(), 40);
        assert!(dataset.train.last_source_index().unwrap() < dataset.test.first_source_index().unwrap());
        let all: Vec<usize> = dataset
            .train
            .windows
            .iter()
            .chain(dataset.test.windows.iter())
            .map(|w| w.source_index)
            .collect();
        assert_eq!(all, (10..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_insufficient_rows_boundary() {
        let table = scaled(30);
        let err = build(&table, &config(30)).unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientData { rows: 30, required: 30 }));
        // 31 rows give a single window, which cannot fill both partitions
        assert!(matches!(
            build(&scaled(31), &config(30)),
            Err(TrainingError::InsufficientData { .. })
        ));
        assert!(build(&scaled(36), &config(30)).is_ok());
    }

    #[test]
    fn test_horizon_skips_rows() {
        let table = scaled(12);
        let mut cfg = config(3);
        cfg.horizon = 2;
        let dataset = build(&table, &cfg).unwrap();
        let first = &dataset.train.windows[0];
        assert_eq!(first.source_index, 4);
        assert_eq!(first.features[[2, 0]], table.values[[2, 0]]);
        assert_eq!(first.target[0], table.values[[4, 0]]);
        assert_eq!(dataset.len(), 8);
    }

    #[test]
    fn test_direction_labels() {
        let table = scaled(20);
        let mut cfg = config(4);
        cfg.target_mode = TargetMode::Direction;
        cfg.target_columns = names(&["WTI", "GOLD"]);
        let dataset = build(&table, &cfg).unwrap();
        for w in dataset.train.windows.iter().chain(dataset.test.windows.iter()) {
            // WTI rises every row, GOLD falls every row
            assert_eq!(w.target.to_vec(), vec![1.0, 0.0]);
        }
    }

    #[test]
    fn test_non_finite_windows_are_discarded() {
        let mut table = scaled(20);
        table.values[[5, 1]] = f64::NAN;
        let dataset = build(&table, &config(3)).unwrap();
        // row 5 appears in the windows targeting rows 6, 7, 8
        assert_eq!(dataset.discarded, 3);
        assert_eq!(dataset.len(), 17 - 3);
        assert!(
            dataset
                .train
                .windows
                .iter()
                .all(|w| ![6, 7, 8].contains(&w.source_index))
        );
    }

    #[test]
    fn test_tensors() {
        let dataset = build(&scaled(20), &config(5)).unwrap();
        let x = dataset.train.features_tensor();
        let y = dataset.train.targets_matrix();
        assert_eq!(x.dim(), (dataset.train.len(), 5, 3));
        assert_eq!(y.dim(), (dataset.train.len(), 1));
        assert_eq!(x[[1, 0, 0]], dataset.train.windows[1].features[[0, 0]]);
    }

    #[test]
    fn test_train_visible_rows() {
        let cfg = config(10);
        // 40 windows, 32 train windows, last train target at row 41
        assert_eq!(train_visible_rows(50, &cfg), 42);
        assert_eq!(train_visible_rows(5, &cfg), 5);
    }

    #[test]
    fn test_invalid_fraction() {
        let mut cfg = config(3);
        cfg.train_fraction = 1.0;
        assert!(matches!(
            build(&scaled(10), &cfg),
            Err(TrainingError::PreconditionViolation(_))
        ));
    }
}
