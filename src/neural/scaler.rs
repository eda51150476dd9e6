// projeto: lstmseqtrain
// file: src/neural/scaler.rs
// Per-column normalization statistics with invertible transforms

use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::neural::data::Table;
use crate::neural::utils::TrainingError;

pub const ROBUST_EPSILON: f64 = 1e-8;
pub const ROBUST_CLIP: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    #[default]
    MinMax,
    Robust,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColumnStats {
    MinMax {
        min: f64,
        max: f64,
    },
    Robust {
        median: f64,
        iqr: f64,
        std_dev: f64,
        epsilon: f64,
    },
}

impl ColumnStats {
    /// Effective divisor of the affine map. Strictly positive for every
    /// column, constant ones included.
    pub fn divisor(&self) -> f64 {
        match *self {
            ColumnStats::MinMax { min, max } => {
                let range = max - min;
                if range == 0.0 { 1.0 } else { range }
            }
            ColumnStats::Robust { iqr, std_dev, epsilon, .. } => {
                let spread = if iqr > 0.0 { iqr } else { std_dev };
                spread + epsilon
            }
        }
    }

    fn offset(&self) -> f64 {
        match *self {
            ColumnStats::MinMax { min, .. } => min,
            ColumnStats::Robust { median, .. } => median,
        }
    }

    pub fn scale(&self, value: f64) -> f64 {
        let scaled = (value - self.offset()) / self.divisor();
        match self {
            ColumnStats::MinMax { .. } => scaled,
            ColumnStats::Robust { .. } => scaled.clamp(-ROBUST_CLIP, ROBUST_CLIP),
        }
    }

    /// Exact inverse of `scale`, except for robust values that were clipped.
    pub fn unscale(&self, value: f64) -> f64 {
        value * self.divisor() + self.offset()
    }

    fn fit(kind: ScalerKind, values: &[f64]) -> ColumnStats {
        match kind {
            ScalerKind::MinMax => {
                let min = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
                let max = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
                ColumnStats::MinMax { min, max }
            }
            ScalerKind::Robust => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let median = quantile(&sorted, 0.5);
                let iqr = quantile(&sorted, 0.75) - quantile(&sorted, 0.25);
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let variance =
                    values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
                ColumnStats::Robust {
                    median,
                    iqr,
                    std_dev: variance.sqrt(),
                    epsilon: ROBUST_EPSILON,
                }
            }
        }
    }
}

/// Quantile of sorted data, linear interpolation between order statistics.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Statistics fitted once for a fixed set of columns. Immutable; every later
/// transform or inverse of the same pipeline must use this exact value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerStats {
    kind: ScalerKind,
    columns: Vec<String>,
    stats: Vec<ColumnStats>,
}

/// Table values after scaling, plus the raw values they came from.
#[derive(Debug, Clone)]
pub struct ScaledTable {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
    pub raw: Array2<f64>,
}

impl ScaledTable {
    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

pub struct ColumnScaler {
    kind: ScalerKind,
}

impl ColumnScaler {
    pub fn new(kind: ScalerKind) -> Self {
        ColumnScaler { kind }
    }

    /// Fits statistics on every row of `table`. Callers pass only the rows the
    /// training side is allowed to see; refitting after a transform has been
    /// used is a caller error this type does not track.
    pub fn fit(&self, table: &Table, columns: &[String]) -> Result<ScalerStats, TrainingError> {
        if table.is_empty() {
            return Err(TrainingError::InsufficientData { rows: 0, required: 0 });
        }
        let mut stats = Vec::with_capacity(columns.len());
        for name in columns {
            let values = table.column(name)?;
            let column_stats = ColumnStats::fit(self.kind, &values);
            debug!("📊 [Scaler] {} → {:?} (divisor {:.6})", name, column_stats, column_stats.divisor());
            stats.push(column_stats);
        }
        info!(
            "✅ [Scaler] Fitted {:?} statistics for {} columns on {} rows",
            self.kind,
            columns.len(),
            table.len()
        );
        Ok(ScalerStats {
            kind: self.kind,
            columns: columns.to_vec(),
            stats,
        })
    }
}

impl ScalerStats {
    pub fn kind(&self) -> ScalerKind {
        self.kind
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&ColumnStats> {
        self.columns.iter().position(|c| c == column).map(|i| &self.stats[i])
    }

    fn require(&self, column: &str) -> Result<&ColumnStats, TrainingError> {
        self.get(column).ok_or_else(|| {
            TrainingError::PreconditionViolation(format!(
                "no fitted statistics for column '{}' (fitted: {:?})",
                column, self.columns
            ))
        })
    }

    /// Scales every fitted column of `table` into a new `ScaledTable`.
    pub fn transform(&self, table: &Table) -> Result<ScaledTable, TrainingError> {
        let raw = table.select(&self.columns)?;
        let mut values = raw.clone();
        for (j, (name, stats)) in self.columns.iter().zip(&self.stats).enumerate() {
            for (i, v) in values.column_mut(j).iter_mut().enumerate() {
                let scaled = stats.scale(*v);
                if !scaled.is_finite() {
                    return Err(TrainingError::instability(
                        format!("scaling column '{}'", name),
                        format!("value {} at row {} produced {}", raw[[i, j]], i, scaled),
                    ));
                }
                *v = scaled;
            }
        }
        Ok(ScaledTable {
            columns: self.columns.clone(),
            values,
            raw,
        })
    }

    /// Maps scaled values of `column` back to original units.
    pub fn inverse_transform(&self, column: &str, values: &[f64]) -> Result<Vec<f64>, TrainingError> {
        let stats = self.require(column)?;
        Ok(values.iter().map(|&v| stats.unscale(v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(cols: &[&str], rows: Vec<Vec<f64>>) -> Table {
        Table::from_rows(cols.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_min_max_maps_to_unit_interval() {
        let t = table(&["a"], (0..5).map(|i| vec![10.0 + i as f64 * 5.0]).collect());
        let stats = ColumnScaler::new(ScalerKind::MinMax).fit(&t, &names(&["a"])).unwrap();
        let scaled = stats.transform(&t).unwrap();
        let col: Vec<f64> = scaled.values.column(0).to_vec();
        assert_eq!(col, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_constant_column_has_positive_divisor() {
        let t = table(&["c"], vec![vec![3.0]; 6]);
        for kind in [ScalerKind::MinMax, ScalerKind::Robust] {
            let stats = ColumnScaler::new(kind).fit(&t, &names(&["c"])).unwrap();
            let s = stats.get("c").unwrap();
            assert!(s.divisor() > 0.0);
            let scaled = stats.transform(&t).unwrap();
            assert!(scaled.values.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_round_trip_both_strategies() {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![50.0 + (i as f64 * 0.7).sin() * 8.0, 1500.0 + i as f64 * 3.5])
            .collect();
        let t = table(&["wti", "gold"], rows);
        for kind in [ScalerKind::MinMax, ScalerKind::Robust] {
            let stats = ColumnScaler::new(kind).fit(&t, &names(&["wti", "gold"])).unwrap();
            let scaled = stats.transform(&t).unwrap();
            for (j, name) in ["wti", "gold"].iter().enumerate() {
                let back = stats
                    .inverse_transform(name, &scaled.values.column(j).to_vec())
                    .unwrap();
                for (i, v) in back.iter().enumerate() {
                    assert!((v - scaled.raw[[i, j]]).abs() < 1e-6, "{:?} {} row {}", kind, name, i);
                }
            }
        }
    }

    #[test]
    fn test_robust_statistics_and_clipping() {
        // 1..=9 plus one extreme outlier
        let mut rows: Vec<Vec<f64>> = (1..=9).map(|i| vec![i as f64]).collect();
        rows.push(vec![1000.0]);
        let t = table(&["x"], rows);
        let stats = ColumnScaler::new(ScalerKind::Robust).fit(&t, &names(&["x"])).unwrap();
        match stats.get("x").unwrap() {
            ColumnStats::Robust { median, iqr, .. } => {
                assert!((median - 5.5).abs() < 1e-12);
                assert!((iqr - 4.5).abs() < 1e-12);
            }
            other => panic!("unexpected stats {:?}", other),
        }
        let scaled = stats.transform(&t).unwrap();
        assert_eq!(scaled.values[[9, 0]], ROBUST_CLIP);
        assert!(scaled.values.iter().all(|v| v.abs() <= ROBUST_CLIP));
    }

    #[test]
    fn test_robust_falls_back_to_std_dev() {
        // heavy ties: IQR is zero, std dev is not
        let mut rows = vec![vec![2.0]; 9];
        rows.push(vec![12.0]);
        let t = table(&["x"], rows);
        let stats = ColumnScaler::new(ScalerKind::Robust).fit(&t, &names(&["x"])).unwrap();
        let s = stats.get("x").unwrap();
        assert!((s.divisor() - (3.0 + ROBUST_EPSILON)).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_output_is_rejected() {
        let t = table(&["x"], vec![vec![-f64::MAX], vec![f64::MAX]]);
        let stats = ColumnScaler::new(ScalerKind::MinMax).fit(&t, &names(&["x"])).unwrap();
        let err = stats.transform(&t).unwrap_err();
        assert!(err.is_numeric_instability());
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn test_unknown_column_inverse_is_precondition_violation() {
        let t = table(&["x"], vec![vec![1.0], vec![2.0]]);
        let stats = ColumnScaler::new(ScalerKind::MinMax).fit(&t, &names(&["x"])).unwrap();
        assert!(matches!(
            stats.inverse_transform("y", &[0.5]),
            Err(TrainingError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn test_stats_serde_round_trip() {
        let t = table(&["x"], vec![vec![1.0], vec![4.0]]);
        let stats = ColumnScaler::new(ScalerKind::Robust).fit(&t, &names(&["x"])).unwrap();
        let json = serde_json::to_string(&stats).unwrap();
        let restored: ScalerStats = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, stats);
    }
}
