// projeto: lstmseqtrain
// file: src/neural/inference.rs
// Prediction on windows and mapping of outputs back to original units

use log::info;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::neural::data::Table;
use crate::neural::model::{SequenceModel, restore};
use crate::neural::scaler::ScalerStats;
use crate::neural::sequence::{SequenceConfig, TargetMode, Window, WindowSet};
use crate::neural::storage::SavedModel;
use crate::neural::utils::{TrainingError, ensure_finite};

/// Raw (scaled) model output for one window.
pub fn predict(model: &dyn SequenceModel, window: &Window) -> Result<Array1<f64>, TrainingError> {
    let input = window.features.view().insert_axis(Axis(0));
    let output = model.predict(input)?;
    Ok(output.row(0).to_owned())
}

pub fn predict_windows(model: &dyn SequenceModel, windows: &WindowSet) -> Result<Array2<f64>, TrainingError> {
    model.predict(windows.features_tensor().view())
}

/// Maps scaled outputs, one column per target, back to original units.
///
/// `stats` must be the statistics the training data was scaled with; a
/// model paired with a different scaler yields wrong numbers that cannot be
/// detected here.
pub fn denormalize(
    raw: ArrayView2<f64>,
    stats: &ScalerStats,
    sequence: &SequenceConfig,
) -> Result<Array2<f64>, TrainingError> {
    if sequence.target_mode == TargetMode::Direction {
        return Err(TrainingError::PreconditionViolation(
            "direction labels have no original units to restore".to_string(),
        ));
    }
    if raw.ncols() != sequence.target_columns.len() {
        return Err(TrainingError::Shape(format!(
            "{} output columns for {} targets",
            raw.ncols(),
            sequence.target_columns.len()
        )));
    }
    let mut out = Array2::zeros(raw.raw_dim());
    for (j, column) in sequence.target_columns.iter().enumerate() {
        let restored = stats.inverse_transform(column, &raw.column(j).to_vec())?;
        out.column_mut(j).assign(&Array1::from(restored));
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastValue {
    pub column: String,
    /// Original units for value targets, probability of "up" for direction.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub mode: TargetMode,
    /// Rows ahead of the last input row.
    pub horizon: usize,
    pub outputs: Vec<ForecastValue>,
}

/// A restored model bundled with the scaler and window layout it was
/// trained with.
pub struct Forecaster {
    model: Box<dyn SequenceModel>,
    scaler: ScalerStats,
    sequence: SequenceConfig,
}

impl Forecaster {
    pub fn new(model: Box<dyn SequenceModel>, scaler: ScalerStats, sequence: SequenceConfig) -> Self {
        Forecaster {
            model,
            scaler,
            sequence,
        }
    }

    pub fn from_saved(saved: &SavedModel) -> Result<Self, TrainingError> {
        let model = restore(&saved.model)?;
        Ok(Forecaster::new(model, saved.scaler.clone(), saved.sequence.clone()))
    }

    pub fn model(&self) -> &dyn SequenceModel {
        self.model.as_ref()
    }

    pub fn sequence(&self) -> &SequenceConfig {
        &self.sequence
    }

    /// Predicts `horizon` rows past the end of `table` from its last
    /// `length` rows.
    pub fn forecast_next(&self, table: &Table) -> Result<Forecast, TrainingError> {
        let length = self.sequence.length;
        if table.len() < length {
            return Err(TrainingError::InsufficientData {
                rows: table.len(),
                required: length.saturating_sub(1),
            });
        }

        let scaled = self.scaler.transform(&table.tail(length))?;
        let mut features = Array2::zeros((length, self.sequence.feature_columns.len()));
        for (j, name) in self.sequence.feature_columns.iter().enumerate() {
            let idx = scaled.column_index(name).ok_or_else(|| {
                TrainingError::PreconditionViolation(format!(
                    "feature '{}' has no fitted statistics",
                    name
                ))
            })?;
            features.column_mut(j).assign(&scaled.values.column(idx));
        }

        let window = Window {
            source_index: table.len() - 1 + self.sequence.horizon,
            features,
            target: Array1::zeros(0),
        };
        let raw = predict(self.model.as_ref(), &window)?;
        ensure_finite(raw.iter(), "forecast output")?;

        let values = match self.sequence.target_mode {
            TargetMode::Value => {
                let restored = denormalize(raw.view().insert_axis(Axis(0)), &self.scaler, &self.sequence)?;
                restored.row(0).to_vec()
            }
            TargetMode::Direction => raw.to_vec(),
        };

        let outputs: Vec<ForecastValue> = self
            .sequence
            .target_columns
            .iter()
            .zip(values)
            .map(|(column, value)| ForecastValue {
                column: column.clone(),
                value,
            })
            .collect();

        for out in &outputs {
            match self.sequence.target_mode {
                TargetMode::Value => info!(
                    "🔮 [Inference] {} in {} step(s): {:.4}",
                    out.column, self.sequence.horizon, out.value
                ),
                TargetMode::Direction => info!(
                    "🔮 [Inference] {} in {} step(s): P(up) = {:.2}%",
                    out.column,
                    self.sequence.horizon,
                    out.value * 100.0
                ),
            }
        }

        Ok(Forecast {
            mode: self.sequence.target_mode,
            horizon: self.sequence.horizon,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::model::{DenseRegressor, Hyperparameters, InputShape};
    use crate::neural::scaler::{ColumnScaler, ScalerKind};
    use crate::neural::sequence::build;
    use ndarray::array;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn table() -> Table {
        let rows = (0..20).map(|i| vec![50.0 + i as f64, 1500.0 + (i % 4) as f64]).collect();
        Table::from_rows(names(&["WTI", "GOLD"]), rows).unwrap()
    }

    fn sequence(mode: TargetMode) -> SequenceConfig {
        SequenceConfig {
            length: 4,
            train_fraction: 0.75,
            horizon: 1,
            target_mode: mode,
            feature_columns: names(&["WTI", "GOLD"]),
            target_columns: names(&["WTI"]),
        }
    }

    fn configured_model() -> DenseRegressor {
        let mut model = DenseRegressor::new();
        model
            .configure(
                InputShape {
                    sequence_length: 4,
                    features: 2,
                    targets: 1,
                },
                &Hyperparameters {
                    hidden_size: 6,
                    ..Hyperparameters::default()
                },
            )
            .unwrap();
        model
    }

    #[test]
    fn test_denormalize_inverts_min_max() {
        let t = table();
        let stats = ColumnScaler::new(ScalerKind::MinMax)
            .fit(&t, &names(&["WTI", "GOLD"]))
            .unwrap();
        let raw = array![[0.0], [0.5], [1.0]];
        let out = denormalize(raw.view(), &stats, &sequence(TargetMode::Value)).unwrap();
        assert_eq!(out.column(0).to_vec(), vec![50.0, 59.5, 69.0]);
    }

    #[test]
    fn test_denormalize_rejects_direction_mode_and_bad_width() {
        let t = table();
        let stats = ColumnScaler::new(ScalerKind::MinMax)
            .fit(&t, &names(&["WTI", "GOLD"]))
            .unwrap();
        let raw = array![[0.5]];
        assert!(matches!(
            denormalize(raw.view(), &stats, &sequence(TargetMode::Direction)),
            Err(TrainingError::PreconditionViolation(_))
        ));
        let wide = array![[0.5, 0.5]];
        assert!(matches!(
            denormalize(wide.view(), &stats, &sequence(TargetMode::Value)),
            Err(TrainingError::Shape(_))
        ));
    }

    #[test]
    fn test_predict_single_window_matches_batch() {
        let t = table();
        let cols = names(&["WTI", "GOLD"]);
        let stats = ColumnScaler::new(ScalerKind::MinMax).fit(&t, &cols).unwrap();
        let dataset = build(&stats.transform(&t).unwrap(), &sequence(TargetMode::Value)).unwrap();
        let model = configured_model();
        let batch = predict_windows(&model, &dataset.test).unwrap();
        let single = predict(&model, &dataset.test.windows[1]).unwrap();
        assert!((batch[[1, 0]] - single[0]).abs() < 1e-12);
    }

    #[test]
    fn test_forecast_next() {
        let t = table();
        let cols = names(&["WTI", "GOLD"]);
        let stats = ColumnScaler::new(ScalerKind::MinMax).fit(&t, &cols).unwrap();
        let forecaster = Forecaster::new(Box::new(configured_model()), stats, sequence(TargetMode::Value));
        let forecast = forecaster.forecast_next(&t).unwrap();
        assert_eq!(forecast.horizon, 1);
        assert_eq!(forecast.outputs.len(), 1);
        assert_eq!(forecast.outputs[0].column, "WTI");
        assert!(forecast.outputs[0].value.is_finite());

        assert!(matches!(
            forecaster.forecast_next(&t.head(3)),
            Err(TrainingError::InsufficientData { rows: 3, .. })
        ));
    }
}
