// projeto: lstmseqtrain
// file: src/neural/metrics.rs
// Holdout evaluation metrics and training history export

use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::neural::trainer::TrainingHistory;
use crate::neural::utils::{TrainingError, mse_loss};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Percent, over non-zero targets only.
    pub mape: f64,
    pub directional_accuracy: f64,
    pub r_squared: f64,
    pub max_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionMetrics {
    pub samples: usize,
    pub accuracy: f64,
    /// Share of windows predicted as "up".
    pub predicted_up_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvaluationMetrics {
    Regression(RegressionMetrics),
    Direction(DirectionMetrics),
}

impl EvaluationMetrics {
    pub fn log_summary(&self, label: &str) {
        match self {
            EvaluationMetrics::Regression(m) => {
                info!("📊 [{}] Holdout metrics (original units):", label);
                info!("   ├── Samples: {}", m.samples);
                info!("   ├── MSE: {:.6}", m.mse);
                info!("   ├── RMSE: {:.6}", m.rmse);
                info!("   ├── MAE: {:.6}", m.mae);
                info!("   ├── MAPE: {:.2}%", m.mape);
                info!("   ├── Max Error: {:.6}", m.max_error);
                info!("   ├── Direction Acc: {:.2}%", m.directional_accuracy * 100.0);
                info!("   └── R²: {:.6}", m.r_squared);
            }
            EvaluationMetrics::Direction(m) => {
                info!("📊 [{}] Holdout direction metrics:", label);
                info!("   ├── Samples: {}", m.samples);
                info!("   ├── Accuracy: {:.2}%", m.accuracy * 100.0);
                info!("   └── Predicted up: {:.2}%", m.predicted_up_rate * 100.0);
            }
        }
    }
}

fn check_lengths(predictions: &[f64], targets: &[f64]) -> Result<(), TrainingError> {
    if predictions.len() != targets.len() {
        return Err(TrainingError::PreconditionViolation(format!(
            "{} predictions for {} targets",
            predictions.len(),
            targets.len()
        )));
    }
    if predictions.is_empty() {
        return Err(TrainingError::PreconditionViolation(
            "cannot evaluate an empty holdout set".to_string(),
        ));
    }
    Ok(())
}

fn direction(change: f64) -> i8 {
    if change > 0.0 {
        1
    } else if change < 0.0 {
        -1
    } else {
        0
    }
}

pub fn regression_metrics(predictions: &[f64], targets: &[f64]) -> Result<RegressionMetrics, TrainingError> {
    check_lengths(predictions, targets)?;
    let n = predictions.len() as f64;
    let errors: Vec<f64> = predictions.iter().zip(targets).map(|(p, t)| p - t).collect();

    let mse = mse_loss(predictions, targets);
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let max_error = errors.iter().fold(0.0_f64, |acc, e| acc.max(e.abs()));

    let (ape_sum, ape_count) = predictions
        .iter()
        .zip(targets)
        .filter(|(_, t)| **t != 0.0)
        .fold((0.0, 0usize), |(sum, count), (p, t)| (sum + ((p - t) / t).abs(), count + 1));
    let mape = if ape_count > 0 { ape_sum / ape_count as f64 * 100.0 } else { 0.0 };

    let mut correct_direction = 0;
    for i in 1..predictions.len() {
        let pred_change = predictions[i] - predictions[i - 1];
        let actual_change = targets[i] - targets[i - 1];
        if direction(pred_change) == direction(actual_change) {
            correct_direction += 1;
        }
    }
    let directional_accuracy = if predictions.len() > 1 {
        correct_direction as f64 / (predictions.len() - 1) as f64
    } else {
        0.0
    };

    let target_mean = targets.iter().sum::<f64>() / n;
    let ss_res = errors.iter().map(|e| e * e).sum::<f64>();
    let ss_tot = targets.iter().map(|t| (t - target_mean).powi(2)).sum::<f64>();
    let r_squared = if ss_tot != 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    Ok(RegressionMetrics {
        samples: predictions.len(),
        mse,
        rmse: mse.sqrt(),
        mae,
        mape,
        directional_accuracy,
        r_squared,
        max_error,
    })
}

/// Accuracy of up/down predictions thresholded at 0.5.
pub fn direction_metrics(predictions: &[f64], labels: &[f64]) -> Result<DirectionMetrics, TrainingError> {
    check_lengths(predictions, labels)?;
    let up: Vec<bool> = predictions.iter().map(|p| *p >= 0.5).collect();
    let correct = up
        .iter()
        .zip(labels)
        .filter(|(u, l)| **u == (**l >= 0.5))
        .count();
    let n = predictions.len() as f64;
    Ok(DirectionMetrics {
        samples: predictions.len(),
        accuracy: correct as f64 / n,
        predicted_up_rate: up.iter().filter(|u| **u).count() as f64 / n,
    })
}

/// Writes one CSV row per epoch.
pub fn write_history_csv(history: &TrainingHistory, path: impl AsRef<Path>) -> Result<(), TrainingError> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["epoch", "loss", "val_loss", "duration_secs"])?;
    for record in history.records() {
        writer.write_record(&[
            (record.epoch + 1).to_string(),
            format!("{:.6}", record.loss),
            format!("{:.6}", record.validation_loss),
            format!("{:.3}", record.duration_secs),
        ])?;
    }
    writer.flush()?;
    info!("📊 [Metrics] Training history saved to: {}", path.display());
    Ok(())
}
