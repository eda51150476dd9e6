// projeto: lstmseqtrain
// file: src/neural/utils.rs
// Error handling, numeric validation, optimizer and timing utilities

use log::info;
use ndarray::{Array, ArrayD, ArrayView2, ArrayViewMutD, Dimension, ShapeError};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Insufficient data: {rows} rows available, need more than {required}")]
    InsufficientData { rows: usize, required: usize },

    #[error("Numeric instability in {context}: {detail}")]
    NumericInstability { context: String, detail: String },

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shape error: {0}")]
    Shape(String),
}

impl From<ShapeError> for TrainingError {
    fn from(err: ShapeError) -> Self {
        TrainingError::Shape(err.to_string())
    }
}

impl TrainingError {
    pub fn instability(context: impl Into<String>, detail: impl Into<String>) -> Self {
        TrainingError::NumericInstability {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// True for the "fatal, aborts the run" class of failures.
    pub fn is_numeric_instability(&self) -> bool {
        matches!(self, TrainingError::NumericInstability { .. })
    }
}

/// Adam keyed by parameter name. `step()` advances the shared timestep once
/// per optimisation step; `update()` is then called once per parameter.
#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub t: usize,
    m: HashMap<String, ArrayD<f64>>,
    v: HashMap<String, ArrayD<f64>>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        AdamOptimizer {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    pub fn step(&mut self) {
        self.t += 1;
    }

    /// Returns the delta to subtract from the parameter.
    pub fn update<D: Dimension>(
        &mut self,
        param_name: &str,
        gradient: &Array<f64, D>,
    ) -> Result<Array<f64, D>, TrainingError> {
        let t = self.t.max(1) as i32;
        let grad = gradient.view().into_dyn();

        let m = self
            .m
            .entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
        if m.shape() != grad.shape() {
            return Err(TrainingError::Shape(format!(
                "optimizer state for '{}' has shape {:?}, gradient has {:?}",
                param_name,
                m.shape(),
                grad.shape()
            )));
        }
        *m = &*m * self.beta1 + &grad * (1.0 - self.beta1);

        let v = self
            .v
            .entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
        *v = &*v * self.beta2 + &grad.mapv(|x| x.powi(2)) * (1.0 - self.beta2);

        let m_hat = &*m / (1.0 - self.beta1.powi(t));
        let v_hat = &*v / (1.0 - self.beta2.powi(t));

        let update = &m_hat / &(v_hat.mapv(f64::sqrt) + self.epsilon) * self.learning_rate;
        Ok(update.into_dimensionality::<D>()?)
    }
}

pub fn sigmoid_scalar(x: f64) -> f64 {
    if x > 500.0 {
        1.0
    } else if x < -500.0 {
        0.0
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}

pub fn mse_loss(predictions: &[f64], targets: &[f64]) -> f64 {
    assert_eq!(predictions.len(), targets.len());
    let n = predictions.len() as f64;
    predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / n
}

/// Mean squared error over every element of two equally shaped matrices.
pub fn mse_matrix(predictions: ArrayView2<f64>, targets: ArrayView2<f64>) -> f64 {
    let n = predictions.len().max(1) as f64;
    (&predictions - &targets).mapv(|d| d * d).sum() / n
}

/// Scales every gradient so the joint L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_global_norm(gradients: &mut [ArrayViewMutD<'_, f64>], max_norm: f64) -> f64 {
    let norm = gradients
        .iter()
        .map(|g| g.iter().map(|x| x.powi(2)).sum::<f64>())
        .sum::<f64>()
        .sqrt();
    if max_norm > 0.0 && norm > max_norm {
        let scale = max_norm / norm;
        for g in gradients.iter_mut() {
            g.mapv_inplace(|x| x * scale);
        }
    }
    norm
}

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    pub start_time: std::time::Instant,
    pub epoch_times: Vec<f64>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        PerformanceMonitor {
            start_time: std::time::Instant::now(),
            epoch_times: Vec::new(),
        }
    }

    pub fn record_epoch(&mut self, duration: f64) {
        self.epoch_times.push(duration);
    }

    pub fn get_average_epoch_time(&self) -> f64 {
        if self.epoch_times.is_empty() {
            0.0
        } else {
            self.epoch_times.iter().sum::<f64>() / self.epoch_times.len() as f64
        }
    }

    pub fn get_total_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn log_summary(&self) {
        info!("⏱️ [Performance] Training Summary:");
        info!("   ├── Total Time: {:.2}s", self.get_total_time());
        info!("   ├── Total Epochs: {}", self.epoch_times.len());
        info!("   ├── Avg Epoch Time: {:.3}s", self.get_average_epoch_time());
        if !self.epoch_times.is_empty() {
            let min_time = self.epoch_times.iter().fold(f64::INFINITY, |a, &b| a.min(b));
            let max_time = self.epoch_times.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            info!("   ├── Min Epoch Time: {:.3}s", min_time);
            info!("   └── Max Epoch Time: {:.3}s", max_time);
        }
    }
}

/// Fails with `NumericInstability` on the first NaN or infinite entry.
pub fn ensure_finite<'a>(
    values: impl IntoIterator<Item = &'a f64>,
    context: &str,
) -> Result<(), TrainingError> {
    for (i, &value) in values.into_iter().enumerate() {
        if value.is_nan() {
            return Err(TrainingError::instability(
                context,
                format!("NaN at position {}", i),
            ));
        }
        if value.is_infinite() {
            return Err(TrainingError::instability(
                context,
                format!("infinite value at position {}", i),
            ));
        }
    }
    Ok(())
}

/// Normalises a free-form name into something safe to use as a store key.
pub fn clean_model_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            ' ' => '_',
            _ => '_',
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_').to_string();

    // Limitar a 80 caracteres
    if cleaned.len() > 80 {
        cleaned[..80].to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, array};

    #[test]
    fn test_adam_optimizer() {
        let mut optimizer = AdamOptimizer::new(0.001, 0.9, 0.999, 1e-8);
        let gradient = Array1::from_vec(vec![0.1, -0.2, 0.3]);
        optimizer.step();
        let update = optimizer.update("test_param", &gradient).unwrap();
        assert_eq!(update.len(), 3);
        // first Adam step moves each weight by ~lr in the gradient's direction
        assert!((update[0] - 0.001).abs() < 1e-6);
        assert!((update[1] + 0.001).abs() < 1e-6);
    }

    #[test]
    fn test_adam_rejects_shape_change() {
        let mut optimizer = AdamOptimizer::new(0.001, 0.9, 0.999, 1e-8);
        optimizer.step();
        let g2: Array2<f64> = Array2::ones((2, 3));
        assert!(optimizer.update("w", &g2).is_ok());
        let g3: Array2<f64> = Array2::ones((3, 3));
        assert!(matches!(optimizer.update("w", &g3), Err(TrainingError::Shape(_))));
    }

    #[test]
    fn test_loss_functions() {
        let predictions = vec![1.0, 2.0, 3.0];
        let targets = vec![1.1, 1.9, 3.1];
        let mse = mse_loss(&predictions, &targets);
        assert!((mse - 0.01).abs() < 1e-9);

        let p = array![[1.0, 2.0], [3.0, 4.0]];
        let t = array![[1.0, 2.0], [3.0, 6.0]];
        assert!((mse_matrix(p.view(), t.view()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_clipping() {
        let mut a = Array1::from_vec(vec![3.0]);
        let mut b = Array1::from_vec(vec![4.0]);
        let norm = clip_global_norm(
            &mut [a.view_mut().into_dyn(), b.view_mut().into_dyn()],
            2.0,
        );
        assert!((norm - 5.0).abs() < 1e-10);
        assert!((a[0] - 1.2).abs() < 1e-10);
        assert!((b[0] - 1.6).abs() < 1e-10);
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite(&[1.0, 2.0, 3.0], "ok").is_ok());
        let err = ensure_finite(&[1.0, f64::NAN], "loss").unwrap_err();
        assert!(err.is_numeric_instability());
        assert!(err.to_string().contains("loss"));
        assert!(ensure_finite(&[f64::INFINITY], "x").is_err());
    }

    #[test]
    fn test_clean_model_name() {
        assert_eq!(clean_model_name("  WTI model (daily) "), "WTI_model__daily");
        assert_eq!(clean_model_name("../etc/passwd"), "etc_passwd");
        assert_eq!(clean_model_name("///"), "");
        assert_eq!(clean_model_name(&"x".repeat(100)).len(), 80);
    }

    #[test]
    fn test_performance_monitor() {
        let mut monitor = PerformanceMonitor::new();
        monitor.record_epoch(1.5);
        monitor.record_epoch(1.2);
        monitor.record_epoch(1.8);
        assert_eq!(monitor.epoch_times.len(), 3);
        assert!((monitor.get_average_epoch_time() - 1.5).abs() < 1e-10);
    }
}
