// projeto: lstmseqtrain
// file: src/neural/model.rs
// Model capability contract and the built-in dense window regressor

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::neural::utils::{
    AdamOptimizer, TrainingError, clip_global_norm, mse_matrix, sigmoid_scalar,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    DenseRegressor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub sequence_length: usize,
    pub features: usize,
    pub targets: usize,
}

impl InputShape {
    pub fn flat_len(&self) -> usize {
        self.sequence_length * self.features
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputActivation {
    #[default]
    Linear,
    /// Bounded output for up/down labels.
    Sigmoid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub l2_weight: f64,
    pub clip_norm: f64,
    pub seed: u64,
    pub output: OutputActivation,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            hidden_size: 32,
            learning_rate: 0.0005,
            l2_weight: 0.001,
            clip_norm: 1.0,
            seed: 42,
            output: OutputActivation::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLosses {
    pub loss: f64,
    pub validation_loss: f64,
}

/// Portable artifact of a trained capability. `weights` is opaque to
/// everything except the capability that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub kind: ModelKind,
    pub input_shape: InputShape,
    pub hyperparameters: Hyperparameters,
    pub epochs_trained: usize,
    pub weights: Vec<u8>,
}

/// What the training controller needs from a model. Inputs are
/// (windows, length, features) tensors and (windows, targets) matrices.
pub trait SequenceModel: Send {
    fn kind(&self) -> ModelKind;

    fn configure(&mut self, shape: InputShape, hyperparameters: &Hyperparameters)
    -> Result<(), TrainingError>;

    fn input_shape(&self) -> Option<InputShape>;

    fn train_one_epoch(
        &mut self,
        train_x: ArrayView3<f64>,
        train_y: ArrayView2<f64>,
        test_x: ArrayView3<f64>,
        test_y: ArrayView2<f64>,
        batch_size: usize,
    ) -> Result<EpochLosses, TrainingError>;

    fn predict(&self, windows: ArrayView3<f64>) -> Result<Array2<f64>, TrainingError>;

    fn serialize(&self) -> Result<ModelState, TrainingError>;

    fn deserialize(state: &ModelState) -> Result<Self, TrainingError>
    where
        Self: Sized;
}

/// Rebuilds whichever capability produced `state`.
pub fn restore(state: &ModelState) -> Result<Box<dyn SequenceModel>, TrainingError> {
    match state.kind {
        ModelKind::DenseRegressor => Ok(Box::new(DenseRegressor::deserialize(state)?)),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseWeights {
    w1: Array2<f64>, // (hidden, length * features)
    b1: Array1<f64>,
    w2: Array2<f64>, // (targets, hidden)
    b2: Array1<f64>,
}

impl DenseWeights {
    fn init(shape: &InputShape, hidden: usize, rng: &mut StdRng) -> Result<Self, TrainingError> {
        let xavier_input = (2.0 / shape.flat_len() as f64).sqrt();
        let xavier_hidden = (2.0 / hidden as f64).sqrt();
        let normal_input = Normal::new(0.0, xavier_input)
            .map_err(|e| TrainingError::Model(format!("weight init: {}", e)))?;
        let normal_hidden = Normal::new(0.0, xavier_hidden)
            .map_err(|e| TrainingError::Model(format!("weight init: {}", e)))?;

        Ok(DenseWeights {
            w1: Array2::from_shape_fn((hidden, shape.flat_len()), |_| normal_input.sample(rng)),
            b1: Array1::zeros(hidden),
            w2: Array2::from_shape_fn((shape.targets, hidden), |_| normal_hidden.sample(rng)),
            b2: Array1::zeros(shape.targets),
        })
    }

    fn forward(&self, x: ArrayView2<f64>, output: OutputActivation) -> (Array2<f64>, Array2<f64>) {
        let hidden = (x.dot(&self.w1.t()) + &self.b1).mapv(f64::tanh);
        let mut out = hidden.dot(&self.w2.t()) + &self.b2;
        if output == OutputActivation::Sigmoid {
            out.mapv_inplace(sigmoid_scalar);
        }
        (hidden, out)
    }

    fn parameter_count(&self) -> usize {
        self.w1.len() + self.b1.len() + self.w2.len() + self.b2.len()
    }
}

/// One optimisation step on a mini-batch. Returns the batch MSE measured
/// before the update.
fn train_batch(
    weights: &mut DenseWeights,
    optimizer: &mut AdamOptimizer,
    hp: &Hyperparameters,
    x: &Array2<f64>,
    y: &Array2<f64>,
) -> Result<f64, TrainingError> {
    let (hidden, output) = weights.forward(x.view(), hp.output);
    let n = output.len().max(1) as f64;
    let diff = &output - y;
    let loss = diff.mapv(|d| d * d).sum() / n;

    let mut d_out = diff * (2.0 / n);
    if hp.output == OutputActivation::Sigmoid {
        d_out = d_out * &output.mapv(|o| o * (1.0 - o));
    }

    let mut d_w2 = d_out.t().dot(&hidden) + &(&weights.w2 * (2.0 * hp.l2_weight));
    let mut d_b2 = d_out.sum_axis(Axis(0));
    let d_hidden = d_out.dot(&weights.w2) * &hidden.mapv(|h| 1.0 - h * h);
    let mut d_w1 = d_hidden.t().dot(x) + &(&weights.w1 * (2.0 * hp.l2_weight));
    let mut d_b1 = d_hidden.sum_axis(Axis(0));

    clip_global_norm(
        &mut [
            d_w1.view_mut().into_dyn(),
            d_b1.view_mut().into_dyn(),
            d_w2.view_mut().into_dyn(),
            d_b2.view_mut().into_dyn(),
        ],
        hp.clip_norm,
    );

    optimizer.step();
    weights.w1 -= &optimizer.update("w1", &d_w1)?;
    weights.b1 -= &optimizer.update("b1", &d_b1)?;
    weights.w2 -= &optimizer.update("w2", &d_w2)?;
    weights.b2 -= &optimizer.update("b2", &d_b2)?;
    Ok(loss)
}

/// Flattened window → tanh hidden layer → linear or sigmoid output.
pub struct DenseRegressor {
    shape: Option<InputShape>,
    hyperparameters: Hyperparameters,
    weights: Option<DenseWeights>,
    optimizer: AdamOptimizer,
    rng: StdRng,
    epochs_trained: usize,
}

impl Default for DenseRegressor {
    fn default() -> Self {
        Self::new()
    }
}

impl DenseRegressor {
    pub fn new() -> Self {
        let hyperparameters = Hyperparameters::default();
        DenseRegressor {
            shape: None,
            optimizer: AdamOptimizer::new(hyperparameters.learning_rate, 0.9, 0.999, 1e-8),
            rng: StdRng::seed_from_u64(hyperparameters.seed),
            hyperparameters,
            weights: None,
            epochs_trained: 0,
        }
    }

    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }

    fn require_shape(&self) -> Result<InputShape, TrainingError> {
        self.shape
            .ok_or_else(|| TrainingError::Model("model has not been configured".to_string()))
    }

    fn flatten(&self, x: ArrayView3<f64>) -> Result<Array2<f64>, TrainingError> {
        let shape = self.require_shape()?;
        let (n, len, features) = x.dim();
        if len != shape.sequence_length || features != shape.features {
            return Err(TrainingError::Shape(format!(
                "expected windows of {}x{}, got {}x{}",
                shape.sequence_length, shape.features, len, features
            )));
        }
        Ok(x.to_shape((n, len * features))?.into_owned())
    }

    fn check_targets(&self, rows: usize, y: ArrayView2<f64>) -> Result<(), TrainingError> {
        let shape = self.require_shape()?;
        if y.dim() != (rows, shape.targets) {
            return Err(TrainingError::Shape(format!(
                "expected targets of shape ({}, {}), got {:?}",
                rows,
                shape.targets,
                y.dim()
            )));
        }
        Ok(())
    }
}

impl SequenceModel for DenseRegressor {
    fn kind(&self) -> ModelKind {
        ModelKind::DenseRegressor
    }

    fn configure(
        &mut self,
        shape: InputShape,
        hyperparameters: &Hyperparameters,
    ) -> Result<(), TrainingError> {
        if shape.flat_len() == 0 || shape.targets == 0 || hyperparameters.hidden_size == 0 {
            return Err(TrainingError::Model(format!(
                "invalid model dimensions {:?} with hidden size {}",
                shape, hyperparameters.hidden_size
            )));
        }
        self.rng = StdRng::seed_from_u64(hyperparameters.seed);
        self.weights = Some(DenseWeights::init(&shape, hyperparameters.hidden_size, &mut self.rng)?);
        self.optimizer = AdamOptimizer::new(hyperparameters.learning_rate, 0.9, 0.999, 1e-8);
        self.hyperparameters = hyperparameters.clone();
        self.shape = Some(shape);
        self.epochs_trained = 0;

        let params = self.weights.as_ref().map(|w| w.parameter_count()).unwrap_or(0);
        info!(
            "🛠️ [Model] DenseRegressor {}x{} → {} hidden → {} outputs ({} parameters)",
            shape.sequence_length, shape.features, hyperparameters.hidden_size, shape.targets, params
        );
        Ok(())
    }

    fn input_shape(&self) -> Option<InputShape> {
        self.shape
    }

    fn train_one_epoch(
        &mut self,
        train_x: ArrayView3<f64>,
        train_y: ArrayView2<f64>,
        test_x: ArrayView3<f64>,
        test_y: ArrayView2<f64>,
        batch_size: usize,
    ) -> Result<EpochLosses, TrainingError> {
        if batch_size == 0 {
            return Err(TrainingError::PreconditionViolation(
                "batch size must be at least 1".to_string(),
            ));
        }
        let x = self.flatten(train_x)?;
        self.check_targets(x.nrows(), train_y)?;
        if x.nrows() == 0 {
            return Err(TrainingError::PreconditionViolation(
                "training set is empty".to_string(),
            ));
        }

        let mut order: Vec<usize> = (0..x.nrows()).collect();
        order.shuffle(&mut self.rng);

        let weights = self
            .weights
            .as_mut()
            .ok_or_else(|| TrainingError::Model("model has no weights".to_string()))?;
        let mut total = 0.0;
        for chunk in order.chunks(batch_size) {
            let bx = x.select(Axis(0), chunk);
            let by = train_y.select(Axis(0), chunk);
            let batch_loss = train_batch(weights, &mut self.optimizer, &self.hyperparameters, &bx, &by)?;
            total += batch_loss * chunk.len() as f64;
        }
        let loss = total / x.nrows() as f64;
        self.epochs_trained += 1;

        let validation_loss = if test_x.dim().0 == 0 {
            loss
        } else {
            let predictions = self.predict(test_x)?;
            self.check_targets(predictions.nrows(), test_y)?;
            mse_matrix(predictions.view(), test_y)
        };

        debug!(
            "[Model] epoch {} done: loss {:.6}, val_loss {:.6}",
            self.epochs_trained, loss, validation_loss
        );
        Ok(EpochLosses {
            loss,
            validation_loss,
        })
    }

    fn predict(&self, windows: ArrayView3<f64>) -> Result<Array2<f64>, TrainingError> {
        let x = self.flatten(windows)?;
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| TrainingError::Model("model has no weights".to_string()))?;
        let (_, output) = weights.forward(x.view(), self.hyperparameters.output);
        Ok(output)
    }

    fn serialize(&self) -> Result<ModelState, TrainingError> {
        let shape = self.require_shape()?;
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| TrainingError::Model("model has no weights".to_string()))?;
        let bytes = bincode::serde::encode_to_vec(weights, bincode::config::standard())
            .map_err(|e| TrainingError::Serialization(e.to_string()))?;
        Ok(ModelState {
            kind: ModelKind::DenseRegressor,
            input_shape: shape,
            hyperparameters: self.hyperparameters.clone(),
            epochs_trained: self.epochs_trained,
            weights: bytes,
        })
    }

    fn deserialize(state: &ModelState) -> Result<Self, TrainingError> {
        if state.kind != ModelKind::DenseRegressor {
            return Err(TrainingError::Model(format!(
                "artifact holds a {:?}, not a DenseRegressor",
                state.kind
            )));
        }
        let (weights, _): (DenseWeights, usize) =
            bincode::serde::decode_from_slice(&state.weights, bincode::config::standard())
                .map_err(|e| TrainingError::Serialization(e.to_string()))?;

        let shape = state.input_shape;
        let hidden = state.hyperparameters.hidden_size;
        if weights.w1.dim() != (hidden, shape.flat_len()) || weights.w2.dim() != (shape.targets, hidden)
        {
            return Err(TrainingError::Shape(format!(
                "stored weights {:?}/{:?} do not match input shape {:?}",
                weights.w1.dim(),
                weights.w2.dim(),
                shape
            )));
        }

        let hp = state.hyperparameters.clone();
        Ok(DenseRegressor {
            shape: Some(shape),
            optimizer: AdamOptimizer::new(hp.learning_rate, 0.9, 0.999, 1e-8),
            rng: StdRng::seed_from_u64(hp.seed),
            hyperparameters: hp,
            weights: Some(weights),
            epochs_trained: state.epochs_trained,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::Rng;

    fn shape() -> InputShape {
        InputShape {
            sequence_length: 4,
            features: 2,
            targets: 1,
        }
    }

    fn hp(seed: u64) -> Hyperparameters {
        Hyperparameters {
            hidden_size: 8,
            learning_rate: 0.01,
            seed,
            ..Hyperparameters::default()
        }
    }

    /// Target is the mean of the last row of each window.
    fn data(n: usize) -> (Array3<f64>, Array2<f64>) {
        let mut rng = StdRng::seed_from_u64(7);
        let x = Array3::from_shape_fn((n, 4, 2), |_| rng.random_range(0.0..1.0));
        let y = Array2::from_shape_fn((n, 1), |(i, _)| (x[[i, 3, 0]] + x[[i, 3, 1]]) / 2.0);
        (x, y)
    }

    #[test]
    fn test_training_reduces_loss() {
        let (x, y) = data(64);
        let mut model = DenseRegressor::new();
        model.configure(shape(), &hp(1)).unwrap();
        let first = model
            .train_one_epoch(x.view(), y.view(), x.view(), y.view(), 16)
            .unwrap();
        let mut last = first;
        for _ in 0..300 {
            last = model
                .train_one_epoch(x.view(), y.view(), x.view(), y.view(), 16)
                .unwrap();
        }
        assert!(last.loss < first.loss * 0.5, "{:?} → {:?}", first, last);
        assert!(last.validation_loss.is_finite());
        assert_eq!(model.epochs_trained(), 301);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let (x, y) = data(20);
        let run = || {
            let mut model = DenseRegressor::new();
            model.configure(shape(), &hp(3)).unwrap();
            (0..5)
                .map(|_| {
                    model
                        .train_one_epoch(x.view(), y.view(), x.view(), y.view(), 4)
                        .unwrap()
                        .loss
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_serialize_round_trip_predicts_identically() {
        let (x, y) = data(12);
        let mut model = DenseRegressor::new();
        model.configure(shape(), &hp(5)).unwrap();
        model
            .train_one_epoch(x.view(), y.view(), x.view(), y.view(), 4)
            .unwrap();

        let state = model.serialize().unwrap();
        let restored = restore(&state).unwrap();
        assert_eq!(restored.kind(), ModelKind::DenseRegressor);
        assert_eq!(restored.input_shape(), Some(shape()));
        assert_eq!(
            restored.predict(x.view()).unwrap(),
            model.predict(x.view()).unwrap()
        );
    }

    #[test]
    fn test_unconfigured_and_mismatched_input() {
        let model = DenseRegressor::new();
        let x = Array3::zeros((2, 4, 2));
        assert!(matches!(model.predict(x.view()), Err(TrainingError::Model(_))));

        let mut model = DenseRegressor::new();
        model.configure(shape(), &hp(1)).unwrap();
        let wrong = Array3::zeros((2, 5, 2));
        assert!(matches!(model.predict(wrong.view()), Err(TrainingError::Shape(_))));
        let y = Array2::zeros((3, 1));
        assert!(matches!(
            model.train_one_epoch(x.view(), y.view(), x.view(), y.view(), 2),
            Err(TrainingError::Shape(_))
        ));
    }

    #[test]
    fn test_sigmoid_output_is_bounded() {
        let (x, _) = data(10);
        let mut model = DenseRegressor::new();
        let params = Hyperparameters {
            output: OutputActivation::Sigmoid,
            ..hp(2)
        };
        model.configure(shape(), &params).unwrap();
        let out = model.predict(x.view()).unwrap();
        assert!(out.iter().all(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn test_corrupt_weights_are_rejected() {
        let mut model = DenseRegressor::new();
        model.configure(shape(), &hp(1)).unwrap();
        let mut state = model.serialize().unwrap();
        state.input_shape.features = 3;
        assert!(DenseRegressor::deserialize(&state).is_err());
        state.weights.truncate(4);
        assert!(matches!(
            DenseRegressor::deserialize(&state),
            Err(TrainingError::Serialization(_))
        ));
    }
}
