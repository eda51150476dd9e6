// projeto: lstmseqtrain
// file: src/neural/mod.rs
// Module declarations for the sequence training pipeline

pub mod utils;     // Error handling, optimizer, numeric helpers
pub mod data;      // Delimited table loading and validation
pub mod scaler;    // Per-column min-max / robust normalization
pub mod sequence;  // Sliding windows and chronological split
pub mod model;     // Model capability contract and dense regressor
pub mod trainer;   // Epoch loop, history, cancellation, early stopping
pub mod metrics;   // Holdout metrics and history export
pub mod storage;   // Named model store (file / memory)
pub mod inference; // Prediction, denormalization, next-step forecast
pub mod config;    // TOML pipeline configuration
pub mod pipeline;  // Stage orchestration

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use data::{DelimiterHint, Table};
pub use model::{DenseRegressor, SequenceModel};
pub use pipeline::{PipelineReport, TrainingPipeline};
pub use scaler::{ColumnScaler, ScalerKind, ScalerStats};
pub use storage::{FileModelStore, LoadOutcome, MemoryModelStore, ModelStore};
pub use trainer::{TrainingController, TrainingHistory, TrainingState};
pub use utils::TrainingError;
