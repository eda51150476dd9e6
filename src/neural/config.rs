// projeto: lstmseqtrain
// file: src/neural/config.rs
// Pipeline configuration loaded from TOML

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::neural::data::DelimiterHint;
use crate::neural::model::{Hyperparameters, OutputActivation};
use crate::neural::scaler::ScalerKind;
use crate::neural::sequence::{SequenceConfig, TargetMode};
use crate::neural::storage::ArtifactFormat;
use crate::neural::trainer::{EarlyStopping, TrainingOptions};
use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub path: PathBuf,
    pub delimiter: DelimiterHint,
    pub feature_columns: Vec<String>,
    pub target_columns: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            path: PathBuf::from("dados/commodities.csv"),
            delimiter: DelimiterHint::Auto,
            feature_columns: vec![
                "WTI".to_string(),
                "GOLD".to_string(),
                "US DOLLAR INDEX".to_string(),
            ],
            target_columns: vec!["WTI".to_string()],
        }
    }
}

/// Which rows the scaler statistics are fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FitOn {
    /// Only rows that training windows can see.
    #[default]
    Train,
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub kind: ScalerKind,
    pub fit_on: FitOn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSection {
    pub length: usize,
    pub train_fraction: f64,
    pub horizon: usize,
    pub target_mode: TargetMode,
}

impl Default for SequenceSection {
    fn default() -> Self {
        SequenceSection {
            length: 30,
            train_fraction: 0.8,
            horizon: 1,
            target_mode: TargetMode::Value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSection {
    pub epochs: usize,
    pub batch_size: usize,
    /// 0 disables early stopping.
    pub patience: usize,
    pub min_delta: f64,
    pub yield_every: usize,
}

impl Default for TrainingSection {
    fn default() -> Self {
        TrainingSection {
            epochs: 40,
            batch_size: 32,
            patience: 5,
            min_delta: 0.0,
            yield_every: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub l2_weight: f64,
    pub clip_norm: f64,
    pub seed: u64,
}

impl Default for ModelSection {
    fn default() -> Self {
        ModelSection {
            hidden_size: 32,
            learning_rate: 0.0005,
            l2_weight: 0.001,
            clip_norm: 1.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub dir: PathBuf,
    pub name: String,
    pub format: ArtifactFormat,
}

impl Default for StorageSection {
    fn default() -> Self {
        StorageSection {
            dir: PathBuf::from("model_store"),
            name: "wti_model".to_string(),
            format: ArtifactFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub scaler: ScalerConfig,
    pub sequence: SequenceSection,
    pub training: TrainingSection,
    pub model: ModelSection,
    pub storage: StorageSection,
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, TrainingError> {
        toml::from_str(content).map_err(|e| TrainingError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("⚙️ Configuration loaded from: {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TrainingError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| TrainingError::Config(e.to_string()))?;
        fs::write(path, content)?;
        info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let fail = |msg: String| Err(TrainingError::Config(msg));

        if self.data.feature_columns.is_empty() {
            return fail("data.feature_columns must not be empty".to_string());
        }
        if self.data.target_columns.is_empty() {
            return fail("data.target_columns must not be empty".to_string());
        }
        if self.sequence.length == 0 {
            return fail("sequence.length must be at least 1".to_string());
        }
        if self.sequence.horizon == 0 {
            return fail("sequence.horizon must be at least 1".to_string());
        }
        if !(self.sequence.train_fraction > 0.0 && self.sequence.train_fraction < 1.0) {
            return fail(format!(
                "sequence.train_fraction must be in (0, 1), got {}",
                self.sequence.train_fraction
            ));
        }
        if self.training.epochs == 0 {
            return fail("training.epochs must be at least 1".to_string());
        }
        if self.training.batch_size == 0 {
            return fail("training.batch_size must be at least 1".to_string());
        }
        if self.training.min_delta < 0.0 {
            return fail("training.min_delta must not be negative".to_string());
        }
        if self.model.hidden_size == 0 {
            return fail("model.hidden_size must be at least 1".to_string());
        }
        if !(self.model.learning_rate > 0.0 && self.model.learning_rate.is_finite()) {
            return fail(format!(
                "model.learning_rate must be positive, got {}",
                self.model.learning_rate
            ));
        }
        if self.model.l2_weight < 0.0 || self.model.clip_norm < 0.0 {
            return fail("model.l2_weight and model.clip_norm must not be negative".to_string());
        }
        if self.storage.name.trim().is_empty() {
            return fail("storage.name must not be empty".to_string());
        }
        Ok(())
    }

    /// Every column the loader must find in each row.
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns = self.data.feature_columns.clone();
        for target in &self.data.target_columns {
            if !columns.contains(target) {
                columns.push(target.clone());
            }
        }
        columns
    }

    pub fn sequence_config(&self) -> SequenceConfig {
        SequenceConfig {
            length: self.sequence.length,
            train_fraction: self.sequence.train_fraction,
            horizon: self.sequence.horizon,
            target_mode: self.sequence.target_mode,
            feature_columns: self.data.feature_columns.clone(),
            target_columns: self.data.target_columns.clone(),
        }
    }

    pub fn training_options(&self) -> TrainingOptions {
        TrainingOptions {
            max_epochs: self.training.epochs,
            batch_size: self.training.batch_size,
            early_stopping: (self.training.patience > 0).then_some(EarlyStopping {
                patience: self.training.patience,
                min_delta: self.training.min_delta,
            }),
            yield_every: self.training.yield_every,
        }
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            hidden_size: self.model.hidden_size,
            learning_rate: self.model.learning_rate,
            l2_weight: self.model.l2_weight,
            clip_norm: self.model.clip_norm,
            seed: self.model.seed,
            output: match self.sequence.target_mode {
                TargetMode::Value => OutputActivation::Linear,
                TargetMode::Direction => OutputActivation::Sigmoid,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequence.length, 30);
        assert_eq!(config.training.epochs, 40);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.model.learning_rate, 0.0005);
        assert_eq!(
            config.required_columns(),
            vec!["WTI".to_string(), "GOLD".to_string(), "US DOLLAR INDEX".to_string()]
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [data]
            delimiter = "semicolon"
            target_columns = ["WTI", "BRENT"]

            [scaler]
            kind = "robust"

            [sequence]
            target_mode = "direction"

            [training]
            patience = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.data.delimiter, DelimiterHint::Semicolon);
        assert_eq!(config.data.feature_columns.len(), 3);
        assert_eq!(config.scaler.kind, ScalerKind::Robust);
        assert_eq!(config.scaler.fit_on, FitOn::Train);
        assert_eq!(config.sequence.length, 30);
        assert_eq!(config.training_options().early_stopping, None);
        assert_eq!(config.hyperparameters().output, OutputActivation::Sigmoid);
        assert_eq!(config.required_columns().last().map(String::as_str), Some("BRENT"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::default();
        config.sequence.train_fraction = 1.0;
        assert!(matches!(config.validate(), Err(TrainingError::Config(_))));

        let mut config = PipelineConfig::default();
        config.training.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.data.target_columns.clear();
        assert!(config.validate().is_err());

        assert!(matches!(
            PipelineConfig::from_toml_str("[sequence]\nlength = \"long\""),
            Err(TrainingError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut config = PipelineConfig::default();
        config.storage.format = ArtifactFormat::Bincode;
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = PipelineConfig::from_toml_str(include_str!("../../config/pipeline.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_shipped_data_loads() {
        let config = PipelineConfig::default();
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(&config.data.path);
        let table = crate::neural::data::load_table(&path, config.data.delimiter, &config.required_columns())
            .unwrap();
        assert_eq!(table.len(), 258);
        assert_eq!(table.dropped_rows(), 2);
    }
}
