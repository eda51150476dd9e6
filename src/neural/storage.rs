// projeto: lstmseqtrain
// file: src/neural/storage.rs
// Named model store: file-backed (JSON or bincode) and in-memory

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::neural::metrics::EvaluationMetrics;
use crate::neural::model::{ModelState, SequenceModel};
use crate::neural::scaler::ScalerStats;
use crate::neural::sequence::SequenceConfig;
use crate::neural::trainer::TrainingHistory;
use crate::neural::utils::{TrainingError, clean_model_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    #[default]
    Json,
    Bincode,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Json => "json",
            ArtifactFormat::Bincode => "bin",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(ArtifactFormat::Json),
            "bin" => Some(ArtifactFormat::Bincode),
            _ => None,
        }
    }

    fn other(self) -> Self {
        match self {
            ArtifactFormat::Json => ArtifactFormat::Bincode,
            ArtifactFormat::Bincode => ArtifactFormat::Json,
        }
    }

    pub fn encode(self, artifact: &SavedModel) -> Result<Vec<u8>, TrainingError> {
        match self {
            ArtifactFormat::Json => serde_json::to_vec_pretty(artifact)
                .map_err(|e| TrainingError::Serialization(format!("Failed to serialize model: {}", e))),
            ArtifactFormat::Bincode => bincode::serde::encode_to_vec(artifact, bincode::config::standard())
                .map_err(|e| TrainingError::Serialization(format!("Failed to serialize model: {}", e))),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<SavedModel, TrainingError> {
        match self {
            ArtifactFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| TrainingError::Serialization(format!("Failed to deserialize model: {}", e))),
            ArtifactFormat::Bincode => {
                let (artifact, _): (SavedModel, usize) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard()).map_err(|e| {
                        TrainingError::Serialization(format!("Failed to deserialize model: {}", e))
                    })?;
                Ok(artifact)
            }
        }
    }
}

/// Everything needed to predict in original units: the model artifact plus
/// the exact scaler statistics and window layout it was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModel {
    pub name: String,
    pub saved_at: DateTime<Utc>,
    pub model: ModelState,
    pub scaler: ScalerStats,
    pub sequence: SequenceConfig,
    pub history: TrainingHistory,
    pub metrics: Option<EvaluationMetrics>,
}

impl SavedModel {
    pub fn capture(
        name: &str,
        model: &dyn SequenceModel,
        scaler: &ScalerStats,
        sequence: &SequenceConfig,
        history: &TrainingHistory,
        metrics: Option<EvaluationMetrics>,
    ) -> Result<Self, TrainingError> {
        Ok(SavedModel {
            name: name.to_string(),
            saved_at: Utc::now(),
            model: model.serialize()?,
            scaler: scaler.clone(),
            sequence: sequence.clone(),
            history: history.clone(),
            metrics,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub name: String,
    pub location: String,
    pub bytes: usize,
}

/// A miss is a normal result, not an error.
#[derive(Debug)]
pub enum LoadOutcome {
    Found(Box<SavedModel>),
    NotFound,
}

impl LoadOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, LoadOutcome::Found(_))
    }

    pub fn into_option(self) -> Option<SavedModel> {
        match self {
            LoadOutcome::Found(artifact) => Some(*artifact),
            LoadOutcome::NotFound => None,
        }
    }
}

pub trait ModelStore {
    fn save(&mut self, name: &str, artifact: &SavedModel) -> Result<ModelHandle, TrainingError>;
    fn load(&self, name: &str) -> Result<LoadOutcome, TrainingError>;
    fn list(&self) -> Result<Vec<String>, TrainingError>;
    /// Returns whether anything was removed.
    fn delete(&mut self, name: &str) -> Result<bool, TrainingError>;
}

fn store_key(name: &str) -> Result<String, TrainingError> {
    let key = clean_model_name(name);
    if key.is_empty() {
        return Err(TrainingError::PreconditionViolation(format!(
            "model name '{}' is empty after cleaning",
            name
        )));
    }
    Ok(key)
}

/// Key for a lookup. A name that cleans to nothing can never have been
/// saved, so it is a miss rather than an error.
fn lookup_key(name: &str) -> Option<String> {
    let key = clean_model_name(name);
    (!key.is_empty()).then_some(key)
}

fn named(key: &str, artifact: &SavedModel) -> SavedModel {
    let mut stored = artifact.clone();
    stored.name = key.to_string();
    stored
}

/// One file per model under `dir`, `<name>.json` or `<name>.bin`.
pub struct FileModelStore {
    dir: PathBuf,
    format: ArtifactFormat,
}

impl FileModelStore {
    pub fn new(dir: impl AsRef<Path>, format: ArtifactFormat) -> Result<Self, TrainingError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileModelStore { dir, format })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str, format: ArtifactFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", key, format.extension()))
    }
}

impl ModelStore for FileModelStore {
    fn save(&mut self, name: &str, artifact: &SavedModel) -> Result<ModelHandle, TrainingError> {
        let key = store_key(name)?;
        let bytes = self.format.encode(&named(&key, artifact))?;
        let path = self.path_for(&key, self.format);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;

        // drop a copy left behind in the other format
        let stale = self.path_for(&key, self.format.other());
        if stale.exists() {
            fs::remove_file(&stale)?;
        }

        info!("💾 [Storage] Saved model '{}' to {} ({} bytes)", key, path.display(), bytes.len());
        Ok(ModelHandle {
            name: key,
            location: path.display().to_string(),
            bytes: bytes.len(),
        })
    }

    fn load(&self, name: &str) -> Result<LoadOutcome, TrainingError> {
        let Some(key) = lookup_key(name) else {
            debug!("[Storage] Name '{}' is empty after cleaning, nothing to load", name);
            return Ok(LoadOutcome::NotFound);
        };
        for format in [self.format, self.format.other()] {
            let path = self.path_for(&key, format);
            if !path.exists() {
                continue;
            }
            let bytes = fs::read(&path)?;
            let artifact = format.decode(&bytes)?;
            info!(
                "📂 [Storage] Loaded model '{}' from {} (saved {})",
                key,
                path.display(),
                artifact.saved_at.format("%Y-%m-%d %H:%M:%S")
            );
            return Ok(LoadOutcome::Found(Box::new(artifact)));
        }
        debug!("[Storage] No artifact named '{}' in {}", key, self.dir.display());
        Ok(LoadOutcome::NotFound)
    }

    fn list(&self) -> Result<Vec<String>, TrainingError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext.and_then(ArtifactFormat::from_extension).is_none() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn delete(&mut self, name: &str) -> Result<bool, TrainingError> {
        let key = store_key(name)?;
        let mut removed = false;
        for format in [ArtifactFormat::Json, ArtifactFormat::Bincode] {
            let path = self.path_for(&key, format);
            if path.exists() {
                fs::remove_file(&path)?;
                removed = true;
            }
        }
        if removed {
            info!("🗑️ [Storage] Deleted model '{}'", key);
        } else {
            warn!("⚠️ [Storage] Nothing to delete for '{}'", key);
        }
        Ok(removed)
    }
}

/// Keeps encoded artifacts in memory; values still go through the codec.
#[derive(Default)]
pub struct MemoryModelStore {
    format: ArtifactFormat,
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryModelStore {
    pub fn new(format: ArtifactFormat) -> Self {
        MemoryModelStore {
            format,
            entries: BTreeMap::new(),
        }
    }
}

impl ModelStore for MemoryModelStore {
    fn save(&mut self, name: &str, artifact: &SavedModel) -> Result<ModelHandle, TrainingError> {
        let key = store_key(name)?;
        let bytes = self.format.encode(&named(&key, artifact))?;
        let handle = ModelHandle {
            name: key.clone(),
            location: format!("memory:{}", key),
            bytes: bytes.len(),
        };
        self.entries.insert(key, bytes);
        Ok(handle)
    }

    fn load(&self, name: &str) -> Result<LoadOutcome, TrainingError> {
        let Some(key) = lookup_key(name) else {
            return Ok(LoadOutcome::NotFound);
        };
        match self.entries.get(&key) {
            Some(bytes) => Ok(LoadOutcome::Found(Box::new(self.format.decode(bytes)?))),
            None => Ok(LoadOutcome::NotFound),
        }
    }

    fn list(&self) -> Result<Vec<String>, TrainingError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn delete(&mut self, name: &str) -> Result<bool, TrainingError> {
        let key = store_key(name)?;
        Ok(self.entries.remove(&key).is_some())
    }
}
