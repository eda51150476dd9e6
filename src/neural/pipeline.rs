// projeto: lstmseqtrain
// file: src/neural/pipeline.rs
// Loader → scaler → sequences → controller → metrics, and persistence of the result

use log::{info, warn};

use crate::neural::config::{FitOn, PipelineConfig};
use crate::neural::data::{Table, load_table};
use crate::neural::inference::{denormalize, predict_windows};
use crate::neural::metrics::{EvaluationMetrics, direction_metrics, regression_metrics};
use crate::neural::model::{InputShape, SequenceModel};
use crate::neural::scaler::{ColumnScaler, ScaledTable, ScalerStats};
use crate::neural::sequence::{Dataset, SequenceConfig, TargetMode, WindowSet, build, train_visible_rows};
use crate::neural::storage::{ModelHandle, ModelStore, SavedModel};
use crate::neural::trainer::{EpochObserver, TrainingController, TrainingOutcome};
use crate::neural::utils::TrainingError;

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub scaler: ScalerStats,
    pub sequence: SequenceConfig,
    pub outcome: TrainingOutcome,
    pub metrics: Option<EvaluationMetrics>,
    pub train_windows: usize,
    pub test_windows: usize,
    pub discarded_windows: usize,
}

/// Holdout metrics in original units, on the first target column.
pub fn evaluate(
    model: &dyn SequenceModel,
    test: &WindowSet,
    scaler: &ScalerStats,
    sequence: &SequenceConfig,
) -> Result<EvaluationMetrics, TrainingError> {
    let predictions = predict_windows(model, test)?;
    let targets = test.targets_matrix();
    match sequence.target_mode {
        TargetMode::Value => {
            let predictions = denormalize(predictions.view(), scaler, sequence)?;
            let targets = denormalize(targets.view(), scaler, sequence)?;
            let m = regression_metrics(&predictions.column(0).to_vec(), &targets.column(0).to_vec())?;
            Ok(EvaluationMetrics::Regression(m))
        }
        TargetMode::Direction => {
            let m = direction_metrics(&predictions.column(0).to_vec(), &targets.column(0).to_vec())?;
            Ok(EvaluationMetrics::Direction(m))
        }
    }
}

pub struct TrainingPipeline {
    config: PipelineConfig,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, TrainingError> {
        config.validate()?;
        Ok(TrainingPipeline { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn load_table(&self) -> Result<Table, TrainingError> {
        load_table(
            &self.config.data.path,
            self.config.data.delimiter,
            &self.config.required_columns(),
        )
    }

    /// Fits the scaler on the rows allowed by `scaler.fit_on` and scales the
    /// whole table with those statistics.
    pub fn scale(&self, table: &Table) -> Result<(ScalerStats, ScaledTable), TrainingError> {
        let sequence = self.config.sequence_config();
        let fit_rows = match self.config.scaler.fit_on {
            FitOn::Train => train_visible_rows(table.len(), &sequence),
            FitOn::All => table.len(),
        };
        info!(
            "📊 [Scaler] Fitting {:?} on {} of {} rows",
            self.config.scaler.kind,
            fit_rows,
            table.len()
        );
        let stats = ColumnScaler::new(self.config.scaler.kind)
            .fit(&table.head(fit_rows), &self.config.required_columns())?;
        let scaled = stats.transform(table)?;
        Ok((stats, scaled))
    }

    pub fn prepare(&self, table: &Table) -> Result<(ScalerStats, Dataset), TrainingError> {
        let (stats, scaled) = self.scale(table)?;
        let dataset = build(&scaled, &self.config.sequence_config())?;
        Ok((stats, dataset))
    }

    /// Configures `model` for the window layout and trains it through
    /// `controller`.
    pub fn run(
        &self,
        table: &Table,
        model: &mut dyn SequenceModel,
        controller: &TrainingController,
        observer: Option<&mut dyn EpochObserver>,
    ) -> Result<PipelineReport, TrainingError> {
        let sequence = self.config.sequence_config();
        let (scaler, dataset) = self.prepare(table)?;

        model.configure(
            InputShape {
                sequence_length: sequence.length,
                features: sequence.feature_columns.len(),
                targets: sequence.target_columns.len(),
            },
            &self.config.hyperparameters(),
        )?;

        let outcome = controller.train(model, &dataset, &self.config.training_options(), observer)?;

        let metrics = if outcome.history.is_empty() {
            warn!("⚠️ [Trainer] No epoch completed, skipping holdout evaluation");
            None
        } else {
            let metrics = evaluate(model, &dataset.test, &scaler, &sequence)?;
            metrics.log_summary("Evaluation");
            Some(metrics)
        };

        Ok(PipelineReport {
            scaler,
            sequence,
            outcome,
            metrics,
            train_windows: dataset.train.len(),
            test_windows: dataset.test.len(),
            discarded_windows: dataset.discarded,
        })
    }

    pub fn persist(
        &self,
        report: &PipelineReport,
        model: &dyn SequenceModel,
        store: &mut dyn ModelStore,
        name: &str,
    ) -> Result<ModelHandle, TrainingError> {
        let artifact = SavedModel::capture(
            name,
            model,
            &report.scaler,
            &report.sequence,
            &report.outcome.history,
            report.metrics.clone(),
        )?;
        store.save(name, &artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::inference::Forecaster;
    use crate::neural::model::DenseRegressor;
    use crate::neural::storage::{ArtifactFormat, LoadOutcome, MemoryModelStore};
    use crate::neural::trainer::{NoYield, TrainingHistory, TrainingState};

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    /// 100 rows, strictly increasing WTI.
    fn synthetic_table() -> Table {
        let rows = (0..100)
            .map(|i| {
                let t = i as f64;
                vec![40.0 + t * 0.5, 1500.0 + (t * 0.3).sin() * 20.0, 95.0 + (t * 0.1).cos()]
            })
            .collect();
        Table::from_rows(names(&["WTI", "GOLD", "US DOLLAR INDEX"]), rows).unwrap()
    }

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.sequence.length = 5;
        config.training.epochs = 4;
        config.training.batch_size = 8;
        config.training.patience = 0;
        config.model.hidden_size = 6;
        config.model.learning_rate = 0.01;
        config
    }

    fn controller() -> TrainingController {
        TrainingController::with_scheduler(Box::new(NoYield))
    }

    #[test]
    fn test_min_max_maps_increasing_target_to_unit_interval() {
        let mut config = small_config();
        config.scaler.fit_on = FitOn::All;
        let pipeline = TrainingPipeline::new(config).unwrap();
        let (_, scaled) = pipeline.scale(&synthetic_table()).unwrap();
        let wti = scaled.column_index("WTI").unwrap();
        let column = scaled.values.column(wti);
        assert!(column.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(column[0], 0.0);
        assert_eq!(column[99], 1.0);
    }

    #[test]
    fn test_fit_on_train_does_not_see_test_rows() {
        let pipeline = TrainingPipeline::new(small_config()).unwrap();
        let table = synthetic_table();
        let (stats, scaled) = pipeline.scale(&table).unwrap();
        // 95 windows, 76 train windows, last train target is row 80
        let expected = ColumnScaler::new(stats.kind())
            .fit(&table.head(81), &pipeline.config().required_columns())
            .unwrap();
        assert_eq!(stats, expected);
        let wti = scaled.column_index("WTI").unwrap();
        assert!(scaled.values[[99, wti]] > 1.0);
    }

    #[test]
    fn test_cancel_at_epoch_five_of_fifty() {
        let mut config = small_config();
        config.training.epochs = 50;
        let pipeline = TrainingPipeline::new(config).unwrap();
        let ctrl = controller();
        let token = ctrl.cancellation_token();
        let mut observer = |epoch: usize, _: f64, _: f64, _: &TrainingHistory| {
            if epoch + 1 == 5 {
                token.cancel();
            }
        };
        let mut model = DenseRegressor::new();
        let report = pipeline
            .run(&synthetic_table(), &mut model, &ctrl, Some(&mut observer))
            .unwrap();
        assert_eq!(report.outcome.state, TrainingState::Cancelled);
        assert_eq!(report.outcome.history.len(), 5);
        assert_eq!(model.epochs_trained(), 5);
    }

    #[test]
    fn test_never_saved_name_is_not_found() {
        let store = MemoryModelStore::new(ArtifactFormat::Json);
        assert!(matches!(store.load("never_saved").unwrap(), LoadOutcome::NotFound));
    }

    #[test]
    fn test_run_persist_and_forecast() {
        let pipeline = TrainingPipeline::new(small_config()).unwrap();
        let table = synthetic_table();
        let mut model = DenseRegressor::new();
        let report = pipeline.run(&table, &mut model, &controller(), None).unwrap();

        assert_eq!(report.outcome.state, TrainingState::Completed);
        assert_eq!(report.outcome.history.len(), 4);
        assert_eq!(report.train_windows + report.test_windows, 95);
        match report.metrics.as_ref() {
            Some(EvaluationMetrics::Regression(m)) => {
                assert_eq!(m.samples, report.test_windows);
                assert!(m.rmse.is_finite());
            }
            other => panic!("unexpected metrics {:?}", other),
        }

        let mut store = MemoryModelStore::new(ArtifactFormat::Bincode);
        let handle = pipeline.persist(&report, &model, &mut store, "wti model").unwrap();
        assert_eq!(handle.name, "wti_model");

        let saved = store.load("wti model").unwrap().into_option().unwrap();
        assert_eq!(saved.history, report.outcome.history);
        let forecaster = Forecaster::from_saved(&saved).unwrap();
        let restored = forecaster.forecast_next(&table).unwrap();

        let fresh = Forecaster::new(Box::new(model), report.scaler.clone(), report.sequence.clone());
        let direct = fresh.forecast_next(&table).unwrap();
        assert_eq!(restored, direct);
    }

    #[test]
    fn test_direction_mode_reports_accuracy() {
        let mut config = small_config();
        config.sequence.target_mode = TargetMode::Direction;
        let pipeline = TrainingPipeline::new(config).unwrap();
        let mut model = DenseRegressor::new();
        let report = pipeline
            .run(&synthetic_table(), &mut model, &controller(), None)
            .unwrap();
        match report.metrics {
            Some(EvaluationMetrics::Direction(m)) => {
                assert!((0.0..=1.0).contains(&m.accuracy));
            }
            other => panic!("unexpected metrics {:?}", other),
        }
    }

    #[test]
    fn test_short_table_is_insufficient() {
        let pipeline = TrainingPipeline::new(PipelineConfig::default()).unwrap();
        let short = synthetic_table().head(30);
        let mut model = DenseRegressor::new();
        assert!(matches!(
            pipeline.run(&short, &mut model, &controller(), None),
            Err(TrainingError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = PipelineConfig::default();
        config.training.epochs = 0;
        assert!(matches!(
            TrainingPipeline::new(config),
            Err(TrainingError::Config(_))
        ));
    }
}
