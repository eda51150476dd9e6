// projeto: lstmseqtrain
// file: src/neural/trainer.rs
// Training loop controller: epochs, history, early stopping, cancellation

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::neural::model::SequenceModel;
use crate::neural::sequence::Dataset;
use crate::neural::utils::{PerformanceMonitor, TrainingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingState {
    Idle,
    Preparing,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TrainingState {
    pub fn is_active(self) -> bool {
        matches!(self, TrainingState::Preparing | TrainingState::Running)
    }
}

/// Shared flag checked at every epoch boundary. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Hook invoked between epochs to hand control back to the host.
pub trait Scheduler: Send {
    fn yield_now(&mut self, epoch: usize);
}

/// Yields the current OS thread.
#[derive(Debug, Default)]
pub struct ThreadYield;

impl Scheduler for ThreadYield {
    fn yield_now(&mut self, _epoch: usize) {
        std::thread::yield_now();
    }
}

#[derive(Debug, Default)]
pub struct NoYield;

impl Scheduler for NoYield {
    fn yield_now(&mut self, _epoch: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub validation_loss: f64,
    pub duration_secs: f64,
}

/// Append-only record of one run. Epoch indices strictly increase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    records: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) -> Result<(), TrainingError> {
        if let Some(last) = self.records.last() {
            if record.epoch <= last.epoch {
                return Err(TrainingError::PreconditionViolation(format!(
                    "history epoch {} does not follow epoch {}",
                    record.epoch, last.epoch
                )));
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    /// Epoch with the lowest validation loss (first one on ties).
    pub fn best(&self) -> Option<&EpochRecord> {
        self.records.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.validation_loss <= r.validation_loss => Some(b),
            _ => Some(r),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
}

struct PatienceTracker {
    rule: EarlyStopping,
    best: f64,
    counter: usize,
}

impl PatienceTracker {
    fn new(rule: EarlyStopping) -> Self {
        PatienceTracker {
            rule,
            best: f64::INFINITY,
            counter: 0,
        }
    }

    /// True once validation loss failed to improve `patience` times in a row.
    fn should_stop(&mut self, validation_loss: f64) -> bool {
        if validation_loss < self.best - self.rule.min_delta {
            self.best = validation_loss;
            self.counter = 0;
            false
        } else {
            self.counter += 1;
            self.counter >= self.rule.patience
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOptions {
    pub max_epochs: usize,
    pub batch_size: usize,
    pub early_stopping: Option<EarlyStopping>,
    /// Yield to the scheduler after every `yield_every` epochs; 0 never yields.
    pub yield_every: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            max_epochs: 40,
            batch_size: 32,
            early_stopping: Some(EarlyStopping {
                patience: 5,
                min_delta: 0.0,
            }),
            yield_every: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    MaxEpochs,
    EarlyStopping { epoch: usize },
    Cancelled { epoch: usize },
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub state: TrainingState,
    pub history: TrainingHistory,
    pub stop_reason: StopReason,
    pub best_epoch: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    Started { max_epochs: usize },
    Epoch { epoch: usize, loss: f64, validation_loss: f64, history_len: usize },
    Finished { state: TrainingState },
}

/// Read-only progress callback, invoked after each epoch is recorded.
pub trait EpochObserver {
    fn on_epoch_end(&mut self, epoch: usize, loss: f64, validation_loss: f64, history: &TrainingHistory);

    fn on_finish(&mut self, _state: TrainingState) {}
}

impl<F> EpochObserver for F
where
    F: FnMut(usize, f64, f64, &TrainingHistory),
{
    fn on_epoch_end(&mut self, epoch: usize, loss: f64, validation_loss: f64, history: &TrainingHistory) {
        self(epoch, loss, validation_loss, history)
    }
}

/// Forwards progress as `TrainingEvent`s. A dropped receiver only stops the
/// messages, never the run.
pub struct ChannelObserver {
    tx: Sender<TrainingEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<TrainingEvent>) -> Self {
        ChannelObserver { tx }
    }

    pub fn started(&self, max_epochs: usize) {
        self.send(TrainingEvent::Started { max_epochs });
    }

    fn send(&self, event: TrainingEvent) {
        if self.tx.send(event).is_err() {
            debug!("[Trainer] Progress receiver dropped");
        }
    }
}

impl EpochObserver for ChannelObserver {
    fn on_epoch_end(&mut self, epoch: usize, loss: f64, validation_loss: f64, history: &TrainingHistory) {
        self.send(TrainingEvent::Epoch {
            epoch,
            loss,
            validation_loss,
            history_len: history.len(),
        });
    }

    fn on_finish(&mut self, state: TrainingState) {
        self.send(TrainingEvent::Finished { state });
    }
}

pub struct TrainingController {
    state: Mutex<TrainingState>,
    cancel: CancellationToken,
    scheduler: Mutex<Box<dyn Scheduler>>,
}

impl Default for TrainingController {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TrainingController {
    pub fn new() -> Self {
        Self::with_scheduler(Box::new(ThreadYield))
    }

    pub fn with_scheduler(scheduler: Box<dyn Scheduler>) -> Self {
        TrainingController {
            state: Mutex::new(TrainingState::Idle),
            cancel: CancellationToken::new(),
            scheduler: Mutex::new(scheduler),
        }
    }

    pub fn state(&self) -> TrainingState {
        *lock(&self.state)
    }

    /// Token for cancelling the current run from an observer or another
    /// thread. The flag is cleared when a new run starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn begin(&self) -> Result<(), TrainingError> {
        let mut state = lock(&self.state);
        if state.is_active() {
            return Err(TrainingError::PreconditionViolation(format!(
                "a training run is already {:?}",
                *state
            )));
        }
        *state = TrainingState::Preparing;
        self.cancel.reset();
        Ok(())
    }

    fn transition(&self, next: TrainingState) {
        let mut state = lock(&self.state);
        debug!("[Trainer] {:?} → {:?}", *state, next);
        *state = next;
    }

    fn fail(&self, err: TrainingError) -> TrainingError {
        error!("❌ [Trainer] Run failed: {}", err);
        self.transition(TrainingState::Failed);
        err
    }

    /// Runs up to `options.max_epochs` epochs of `model` over `dataset`.
    /// Cancellation and early stopping end the run successfully; a
    /// non-finite loss or a panicking model moves the controller to `Failed`.
    /// The observer hears `on_finish` for every run that got past the
    /// precondition checks, failed ones included.
    pub fn train(
        &self,
        model: &mut dyn SequenceModel,
        dataset: &Dataset,
        options: &TrainingOptions,
        observer: Option<&mut dyn EpochObserver>,
    ) -> Result<TrainingOutcome, TrainingError> {
        if options.batch_size == 0 {
            return Err(TrainingError::PreconditionViolation(
                "batch size must be at least 1".to_string(),
            ));
        }
        if dataset.train.is_empty() {
            return Err(TrainingError::PreconditionViolation(
                "dataset has no training windows".to_string(),
            ));
        }
        self.begin()?;

        let mut observer = observer;
        match self.run_epochs(model, dataset, options, &mut observer) {
            Ok(outcome) => {
                notify_finish(&mut observer, outcome.state);
                Ok(outcome)
            }
            Err(err) => {
                let err = self.fail(err);
                notify_finish(&mut observer, TrainingState::Failed);
                Err(err)
            }
        }
    }

    fn run_epochs(
        &self,
        model: &mut dyn SequenceModel,
        dataset: &Dataset,
        options: &TrainingOptions,
        observer: &mut Option<&mut dyn EpochObserver>,
    ) -> Result<TrainingOutcome, TrainingError> {
        info!(
            "🚀 [Trainer] Preparing {} train / {} test windows",
            dataset.train.len(),
            dataset.test.len()
        );
        let train_x = dataset.train.features_tensor();
        let train_y = dataset.train.targets_matrix();
        let test_x = dataset.test.features_tensor();
        let test_y = dataset.test.targets_matrix();

        self.transition(TrainingState::Running);
        info!(
            "🎯 [Trainer] Training for up to {} epochs (batch size {})",
            options.max_epochs, options.batch_size
        );

        let mut history = TrainingHistory::new();
        let mut tracker = options.early_stopping.map(PatienceTracker::new);
        let mut monitor = PerformanceMonitor::new();
        let mut stop_reason = StopReason::MaxEpochs;

        for epoch in 0..options.max_epochs {
            if self.cancel.is_cancelled() {
                warn!("🛑 [Trainer] Cancelled before epoch {}", epoch + 1);
                stop_reason = StopReason::Cancelled { epoch };
                break;
            }

            let started = Instant::now();
            let losses = catch_unwind(AssertUnwindSafe(|| {
                model.train_one_epoch(
                    train_x.view(),
                    train_y.view(),
                    test_x.view(),
                    test_y.view(),
                    options.batch_size,
                )
            }))
            .unwrap_or_else(|_| {
                Err(TrainingError::Model(format!(
                    "model panicked during epoch {}",
                    epoch + 1
                )))
            })?;

            if !losses.loss.is_finite() || !losses.validation_loss.is_finite() {
                return Err(TrainingError::instability(
                    format!("epoch {}", epoch + 1),
                    format!(
                        "loss {} / validation loss {}",
                        losses.loss, losses.validation_loss
                    ),
                ));
            }

            let duration = started.elapsed().as_secs_f64();
            monitor.record_epoch(duration);
            history.push(EpochRecord {
                epoch,
                loss: losses.loss,
                validation_loss: losses.validation_loss,
                duration_secs: duration,
            })?;

            if epoch < 10 || (epoch + 1) % 5 == 0 {
                info!(
                    "📈 [Trainer] Epoch {:>3}/{}: loss {:.6} | val_loss {:.6} ({:.2}s)",
                    epoch + 1,
                    options.max_epochs,
                    losses.loss,
                    losses.validation_loss,
                    duration
                );
            }

            if let Some(obs) = observer.as_mut() {
                let notified = catch_unwind(AssertUnwindSafe(|| {
                    obs.on_epoch_end(epoch, losses.loss, losses.validation_loss, &history)
                }));
                if notified.is_err() {
                    warn!("⚠️ [Trainer] Epoch observer panicked at epoch {}; continuing", epoch + 1);
                }
            }

            if let Some(tracker) = tracker.as_mut() {
                if tracker.should_stop(losses.validation_loss) {
                    info!(
                        "⏹️ [Trainer] Early stopping at epoch {}: no improvement for {} epochs",
                        epoch + 1,
                        tracker.rule.patience
                    );
                    stop_reason = StopReason::EarlyStopping { epoch };
                    break;
                }
            }

            if options.yield_every > 0 && (epoch + 1) % options.yield_every == 0 {
                lock(&self.scheduler).yield_now(epoch);
            }
        }

        let state = match stop_reason {
            StopReason::Cancelled { .. } => TrainingState::Cancelled,
            _ => TrainingState::Completed,
        };
        self.transition(state);

        let best_epoch = history.best().map(|r| r.epoch);
        if let Some(best) = history.best() {
            info!(
                "✅ [Trainer] {:?} after {} epochs, best val_loss {:.6} at epoch {}",
                state,
                history.len(),
                best.validation_loss,
                best.epoch + 1
            );
        }
        monitor.log_summary();

        Ok(TrainingOutcome {
            state,
            history,
            stop_reason,
            best_epoch,
        })
    }
}

fn notify_finish(observer: &mut Option<&mut dyn EpochObserver>, state: TrainingState) {
    if let Some(obs) = observer.as_mut() {
        if catch_unwind(AssertUnwindSafe(|| obs.on_finish(state))).is_err() {
            warn!("⚠️ [Trainer] Epoch observer panicked on finish");
        }
    }
}
