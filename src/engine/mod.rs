pub mod features;
pub mod markov;
pub mod model;
pub mod tracker;

pub use features::{extract_features, ContextFeatures};
pub use markov::MarkovMemory;
pub use model::{DigitRegressor, TrainingExample, TrainingParams};
pub use tracker::{AccuracyTracker, FeedStats, TrackerSnapshot};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::types::{Confidence, Context, Digit, EngineError, RANGE_MAX};

/// Single-slot store for the serialized regression model.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn load_latest_model(&self) -> Result<Option<String>>;
    async fn upsert_model(&self, payload: &str) -> Result<()>;
}

/// Single-slot store for the tracker snapshot.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn load_global_stats(&self) -> Result<Option<TrackerSnapshot>>;
    async fn upsert_global_stats(&self, snapshot: &TrackerSnapshot) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Learning cycles between training rounds.
    pub batch_threshold: usize,
    /// Optional cap on distinct Markov contexts; None for unbounded.
    pub markov_context_cap: Option<usize>,
    pub training: TrainingParams,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_threshold: 5,
            markov_context_cap: None,
            training: TrainingParams::default(),
        }
    }
}

/// Dry-run prediction: no side effects.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub predicted: u8,
    pub raw_estimate: f64,
    pub markov_guess: Option<u8>,
}

/// Result bundle for a full learning cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionOutcome {
    pub predicted: u8,
    pub raw_estimate: f64,
    pub markov_guess: Option<u8>,
    pub actual: u8,
    pub correct: bool,
    pub confidence: Confidence,
    pub current_streak: u64,
    pub rolling_accuracy: f64,
}

/// Point-in-time view of the engine for the stats API.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSummary {
    pub correct_count: u64,
    pub incorrect_count: u64,
    pub current_streak: u64,
    pub rolling_accuracy: f64,
    pub confidence: Confidence,
    pub contexts_seen: usize,
    pub pending_examples: usize,
}

struct EngineCore {
    model: Option<DigitRegressor>,
    markov: MarkovMemory,
    tracker: AccuracyTracker,
    pending: Vec<TrainingExample>,
    cycle_count: usize,
}

/// Hybrid decision engine: blends the regression estimate with the Markov
/// majority guess, records outcomes, and retrains on a batch cadence.
///
/// All mutable cycle state sits behind one async mutex. A learning cycle
/// holds the lock end to end, which makes the batch trigger atomic with
/// the counter reset and guarantees a model save finishes before the next
/// training round can start.
pub struct PredictionEngine {
    core: Mutex<EngineCore>,
    model_store: Arc<dyn ModelStore>,
    stats_store: Arc<dyn StatsStore>,
    settings: EngineSettings,
}

impl PredictionEngine {
    pub fn new(
        model_store: Arc<dyn ModelStore>,
        stats_store: Arc<dyn StatsStore>,
        settings: EngineSettings,
    ) -> Self {
        let markov = MarkovMemory::with_context_cap(settings.markov_context_cap);
        Self {
            core: Mutex::new(EngineCore {
                model: None,
                markov,
                tracker: AccuracyTracker::new(),
                pending: Vec::new(),
                cycle_count: 0,
            }),
            model_store,
            stats_store,
            settings,
        }
    }

    /// Load the persisted model and stats snapshot. A missing or corrupt
    /// model falls back to a fresh one; store failures are non-fatal.
    pub async fn init(&self) -> Result<()> {
        let mut core = self.core.lock().await;

        let model = match self.model_store.load_latest_model().await {
            Ok(Some(json)) => {
                match DigitRegressor::load_from_json(&json, self.settings.training.clone()) {
                    Ok(model) => {
                        info!("Model loaded from store");
                        model
                    }
                    Err(e) => {
                        warn!("Persisted model is corrupt ({}), starting fresh", e);
                        DigitRegressor::new(self.settings.training.clone())
                    }
                }
            }
            Ok(None) => {
                info!("No saved model found, created new model");
                DigitRegressor::new(self.settings.training.clone())
            }
            Err(e) => {
                warn!("Model store unavailable ({}), starting fresh", e);
                DigitRegressor::new(self.settings.training.clone())
            }
        };
        core.model = Some(model);

        match self.stats_store.load_global_stats().await {
            Ok(Some(snapshot)) => {
                core.tracker = AccuracyTracker::from_snapshot(snapshot);
                info!(
                    "Stats restored: {} correct / {} incorrect",
                    core.tracker.correct_count(),
                    core.tracker.incorrect_count()
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Stats store unavailable ({}), starting empty", e),
        }

        Ok(())
    }

    /// Dry-run prediction for a context. No Markov recording, no training
    /// buffer mutation, no stats update.
    pub async fn predict_only(&self, context: &Context) -> Result<Prediction, EngineError> {
        let core = self.core.lock().await;
        score_context(&core, context)
    }

    /// Full learning cycle: score, record the outcome, retrain on the
    /// batch cadence, then update stats with the reported prediction.
    pub async fn predict_and_learn(
        &self,
        context: &Context,
        actual: Digit,
    ) -> Result<PredictionOutcome, EngineError> {
        let mut core = self.core.lock().await;

        let prediction = score_context(&core, context)?;

        // Record the outcome before any retraining can run.
        core.markov.record(context, actual);
        core.pending.push(TrainingExample {
            features: extract_features(context),
            target: actual.value() as f64 / RANGE_MAX as f64,
        });
        core.cycle_count += 1;

        if core.cycle_count >= self.settings.batch_threshold {
            core.cycle_count = 0;
            let report = {
                let EngineCore { model, pending, .. } = &mut *core;
                model
                    .as_mut()
                    .ok_or(EngineError::ModelNotReady)?
                    .train_batch(pending)
            };
            if report.is_some() {
                core.pending.clear();
                self.persist_model(&core).await;
            }
        }

        // Stats reflect the prediction that was reported, not a
        // post-retrain re-score.
        let correct = prediction.predicted == actual.value();
        core.tracker.update(correct);
        let snapshot = core.tracker.snapshot();
        if let Err(e) = self.stats_store.upsert_global_stats(&snapshot).await {
            warn!("Stats upsert failed ({}), retrying next cycle", e);
        }

        debug!(
            "Cycle settled: predicted={} actual={} correct={}",
            prediction.predicted, actual, correct
        );

        Ok(PredictionOutcome {
            predicted: prediction.predicted,
            raw_estimate: prediction.raw_estimate,
            markov_guess: prediction.markov_guess,
            actual: actual.value(),
            correct,
            confidence: core.tracker.confidence(),
            current_streak: core.tracker.current_streak(),
            rolling_accuracy: core.tracker.rolling_accuracy(),
        })
    }

    pub async fn summary(&self) -> EngineSummary {
        let core = self.core.lock().await;
        EngineSummary {
            correct_count: core.tracker.correct_count(),
            incorrect_count: core.tracker.incorrect_count(),
            current_streak: core.tracker.current_streak(),
            rolling_accuracy: core.tracker.rolling_accuracy(),
            confidence: core.tracker.confidence(),
            contexts_seen: core.markov.contexts_seen(),
            pending_examples: core.pending.len(),
        }
    }

    async fn persist_model(&self, core: &EngineCore) {
        let model = match &core.model {
            Some(model) => model,
            None => return,
        };
        match model.save_to_json() {
            Ok(payload) => {
                if let Err(e) = self.model_store.upsert_model(&payload).await {
                    warn!("Model save failed ({}), retrying after next training round", e);
                } else {
                    info!("Model saved to store");
                }
            }
            Err(e) => warn!("Model serialization failed: {}", e),
        }
    }
}

fn score_context(core: &EngineCore, context: &Context) -> Result<Prediction, EngineError> {
    let model = core.model.as_ref().ok_or(EngineError::ModelNotReady)?;
    let features = extract_features(context);
    let regression_estimate = model.score_one(&features);
    let markov_guess = core.markov.predict(context);

    // Plain unweighted average; regression alone when the Markov table
    // has no opinion for this context.
    let raw_estimate = match markov_guess {
        Some(guess) => (regression_estimate + guess.value() as f64) / 2.0,
        None => regression_estimate,
    };

    let predicted = raw_estimate.round().clamp(0.0, RANGE_MAX as f64) as u8;

    Ok(Prediction {
        predicted,
        raw_estimate,
        markov_guess: markov_guess.map(|d| d.value()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct MemoryModelStore {
        payload: AsyncMutex<Option<String>>,
        fail_saves: bool,
    }

    #[async_trait]
    impl ModelStore for MemoryModelStore {
        async fn load_latest_model(&self) -> Result<Option<String>> {
            Ok(self.payload.lock().await.clone())
        }

        async fn upsert_model(&self, payload: &str) -> Result<()> {
            if self.fail_saves {
                anyhow::bail!("store offline");
            }
            *self.payload.lock().await = Some(payload.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryStatsStore {
        snapshot: AsyncMutex<Option<TrackerSnapshot>>,
    }

    #[async_trait]
    impl StatsStore for MemoryStatsStore {
        async fn load_global_stats(&self) -> Result<Option<TrackerSnapshot>> {
            Ok(self.snapshot.lock().await.clone())
        }

        async fn upsert_global_stats(&self, snapshot: &TrackerSnapshot) -> Result<()> {
            *self.snapshot.lock().await = Some(snapshot.clone());
            Ok(())
        }
    }

    fn engine_with(settings: EngineSettings) -> (PredictionEngine, Arc<MemoryModelStore>, Arc<MemoryStatsStore>) {
        let model_store = Arc::new(MemoryModelStore::default());
        let stats_store = Arc::new(MemoryStatsStore::default());
        let engine = PredictionEngine::new(model_store.clone(), stats_store.clone(), settings);
        (engine, model_store, stats_store)
    }

    fn ctx(n1: i64, n2: i64, n3: i64) -> Context {
        Context::from_values(n1, n2, n3).unwrap()
    }

    #[tokio::test]
    async fn test_predict_before_init_fails() {
        let (engine, _, _) = engine_with(EngineSettings::default());
        let err = engine.predict_only(&ctx(1, 2, 3)).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelNotReady));
    }

    #[tokio::test]
    async fn test_prediction_is_bounded_digit() {
        let (engine, _, _) = engine_with(EngineSettings::default());
        engine.init().await.unwrap();
        for n1 in 0..10i64 {
            let p = engine.predict_only(&ctx(n1, (n1 + 3) % 10, (n1 + 7) % 10)).await.unwrap();
            assert!(p.predicted <= RANGE_MAX);
        }
    }

    #[tokio::test]
    async fn test_no_markov_means_regression_only() {
        let (engine, _, _) = engine_with(EngineSettings::default());
        engine.init().await.unwrap();
        let p = engine.predict_only(&ctx(2, 4, 6)).await.unwrap();
        assert_eq!(p.markov_guess, None);
        assert_eq!(
            p.predicted,
            p.raw_estimate.round().clamp(0.0, 9.0) as u8
        );
    }

    #[tokio::test]
    async fn test_blend_is_plain_average() {
        // Batch threshold high enough that weights stay frozen.
        let settings = EngineSettings {
            batch_threshold: 100,
            ..EngineSettings::default()
        };
        let (engine, _, _) = engine_with(settings);
        engine.init().await.unwrap();

        let context = ctx(1, 2, 3);
        let before = engine.predict_only(&context).await.unwrap();
        assert_eq!(before.markov_guess, None);

        engine
            .predict_and_learn(&context, Digit::new(7).unwrap())
            .await
            .unwrap();

        let after = engine.predict_only(&context).await.unwrap();
        assert_eq!(after.markov_guess, Some(7));
        let expected = (before.raw_estimate + 7.0) / 2.0;
        assert!((after.raw_estimate - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_batch_trigger_on_fifth_cycle() {
        let (engine, model_store, _) = engine_with(EngineSettings::default());
        engine.init().await.unwrap();

        for i in 0..4i64 {
            engine
                .predict_and_learn(&ctx(i, i + 1, i + 2), Digit::new(i % 10).unwrap())
                .await
                .unwrap();
        }
        assert!(model_store.payload.lock().await.is_none());
        assert_eq!(engine.summary().await.pending_examples, 4);

        engine
            .predict_and_learn(&ctx(5, 6, 7), Digit::new(3).unwrap())
            .await
            .unwrap();
        assert!(model_store.payload.lock().await.is_some());
        assert_eq!(engine.summary().await.pending_examples, 0);
    }

    #[tokio::test]
    async fn test_learning_updates_stats_and_persists_snapshot() {
        let (engine, _, stats_store) = engine_with(EngineSettings::default());
        engine.init().await.unwrap();

        let context = ctx(2, 4, 6);
        let prediction = engine.predict_only(&context).await.unwrap();
        let outcome = engine
            .predict_and_learn(&context, Digit::new(prediction.predicted as i64).unwrap())
            .await
            .unwrap();

        assert!(outcome.correct);
        assert_eq!(outcome.current_streak, 1);
        assert_eq!(outcome.rolling_accuracy, 100.0);

        let snapshot = stats_store.snapshot.lock().await.clone().unwrap();
        assert_eq!(snapshot.correct_count, 1);
        assert_eq!(snapshot.incorrect_count, 0);
        assert_eq!(snapshot.window, vec![true]);
    }

    #[tokio::test]
    async fn test_save_failure_does_not_fail_cycle() {
        let model_store = Arc::new(MemoryModelStore {
            payload: AsyncMutex::new(None),
            fail_saves: true,
        });
        let stats_store = Arc::new(MemoryStatsStore::default());
        let engine = PredictionEngine::new(
            model_store.clone(),
            stats_store,
            EngineSettings::default(),
        );
        engine.init().await.unwrap();

        for i in 0..5i64 {
            let outcome = engine
                .predict_and_learn(&ctx(i, i, i), Digit::new(i).unwrap())
                .await;
            assert!(outcome.is_ok());
        }
    }

    #[tokio::test]
    async fn test_init_restores_snapshot() {
        let stats_store = Arc::new(MemoryStatsStore {
            snapshot: AsyncMutex::new(Some(TrackerSnapshot {
                correct_count: 10,
                incorrect_count: 4,
                window: vec![true, false, true],
            })),
        });
        let engine = PredictionEngine::new(
            Arc::new(MemoryModelStore::default()),
            stats_store,
            EngineSettings::default(),
        );
        engine.init().await.unwrap();

        let summary = engine.summary().await;
        assert_eq!(summary.correct_count, 10);
        assert_eq!(summary.incorrect_count, 4);
        assert!((summary.rolling_accuracy - 2.0 / 3.0 * 100.0).abs() < 1e-9);
    }
}
