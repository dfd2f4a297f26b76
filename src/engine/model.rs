use anyhow::Result;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::features::ContextFeatures;
use crate::types::RANGE_MAX;

const HIDDEN_1: usize = 16;
const HIDDEN_2: usize = 8;

/// One buffered learning example. Targets are normalized into [0,1].
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub features: ContextFeatures,
    pub target: f64,
}

/// Training knobs, overridable from settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub min_examples: usize,
    pub epochs: usize,
    pub chunk_size: usize,
    pub learning_rate: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            min_examples: 5,
            epochs: 30,
            chunk_size: 16,
            learning_rate: 0.01,
        }
    }
}

/// Report after a completed training round.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub samples: usize,
    pub epochs: usize,
    pub final_loss: f64,
}

/// Serialized topology + weights for persistence. Round-trips exactly:
/// a reloaded model scores identically to the one that was saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelWeights {
    input_dim: usize,
    hidden_1: usize,
    hidden_2: usize,
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: Vec<f64>,
    w3: Vec<f64>,
    b3: Vec<f64>,
}

/// Regression model mapping a context feature vector to a digit estimate.
///
/// Small MLP (8 -> 16 -> 8 -> 1) with ReLU hidden layers and a sigmoid
/// output head, trained with mean-squared-error and Adam. Weights are
/// mutated only by `train_batch`; `score_one` is inference only.
pub struct DigitRegressor {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
    w3: Array2<f64>,
    b3: Array1<f64>,
    adam: AdamState,
    params: TrainingParams,
}

impl DigitRegressor {
    /// Fresh model with Xavier-initialized weights.
    pub fn new(params: TrainingParams) -> Self {
        let input = ContextFeatures::NUM_FEATURES;
        Self {
            w1: xavier_init(HIDDEN_1, input),
            b1: Array1::zeros(HIDDEN_1),
            w2: xavier_init(HIDDEN_2, HIDDEN_1),
            b2: Array1::zeros(HIDDEN_2),
            w3: xavier_init(1, HIDDEN_2),
            b3: Array1::zeros(1),
            adam: AdamState::new(),
            params,
        }
    }

    /// Forward inference for a single feature vector, scaled back into
    /// the digit range. No training side effects.
    pub fn score_one(&self, features: &ContextFeatures) -> f64 {
        let x = Array1::from_vec(features.to_array().to_vec());
        let h1 = relu(&(self.w1.dot(&x) + &self.b1));
        let h2 = relu(&(self.w2.dot(&h1) + &self.b2));
        let out = sigmoid_scalar(self.w3.dot(&h2)[0] + self.b3[0]);
        out * RANGE_MAX as f64
    }

    /// Run a fixed number of optimization passes over the buffered
    /// examples. Silent no-op below the minimum batch size. The caller
    /// clears its buffer afterwards; no example data is retained here.
    pub fn train_batch(&mut self, examples: &[TrainingExample]) -> Option<TrainingReport> {
        if examples.len() < self.params.min_examples {
            debug!(
                "Skipping training: {} examples < {} minimum",
                examples.len(),
                self.params.min_examples
            );
            return None;
        }

        let mut final_loss = 0.0;
        for _epoch in 0..self.params.epochs {
            for chunk in examples.chunks(self.params.chunk_size) {
                final_loss = self.train_chunk(chunk);
            }
        }

        let report = TrainingReport {
            samples: examples.len(),
            epochs: self.params.epochs,
            final_loss,
        };
        info!(
            "Model trained: {} samples, {} epochs, final loss {:.6}",
            report.samples, report.epochs, report.final_loss
        );
        Some(report)
    }

    /// One Adam step over a chunk; returns the chunk's MSE before the step.
    fn train_chunk(&mut self, chunk: &[TrainingExample]) -> f64 {
        let n = chunk.len();
        let mut x = Array2::<f64>::zeros((n, ContextFeatures::NUM_FEATURES));
        let mut targets = Array2::<f64>::zeros((n, 1));
        for (i, example) in chunk.iter().enumerate() {
            for (j, &value) in example.features.to_array().iter().enumerate() {
                x[[i, j]] = value;
            }
            targets[[i, 0]] = example.target;
        }

        // Forward pass, keeping pre-activations for backprop.
        let z1 = x.dot(&self.w1.t()) + &self.b1;
        let a1 = relu2(&z1);
        let z2 = a1.dot(&self.w2.t()) + &self.b2;
        let a2 = relu2(&z2);
        let z3 = a2.dot(&self.w3.t()) + &self.b3;
        let y = z3.mapv(sigmoid_scalar);

        let diff = &y - &targets;
        let loss = diff.mapv(|d| d * d).mean().unwrap_or(0.0);

        // Backward pass: MSE through sigmoid, then the two ReLU layers.
        let dz3 = &diff * &y.mapv(|v| v * (1.0 - v)) * (2.0 / n as f64);
        let grad_w3 = dz3.t().dot(&a2);
        let grad_b3 = dz3.sum_axis(Axis(0));

        let dz2 = dz3.dot(&self.w3) * z2.mapv(relu_grad);
        let grad_w2 = dz2.t().dot(&a1);
        let grad_b2 = dz2.sum_axis(Axis(0));

        let dz1 = dz2.dot(&self.w2) * z1.mapv(relu_grad);
        let grad_w1 = dz1.t().dot(&x);
        let grad_b1 = dz1.sum_axis(Axis(0));

        let lr = self.params.learning_rate;
        self.adam.advance();
        self.adam.step_matrix(0, &mut self.w1, &grad_w1, lr);
        self.adam.step_vector(1, &mut self.b1, &grad_b1, lr);
        self.adam.step_matrix(2, &mut self.w2, &grad_w2, lr);
        self.adam.step_vector(3, &mut self.b2, &grad_b2, lr);
        self.adam.step_matrix(4, &mut self.w3, &grad_w3, lr);
        self.adam.step_vector(5, &mut self.b3, &grad_b3, lr);

        loss
    }

    /// Serialize topology + weights to JSON for the single-slot store.
    pub fn save_to_json(&self) -> Result<String> {
        let weights = ModelWeights {
            input_dim: ContextFeatures::NUM_FEATURES,
            hidden_1: HIDDEN_1,
            hidden_2: HIDDEN_2,
            w1: self.w1.iter().copied().collect(),
            b1: self.b1.to_vec(),
            w2: self.w2.iter().copied().collect(),
            b2: self.b2.to_vec(),
            w3: self.w3.iter().copied().collect(),
            b3: self.b3.to_vec(),
        };
        Ok(serde_json::to_string(&weights)?)
    }

    /// Rebuild a model from its persisted representation. Optimizer
    /// moments restart fresh; only predictions are guaranteed to match.
    pub fn load_from_json(json: &str, params: TrainingParams) -> Result<Self> {
        let weights: ModelWeights = serde_json::from_str(json)?;
        Ok(Self {
            w1: Array2::from_shape_vec((weights.hidden_1, weights.input_dim), weights.w1)?,
            b1: Array1::from_vec(weights.b1),
            w2: Array2::from_shape_vec((weights.hidden_2, weights.hidden_1), weights.w2)?,
            b2: Array1::from_vec(weights.b2),
            w3: Array2::from_shape_vec((1, weights.hidden_2), weights.w3)?,
            b3: Array1::from_vec(weights.b3),
            adam: AdamState::new(),
            params,
        })
    }
}

/// Adam optimizer state: first/second moment estimates per parameter slot.
struct AdamState {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: Vec<Array1<f64>>,
    v: Vec<Array1<f64>>,
}

impl AdamState {
    fn new() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    fn advance(&mut self) {
        self.t += 1;
    }

    fn step_matrix(&mut self, slot: usize, param: &mut Array2<f64>, grad: &Array2<f64>, lr: f64) {
        let flat_grad = Array1::from_iter(grad.iter().copied());
        let update = self.update(slot, &flat_grad, lr);
        for (p, u) in param.iter_mut().zip(update.iter()) {
            *p -= u;
        }
    }

    fn step_vector(&mut self, slot: usize, param: &mut Array1<f64>, grad: &Array1<f64>, lr: f64) {
        let update = self.update(slot, grad, lr);
        for (p, u) in param.iter_mut().zip(update.iter()) {
            *p -= u;
        }
    }

    fn update(&mut self, slot: usize, grad: &Array1<f64>, lr: f64) -> Array1<f64> {
        while self.m.len() <= slot {
            self.m.push(Array1::zeros(grad.len()));
            self.v.push(Array1::zeros(grad.len()));
        }

        let m = &mut self.m[slot];
        let v = &mut self.v[slot];
        *m = &*m * self.beta1 + grad * (1.0 - self.beta1);
        *v = &*v * self.beta2 + grad.mapv(|g| g * g) * (1.0 - self.beta2);

        let m_hat = &*m / (1.0 - self.beta1.powi(self.t));
        let v_hat = &*v / (1.0 - self.beta2.powi(self.t));

        m_hat * lr / (v_hat.mapv(f64::sqrt) + self.epsilon)
    }
}

fn xavier_init(rows: usize, cols: usize) -> Array2<f64> {
    let mut rng = rand::thread_rng();
    let scale = (2.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-scale..scale))
}

fn relu(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| v.max(0.0))
}

fn relu2(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| v.max(0.0))
}

fn relu_grad(z: f64) -> f64 {
    if z > 0.0 {
        1.0
    } else {
        0.0
    }
}

fn sigmoid_scalar(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::features::extract_features;
    use crate::types::Context;

    fn features(n1: i64, n2: i64, n3: i64) -> ContextFeatures {
        extract_features(&Context::from_values(n1, n2, n3).unwrap())
    }

    #[test]
    fn test_score_is_in_digit_range() {
        let model = DigitRegressor::new(TrainingParams::default());
        let score = model.score_one(&features(2, 4, 6));
        assert!((0.0..=RANGE_MAX as f64).contains(&score));
    }

    #[test]
    fn test_undersized_batch_is_noop() {
        let mut model = DigitRegressor::new(TrainingParams::default());
        let before = model.score_one(&features(1, 2, 3));
        let examples: Vec<TrainingExample> = (0..4)
            .map(|i| TrainingExample {
                features: features(i, i, i),
                target: 0.5,
            })
            .collect();
        assert!(model.train_batch(&examples).is_none());
        let after = model.score_one(&features(1, 2, 3));
        assert_eq!(before, after);
    }

    #[test]
    fn test_training_reduces_loss_toward_target() {
        let mut model = DigitRegressor::new(TrainingParams::default());
        let target = 8.0 / RANGE_MAX as f64;
        let examples: Vec<TrainingExample> = (0..8)
            .map(|i| TrainingExample {
                features: features(i % 10, (i + 1) % 10, (i + 2) % 10),
                target,
            })
            .collect();

        let before: f64 = examples
            .iter()
            .map(|e| (model.score_one(&e.features) / RANGE_MAX as f64 - target).powi(2))
            .sum();
        let report = model.train_batch(&examples).expect("batch large enough");
        assert_eq!(report.samples, 8);
        let after: f64 = examples
            .iter()
            .map(|e| (model.score_one(&e.features) / RANGE_MAX as f64 - target).powi(2))
            .sum();
        assert!(after < before, "loss should drop: before={before} after={after}");
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut model = DigitRegressor::new(TrainingParams::default());
        let examples: Vec<TrainingExample> = (0..6)
            .map(|i| TrainingExample {
                features: features(i, i + 1, i + 2),
                target: (i as f64) / 10.0,
            })
            .collect();
        model.train_batch(&examples);

        let json = model.save_to_json().unwrap();
        let restored = DigitRegressor::load_from_json(&json, TrainingParams::default()).unwrap();

        for ctx in [(2, 4, 6), (0, 0, 0), (9, 9, 9), (1, 5, 3)] {
            let f = features(ctx.0, ctx.1, ctx.2);
            let a = model.score_one(&f);
            let b = restored.score_one(&f);
            assert!((a - b).abs() < 1e-5, "round trip drifted: {a} vs {b}");
        }
    }
}
