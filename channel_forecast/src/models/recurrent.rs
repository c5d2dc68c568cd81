//! Single-layer LSTM regressor
//!
//! One LSTM layer (ReLU on the cell candidate and cell output, sigmoid
//! gates) followed by dropout on the final hidden state and a linear dense
//! output. Trained with mean squared error, Adam and full backpropagation
//! through time. Optimizer moments are persisted with the weights so a
//! reloaded model continues training where it stopped.

use super::{artifact_timestamp, require_file, Forecaster};
use crate::error::{ForecastError, Result};
use crate::window::SequenceWindows;
use ndarray::{Array, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Binary weights and optimizer state
pub const WEIGHTS_FILE: &str = "model.bin";
/// Input shape and architecture description
pub const CONFIG_FILE: &str = "config.json";

/// Network and optimizer hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub hidden_units: usize,
    pub dropout_rate: f64,
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    /// Global gradient norm limit
    pub clip_norm: f64,
    /// Seed for weight initialization
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden_units: 50,
            dropout_rate: 0.2,
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            clip_norm: 1.0,
            seed: 42,
        }
    }
}

/// Options for one call to `fit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Trailing fraction of the windows held out for validation loss
    pub validation_split: f64,
    /// Shuffle training windows every epoch
    pub shuffle: bool,
    /// Seed for shuffling and dropout masks
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
            shuffle: true,
            seed: 42,
        }
    }
}

/// Per-epoch losses of one fit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitHistory {
    pub loss: Vec<f64>,
    /// Empty when no validation split was used
    pub val_loss: Vec<f64>,
}

impl FitHistory {
    pub fn final_loss(&self) -> Option<f64> {
        self.loss.last().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Gate {
    /// Input weights, `[hidden, features]`
    w: Array2<f64>,
    /// Recurrent weights, `[hidden, hidden]`
    u: Array2<f64>,
    b: Array1<f64>,
}

impl Gate {
    fn zeros(hidden: usize, features: usize) -> Self {
        Self {
            w: Array2::zeros((hidden, features)),
            u: Array2::zeros((hidden, hidden)),
            b: Array1::zeros(hidden),
        }
    }

    fn random(hidden: usize, features: usize, bias: f64, rng: &mut StdRng) -> Self {
        Self {
            w: glorot((hidden, features), rng),
            u: glorot((hidden, hidden), rng),
            b: Array1::from_elem(hidden, bias),
        }
    }

    fn pre_activation(&self, x: ArrayView1<f64>, h: &Array1<f64>) -> Array1<f64> {
        self.w.dot(&x) + self.u.dot(h) + &self.b
    }

    fn accumulate(&mut self, dz: &Array1<f64>, x: ArrayView1<f64>, h_prev: &Array1<f64>) {
        let dz_col = dz.view().insert_axis(Axis(1));
        self.w += &dz_col.dot(&x.insert_axis(Axis(0)));
        self.u += &dz_col.dot(&h_prev.view().insert_axis(Axis(0)));
        self.b += dz;
    }

    fn sum_squares(&self) -> f64 {
        sq(&self.w) + sq(&self.u) + sq(&self.b)
    }

    fn scale(&mut self, factor: f64) {
        self.w *= factor;
        self.u *= factor;
        self.b *= factor;
    }

    fn adam(&mut self, m: &mut Gate, v: &mut Gate, g: &Gate, step: &AdamStep) {
        step.apply(&mut self.w, &mut m.w, &mut v.w, &g.w);
        step.apply(&mut self.u, &mut m.u, &mut v.u, &g.u);
        step.apply(&mut self.b, &mut m.b, &mut v.b, &g.b);
    }
}

/// All trainable weights; the same layout holds gradients and moments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Parameters {
    input: Gate,
    forget: Gate,
    candidate: Gate,
    output: Gate,
    dense_w: Array1<f64>,
    dense_b: Array1<f64>,
}

impl Parameters {
    fn zeros(hidden: usize, features: usize) -> Self {
        Self {
            input: Gate::zeros(hidden, features),
            forget: Gate::zeros(hidden, features),
            candidate: Gate::zeros(hidden, features),
            output: Gate::zeros(hidden, features),
            dense_w: Array1::zeros(hidden),
            dense_b: Array1::zeros(1),
        }
    }

    fn random(hidden: usize, features: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (hidden + 1) as f64).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        Self {
            input: Gate::random(hidden, features, 0.0, rng),
            // unit forget bias
            forget: Gate::random(hidden, features, 1.0, rng),
            candidate: Gate::random(hidden, features, 0.0, rng),
            output: Gate::random(hidden, features, 0.0, rng),
            dense_w: Array1::from_shape_fn(hidden, |_| rng.sample(dist)),
            dense_b: Array1::zeros(1),
        }
    }

    fn gates_mut(&mut self) -> [&mut Gate; 4] {
        [
            &mut self.input,
            &mut self.forget,
            &mut self.candidate,
            &mut self.output,
        ]
    }

    fn norm(&self) -> f64 {
        (self.input.sum_squares()
            + self.forget.sum_squares()
            + self.candidate.sum_squares()
            + self.output.sum_squares()
            + sq(&self.dense_w)
            + sq(&self.dense_b))
        .sqrt()
    }

    fn scale(&mut self, factor: f64) {
        for gate in self.gates_mut() {
            gate.scale(factor);
        }
        self.dense_w *= factor;
        self.dense_b *= factor;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AdamState {
    m: Parameters,
    v: Parameters,
    step: u64,
}

struct AdamStep {
    lr_t: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
}

impl AdamStep {
    fn apply<D: Dimension>(
        &self,
        param: &mut Array<f64, D>,
        m: &mut Array<f64, D>,
        v: &mut Array<f64, D>,
        g: &Array<f64, D>,
    ) {
        Zip::from(param)
            .and(m)
            .and(v)
            .and(g)
            .for_each(|p, m, v, &g| {
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                *p -= self.lr_t * *m / (v.sqrt() + self.epsilon);
            });
    }
}

/// Activations kept from the forward pass of one time step
struct StepCache {
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    z_g: Array1<f64>,
    c: Array1<f64>,
}

#[derive(Serialize, Deserialize)]
struct PersistedNetwork {
    config: NetworkConfig,
    input_shape: (usize, usize),
    params: Parameters,
    optimizer: AdamState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LayerSummary {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    units: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    activation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Architecture {
    layers: Vec<LayerSummary>,
    loss: String,
    optimizer: String,
    learning_rate: f64,
}

/// Contents of `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NetworkDescription {
    input_shape: [usize; 2],
    architecture: Architecture,
    timestamp: String,
}

/// The sequence base forecaster
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentForecaster {
    config: NetworkConfig,
    sequence_length: usize,
    n_features: usize,
    params: Parameters,
    optimizer: AdamState,
    fit_options: FitOptions,
}

impl RecurrentForecaster {
    /// Fresh network for windows of `sequence_length` rows and `n_features`
    /// columns.
    pub fn new(sequence_length: usize, n_features: usize, config: NetworkConfig) -> Result<Self> {
        if sequence_length == 0 || n_features == 0 || config.hidden_units == 0 {
            return Err(ForecastError::InvalidParameter(format!(
                "Invalid network shape: sequence {}, features {}, hidden {}",
                sequence_length, n_features, config.hidden_units
            )));
        }
        if !(0.0..1.0).contains(&config.dropout_rate) {
            return Err(ForecastError::InvalidParameter(format!(
                "Dropout rate must be in [0, 1), got {}",
                config.dropout_rate
            )));
        }

        let hidden = config.hidden_units;
        let mut rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            params: Parameters::random(hidden, n_features, &mut rng),
            optimizer: AdamState {
                m: Parameters::zeros(hidden, n_features),
                v: Parameters::zeros(hidden, n_features),
                step: 0,
            },
            config,
            sequence_length,
            n_features,
            fit_options: FitOptions::default(),
        })
    }

    /// `(sequence_length, n_features)`
    pub fn input_shape(&self) -> (usize, usize) {
        (self.sequence_length, self.n_features)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Options used by [`Forecaster::fit`].
    pub fn set_fit_options(&mut self, options: FitOptions) {
        self.fit_options = options;
    }

    /// Train on `windows`, continuing from the current weights.
    pub fn fit_windows(&mut self, windows: &SequenceWindows, options: &FitOptions) -> Result<FitHistory> {
        self.check_shape(&windows.inputs)?;
        if windows.is_empty() {
            return Err(ForecastError::DataValidation(
                "No training windows: history is not longer than the sequence length".to_string(),
            ));
        }
        if options.batch_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "batch_size must be positive".to_string(),
            ));
        }

        let n = windows.len();
        let n_val = ((n as f64) * options.validation_split).floor() as usize;
        let n_train = n - n_val;
        if n_train == 0 {
            return Err(ForecastError::InvalidParameter(format!(
                "validation_split {} leaves no training windows",
                options.validation_split
            )));
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut order: Vec<usize> = (0..n_train).collect();
        let mut history = FitHistory::default();

        for epoch in 0..options.epochs {
            if options.shuffle {
                order.shuffle(&mut rng);
            }

            let mut epoch_loss = 0.0;
            for batch in order.chunks(options.batch_size) {
                epoch_loss += self.train_batch(windows, batch, &mut rng)? * batch.len() as f64;
            }
            let loss = epoch_loss / n_train as f64;
            history.loss.push(loss);

            if n_val > 0 {
                let val_loss = (n_train..n)
                    .map(|i| {
                        let prediction = self.forward(windows.inputs.index_axis(Axis(0), i));
                        (prediction - windows.targets[i]).powi(2)
                    })
                    .sum::<f64>()
                    / n_val as f64;
                history.val_loss.push(val_loss);
                debug!(epoch = epoch + 1, loss = loss, val_loss = val_loss, "Epoch complete");
            } else {
                debug!(epoch = epoch + 1, loss = loss, "Epoch complete");
            }
        }

        info!(
            windows = n,
            epochs = options.epochs,
            final_loss = history.final_loss().unwrap_or(f64::NAN),
            "Fitted sequence model"
        );
        Ok(history)
    }

    /// One prediction per window.
    pub fn predict_windows(&self, inputs: &Array3<f64>) -> Result<Vec<f64>> {
        self.check_shape(inputs)?;
        Ok(inputs
            .outer_iter()
            .map(|window| self.forward(window))
            .collect())
    }

    fn check_shape(&self, inputs: &Array3<f64>) -> Result<()> {
        let (_, length, features) = inputs.dim();
        if (length, features) != self.input_shape() {
            return Err(ForecastError::ConfigurationMismatch(format!(
                "Expected windows of shape ({}, {}), got ({}, {})",
                self.sequence_length, self.n_features, length, features
            )));
        }
        Ok(())
    }

    /// Inference pass; dropout is inactive.
    fn forward(&self, window: ArrayView2<f64>) -> f64 {
        let hidden = self.config.hidden_units;
        let mut h = Array1::<f64>::zeros(hidden);
        let mut c = Array1::<f64>::zeros(hidden);
        for x in window.outer_iter() {
            let i = self.params.input.pre_activation(x, &h).mapv(sigmoid);
            let f = self.params.forget.pre_activation(x, &h).mapv(sigmoid);
            let g = self.params.candidate.pre_activation(x, &h).mapv(relu);
            let o = self.params.output.pre_activation(x, &h).mapv(sigmoid);
            c = &f * &c + &i * &g;
            h = &o * &c.mapv(relu);
        }
        self.params.dense_w.dot(&h) + self.params.dense_b[0]
    }

    /// Forward, backward and one Adam update over `batch`; returns the
    /// batch mean squared error.
    fn train_batch(&mut self, windows: &SequenceWindows, batch: &[usize], rng: &mut StdRng) -> Result<f64> {
        let (mut grads, loss) = self.batch_gradients(windows, batch, rng);

        let norm = grads.norm();
        if !norm.is_finite() {
            return Err(ForecastError::Model(
                "Sequence model gradients diverged".to_string(),
            ));
        }
        if norm > self.config.clip_norm {
            grads.scale(self.config.clip_norm / norm);
        }
        self.apply_adam(&grads);
        Ok(loss)
    }

    /// Gradients of the batch mean squared error by backpropagation through
    /// time, and the loss itself.
    fn batch_gradients(&self, windows: &SequenceWindows, batch: &[usize], rng: &mut StdRng) -> (Parameters, f64) {
        let hidden = self.config.hidden_units;
        let keep = 1.0 - self.config.dropout_rate;
        let mut grads = Parameters::zeros(hidden, self.n_features);
        let mut loss = 0.0;

        for &sample in batch {
            let window = windows.inputs.index_axis(Axis(0), sample);
            let target = windows.targets[sample];

            let mut h = Array1::<f64>::zeros(hidden);
            let mut c = Array1::<f64>::zeros(hidden);
            let mut cache = Vec::with_capacity(self.sequence_length);
            for x in window.outer_iter() {
                let i = self.params.input.pre_activation(x, &h).mapv(sigmoid);
                let f = self.params.forget.pre_activation(x, &h).mapv(sigmoid);
                let z_g = self.params.candidate.pre_activation(x, &h);
                let g = z_g.mapv(relu);
                let o = self.params.output.pre_activation(x, &h).mapv(sigmoid);
                let c_next = &f * &c + &i * &g;
                let h_next = &o * &c_next.mapv(relu);
                cache.push(StepCache {
                    h_prev: h,
                    c_prev: c,
                    i,
                    f,
                    g,
                    o,
                    z_g,
                    c: c_next.clone(),
                });
                h = h_next;
                c = c_next;
            }

            let mask = Array1::from_shape_fn(hidden, |_| {
                if rng.gen::<f64>() < keep {
                    1.0 / keep
                } else {
                    0.0
                }
            });
            let dropped = &h * &mask;
            let prediction = self.params.dense_w.dot(&dropped) + self.params.dense_b[0];
            let error = prediction - target;
            loss += error * error;

            let dy = 2.0 * error / batch.len() as f64;
            grads.dense_w.scaled_add(dy, &dropped);
            grads.dense_b[0] += dy;

            let mut dh = &self.params.dense_w * &mask * dy;
            let mut dc_next = Array1::<f64>::zeros(hidden);
            for (step, x) in cache.iter().zip(window.outer_iter()).rev() {
                let relu_c = step.c.mapv(relu);
                let dc = &dh * &step.o * &step.c.mapv(relu_grad) + &dc_next;

                let dz_o = &dh * &relu_c * &step.o.mapv(|v| v * (1.0 - v));
                let dz_i = &dc * &step.g * &step.i.mapv(|v| v * (1.0 - v));
                let dz_g = &dc * &step.i * &step.z_g.mapv(relu_grad);
                let dz_f = &dc * &step.c_prev * &step.f.mapv(|v| v * (1.0 - v));

                grads.input.accumulate(&dz_i, x, &step.h_prev);
                grads.forget.accumulate(&dz_f, x, &step.h_prev);
                grads.candidate.accumulate(&dz_g, x, &step.h_prev);
                grads.output.accumulate(&dz_o, x, &step.h_prev);

                dh = self.params.input.u.t().dot(&dz_i)
                    + self.params.forget.u.t().dot(&dz_f)
                    + self.params.candidate.u.t().dot(&dz_g)
                    + self.params.output.u.t().dot(&dz_o);
                dc_next = &dc * &step.f;
            }
        }

        (grads, loss / batch.len() as f64)
    }

    fn apply_adam(&mut self, grads: &Parameters) {
        self.optimizer.step += 1;
        let t = self.optimizer.step as i32;
        let step = AdamStep {
            lr_t: self.config.learning_rate * (1.0 - self.config.beta2.powi(t)).sqrt()
                / (1.0 - self.config.beta1.powi(t)),
            beta1: self.config.beta1,
            beta2: self.config.beta2,
            epsilon: self.config.epsilon,
        };

        let AdamState { m, v, .. } = &mut self.optimizer;
        self.params.input.adam(&mut m.input, &mut v.input, &grads.input, &step);
        self.params.forget.adam(&mut m.forget, &mut v.forget, &grads.forget, &step);
        self.params.candidate.adam(&mut m.candidate, &mut v.candidate, &grads.candidate, &step);
        self.params.output.adam(&mut m.output, &mut v.output, &grads.output, &step);
        step.apply(&mut self.params.dense_w, &mut m.dense_w, &mut v.dense_w, &grads.dense_w);
        step.apply(&mut self.params.dense_b, &mut m.dense_b, &mut v.dense_b, &grads.dense_b);
    }

    fn describe(&self) -> NetworkDescription {
        let layer = |kind: &str, units: Option<usize>, activation: Option<&str>, rate: Option<f64>| {
            LayerSummary {
                kind: kind.to_string(),
                units,
                activation: activation.map(str::to_string),
                rate,
            }
        };
        NetworkDescription {
            input_shape: [self.sequence_length, self.n_features],
            architecture: Architecture {
                layers: vec![
                    layer("LSTM", Some(self.config.hidden_units), Some("relu"), None),
                    layer("Dropout", None, None, Some(self.config.dropout_rate)),
                    layer("Dense", Some(1), Some("linear"), None),
                ],
                loss: "mse".to_string(),
                optimizer: "adam".to_string(),
                learning_rate: self.config.learning_rate,
            },
            timestamp: artifact_timestamp(),
        }
    }
}

impl Forecaster for RecurrentForecaster {
    type TrainInput = SequenceWindows;
    type PredictInput = Array3<f64>;
    type Prediction = Vec<f64>;
    type FitReport = FitHistory;

    const ARTIFACT_DIR: &'static str = "lstm";

    fn fit(&mut self, data: &SequenceWindows) -> Result<FitHistory> {
        let options = self.fit_options.clone();
        self.fit_windows(data, &options)
    }

    fn predict(&self, data: &Array3<f64>) -> Result<Vec<f64>> {
        self.predict_windows(data)
    }

    fn save(&self, dir: &Path) -> Result<()> {
        let persisted = PersistedNetwork {
            config: self.config.clone(),
            input_shape: self.input_shape(),
            params: self.params.clone(),
            optimizer: self.optimizer.clone(),
        };
        fs::write(dir.join(WEIGHTS_FILE), bincode::serialize(&persisted)?)?;
        fs::write(
            dir.join(CONFIG_FILE),
            serde_json::to_string_pretty(&self.describe())?,
        )?;
        Ok(())
    }

    fn load(dir: &Path) -> Result<Self> {
        let weights_path = dir.join(WEIGHTS_FILE);
        let config_path = dir.join(CONFIG_FILE);
        require_file(&weights_path)?;
        require_file(&config_path)?;

        let persisted: PersistedNetwork = bincode::deserialize(&fs::read(&weights_path)?)?;
        let description: NetworkDescription = serde_json::from_str(&fs::read_to_string(&config_path)?)?;
        let (sequence_length, n_features) = persisted.input_shape;
        if description.input_shape != [sequence_length, n_features] {
            return Err(ForecastError::ConfigurationMismatch(format!(
                "{} declares input shape {:?} but weights expect ({}, {})",
                config_path.display(),
                description.input_shape,
                sequence_length,
                n_features
            )));
        }

        Ok(Self {
            config: persisted.config,
            sequence_length,
            n_features,
            params: persisted.params,
            optimizer: persisted.optimizer,
            fit_options: FitOptions::default(),
        })
    }
}

fn glorot(shape: (usize, usize), rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (shape.0 + shape.1) as f64).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn(shape, |_| rng.sample(dist))
}

fn sq<D: Dimension>(a: &Array<f64, D>) -> f64 {
    a.iter().map(|v| v * v).sum()
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v.clamp(-500.0, 500.0)).exp())
}

fn relu(v: f64) -> f64 {
    v.max(0.0)
}

fn relu_grad(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else {
        0.0
    }
}
