//! Dueling Q-network with analytic gradients and Adam.
//!
//! ```text
//!   state(8) -> fc1(H) -> fc2(H) -> fc3(H/2) -+-> value_hidden(H/4) -> value_out(1)
//!                                             +-> adv_hidden(H/4)   -> adv_out(7)
//!
//!   Q = V + (A - mean(A))
//! ```
//!
//! Dense rows are evaluated with `trueno::Vector` dot products so the forward
//! pass picks up the SIMD backend trueno selects at runtime.

use super::action::ACTION_COUNT;
use super::state::STATE_DIM;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use trueno::Vector;

/// Default trunk width.
pub const DEFAULT_HIDDEN_DIM: usize = 64;

/// Fully connected layer, `y = W x + b`, weights row-major `[outputs][inputs]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    inputs: usize,
    outputs: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Dense {
    /// He-uniform initialised layer, zero bias.
    pub fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let limit = (6.0 / inputs.max(1) as f32).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.gen_range(-limit..=limit))
            .collect();
        Self {
            inputs,
            outputs,
            weights,
            bias: vec![0.0; outputs],
        }
    }

    /// Same shape, all zeros.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        Self {
            inputs: self.inputs,
            outputs: self.outputs,
            weights: vec![0.0; self.weights.len()],
            bias: vec![0.0; self.bias.len()],
        }
    }

    /// Input width.
    #[must_use]
    pub const fn inputs(&self) -> usize {
        self.inputs
    }

    /// Output width.
    #[must_use]
    pub const fn outputs(&self) -> usize {
        self.outputs
    }

    fn row(&self, o: usize) -> &[f32] {
        &self.weights[o * self.inputs..(o + 1) * self.inputs]
    }

    /// `W x + b`.
    #[must_use]
    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.inputs);
        let xv = Vector::from_slice(x);
        (0..self.outputs)
            .map(|o| {
                let row = self.row(o);
                let dot = Vector::from_slice(row)
                    .dot(&xv)
                    .unwrap_or_else(|_| row.iter().zip(x).map(|(w, v)| w * v).sum());
                dot + self.bias[o]
            })
            .collect()
    }

    /// Accumulate `dL/dW`, `dL/db` into `grad` and return `dL/dx`.
    fn backward(&self, x: &[f32], dz: &[f32], grad: &mut Self) -> Vec<f32> {
        let mut dx = vec![0.0; self.inputs];
        for (o, &d) in dz.iter().enumerate() {
            if d == 0.0 {
                continue;
            }
            grad.bias[o] += d;
            let base = o * self.inputs;
            for i in 0..self.inputs {
                grad.weights[base + i] += d * x[i];
                dx[i] += self.weights[base + i] * d;
            }
        }
        dx
    }
}

fn relu(mut v: Vec<f32>) -> Vec<f32> {
    for x in &mut v {
        *x = x.max(0.0);
    }
    v
}

/// Zero gradient where the ReLU was inactive.
fn relu_mask(mut grad: Vec<f32>, activated: &[f32]) -> Vec<f32> {
    for (g, &a) in grad.iter_mut().zip(activated) {
        if a <= 0.0 {
            *g = 0.0;
        }
    }
    grad
}

/// Index of the largest value; first wins on ties.
#[must_use]
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}

/// Intermediate activations of one forward pass.
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    input: [f32; STATE_DIM],
    h1: Vec<f32>,
    h2: Vec<f32>,
    h3: Vec<f32>,
    value_hidden: Vec<f32>,
    adv_hidden: Vec<f32>,
    /// Q values per action
    pub q: [f32; ACTION_COUNT],
}

/// Dueling architecture Q-network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuelingNetwork {
    hidden_dim: usize,
    fc1: Dense,
    fc2: Dense,
    fc3: Dense,
    value_hidden: Dense,
    value_out: Dense,
    adv_hidden: Dense,
    adv_out: Dense,
}

impl DuelingNetwork {
    /// Fresh network with trunk width `hidden_dim` (at least 4).
    pub fn new(hidden_dim: usize, rng: &mut StdRng) -> Self {
        let h = hidden_dim.max(4);
        Self {
            hidden_dim: h,
            fc1: Dense::new(STATE_DIM, h, rng),
            fc2: Dense::new(h, h, rng),
            fc3: Dense::new(h, h / 2, rng),
            value_hidden: Dense::new(h / 2, h / 4, rng),
            value_out: Dense::new(h / 4, 1, rng),
            adv_hidden: Dense::new(h / 2, h / 4, rng),
            adv_out: Dense::new(h / 4, ACTION_COUNT, rng),
        }
    }

    /// Trunk width.
    #[must_use]
    pub const fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Same architecture, every parameter zero. Used as a gradient buffer.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        Self {
            hidden_dim: self.hidden_dim,
            fc1: self.fc1.zeros_like(),
            fc2: self.fc2.zeros_like(),
            fc3: self.fc3.zeros_like(),
            value_hidden: self.value_hidden.zeros_like(),
            value_out: self.value_out.zeros_like(),
            adv_hidden: self.adv_hidden.zeros_like(),
            adv_out: self.adv_out.zeros_like(),
        }
    }

    fn layers(&self) -> [&Dense; 7] {
        [
            &self.fc1,
            &self.fc2,
            &self.fc3,
            &self.value_hidden,
            &self.value_out,
            &self.adv_hidden,
            &self.adv_out,
        ]
    }

    fn layers_mut(&mut self) -> [&mut Dense; 7] {
        [
            &mut self.fc1,
            &mut self.fc2,
            &mut self.fc3,
            &mut self.value_hidden,
            &mut self.value_out,
            &mut self.adv_hidden,
            &mut self.adv_out,
        ]
    }

    /// Parameter tensors in a fixed order (weights then bias per layer).
    #[must_use]
    pub fn tensors(&self) -> Vec<&[f32]> {
        self.layers()
            .into_iter()
            .flat_map(|l| [l.weights.as_slice(), l.bias.as_slice()])
            .collect()
    }

    /// Mutable parameter tensors, same order as [`Self::tensors`].
    pub fn tensors_mut(&mut self) -> Vec<&mut [f32]> {
        self.layers_mut()
            .into_iter()
            .flat_map(|l| [l.weights.as_mut_slice(), l.bias.as_mut_slice()])
            .collect()
    }

    /// Total trainable parameters.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.tensors().iter().map(|t| t.len()).sum()
    }

    /// Forward pass keeping activations for backprop.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn forward(&self, state: &[f32; STATE_DIM]) -> ForwardTrace {
        let h1 = relu(self.fc1.forward(state));
        let h2 = relu(self.fc2.forward(&h1));
        let h3 = relu(self.fc3.forward(&h2));
        let value_hidden = relu(self.value_hidden.forward(&h3));
        let value = self.value_out.forward(&value_hidden)[0];
        let adv_hidden = relu(self.adv_hidden.forward(&h3));
        let adv = self.adv_out.forward(&adv_hidden);
        let mean = adv.iter().sum::<f32>() / ACTION_COUNT as f32;

        let mut q = [0.0; ACTION_COUNT];
        for (k, a) in adv.iter().enumerate() {
            q[k] = value + a - mean;
        }
        ForwardTrace {
            input: *state,
            h1,
            h2,
            h3,
            value_hidden,
            adv_hidden,
            q,
        }
    }

    /// Q values for a state.
    #[must_use]
    pub fn q_values(&self, state: &[f32; STATE_DIM]) -> [f32; ACTION_COUNT] {
        self.forward(state).q
    }

    /// Backpropagate `dL/dQ` through a trace, accumulating into `grads`.
    #[allow(clippy::cast_precision_loss)]
    pub fn backward(&self, trace: &ForwardTrace, dq: &[f32; ACTION_COUNT], grads: &mut Self) {
        // dQ_k/dV = 1, dQ_k/dA_j = [k == j] - 1/n
        let d_value: f32 = dq.iter().sum();
        let mean_dq = d_value / ACTION_COUNT as f32;
        let d_adv: Vec<f32> = dq.iter().map(|g| g - mean_dq).collect();

        let d_ah = self
            .adv_out
            .backward(&trace.adv_hidden, &d_adv, &mut grads.adv_out);
        let d_ah = relu_mask(d_ah, &trace.adv_hidden);
        let d_h3_adv = self
            .adv_hidden
            .backward(&trace.h3, &d_ah, &mut grads.adv_hidden);

        let d_vh = self
            .value_out
            .backward(&trace.value_hidden, &[d_value], &mut grads.value_out);
        let d_vh = relu_mask(d_vh, &trace.value_hidden);
        let d_h3_value = self
            .value_hidden
            .backward(&trace.h3, &d_vh, &mut grads.value_hidden);

        let d_h3: Vec<f32> = d_h3_adv.iter().zip(&d_h3_value).map(|(a, b)| a + b).collect();
        let d_h3 = relu_mask(d_h3, &trace.h3);
        let d_h2 = relu_mask(self.fc3.backward(&trace.h2, &d_h3, &mut grads.fc3), &trace.h2);
        let d_h1 = relu_mask(self.fc2.backward(&trace.h1, &d_h2, &mut grads.fc2), &trace.h1);
        self.fc1.backward(&trace.input, &d_h1, &mut grads.fc1);
    }
}

/// Adam optimizer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    /// Learning rate
    pub lr: f32,
    /// First moment decay
    pub beta1: f32,
    /// Second moment decay
    pub beta2: f32,
    /// Numerical floor
    pub eps: f32,
    step: u64,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    /// Optimizer with zeroed moments shaped like `network`.
    #[must_use]
    pub fn new(network: &DuelingNetwork, lr: f32) -> Self {
        let zeros: Vec<Vec<f32>> = network.tensors().iter().map(|t| vec![0.0; t.len()]).collect();
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            m: zeros.clone(),
            v: zeros,
        }
    }

    /// Steps taken.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.step
    }

    /// Apply one update from `grads` to `network`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn step(&mut self, network: &mut DuelingNetwork, grads: &DuelingNetwork) {
        self.step += 1;
        let t = self.step.min(i32::MAX as u64) as i32;
        let bc1 = 1.0 - self.beta1.powi(t);
        let bc2 = 1.0 - self.beta2.powi(t);

        for (((param, grad), m), v) in network
            .tensors_mut()
            .into_iter()
            .zip(grads.tensors())
            .zip(&mut self.m)
            .zip(&mut self.v)
        {
            for i in 0..param.len() {
                let g = grad[i];
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                let m_hat = m[i] / bc1;
                let v_hat = v[i] / bc2;
                param[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}
