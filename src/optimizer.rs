//! Stochastic gradient descent and its adaptive relatives.
//!
//! A [`Trainer`] owns the update rule, its hyperparameters, and the
//! per-parameter accumulator state some rules carry between steps. Each
//! [`train`](Trainer::train) call runs one example forward and backward,
//! then applies an update once enough examples have accumulated to fill a
//! mini-batch.

use crate::layer::LossTarget;
use crate::network::Network;
use crate::tensor::Tensor;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// The parameter update rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Plain gradient descent, with classical momentum when the momentum
    /// hyperparameter is positive.
    #[default]
    Sgd,
    /// Adaptive moments: per-parameter first and second moment estimates
    /// with bias correction.
    Adam,
    /// Per-parameter learning rates from the running sum of squared
    /// gradients.
    Adagrad,
    /// Adagrad over a decaying window instead of the full history.
    Windowgrad,
    /// Windowed second moments on both the gradient and the update, with no
    /// global learning rate in the step itself.
    Adadelta,
    /// Nesterov accelerated gradient.
    Nesterov,
}

/// Trainer hyperparameters.
///
/// The defaults match the common small-network settings: learning rate
/// 0.01, batch size 1, momentum 0.9, window decay `ro` 0.95, smoothing
/// `eps` 1e-8, Adam moment decays 0.9 and 0.999, no weight decay.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrainerOptions {
    pub method: Method,
    pub learning_rate: f64,
    pub l1_decay: f64,
    pub l2_decay: f64,
    /// Number of examples accumulated per parameter update.
    pub batch_size: usize,
    /// Momentum for SGD and Nesterov. Zero disables it.
    pub momentum: f64,
    /// Window decay rate for windowgrad and adadelta.
    pub ro: f64,
    /// Smoothing constant keeping adaptive denominators away from zero.
    pub eps: f64,
    /// First moment decay for Adam.
    pub beta1: f64,
    /// Second moment decay for Adam.
    pub beta2: f64,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self {
            method: Method::Sgd,
            learning_rate: 0.01,
            l1_decay: 0.0,
            l2_decay: 0.0,
            batch_size: 1,
            momentum: 0.9,
            ro: 0.95,
            eps: 1e-8,
            beta1: 0.9,
            beta2: 0.999,
        }
    }
}

impl TrainerOptions {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }
    pub fn l1_decay(mut self, l1_decay: f64) -> Self {
        self.l1_decay = l1_decay;
        self
    }
    pub fn l2_decay(mut self, l2_decay: f64) -> Self {
        self.l2_decay = l2_decay;
        self
    }
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
    pub fn momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }
    pub fn ro(mut self, ro: f64) -> Self {
        self.ro = ro;
        self
    }
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }
    pub fn beta1(mut self, beta1: f64) -> Self {
        self.beta1 = beta1;
        self
    }
    pub fn beta2(mut self, beta2: f64) -> Self {
        self.beta2 = beta2;
        self
    }
}

/// The losses observed on one training step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrainingResult {
    /// Cost loss plus the decay losses charged on this step.
    pub loss: f64,
    /// The loss layer's loss for this example.
    pub cost_loss: f64,
    pub l1_decay_loss: f64,
    pub l2_decay_loss: f64,
}

/// Drives training of a [`Network`], one example at a time.
#[derive(Debug)]
pub struct Trainer {
    options: TrainerOptions,
    iter: usize,
    /// Last iteration's accumulators, per parameter.
    gsum: Vec<Vec<f64>>,
    /// Second accumulators, used by adam and adadelta.
    xsum: Vec<Vec<f64>>,
}

impl Trainer {
    pub fn new(mut options: TrainerOptions) -> Self {
        options.batch_size = options.batch_size.max(1);
        Self {
            options,
            iter: 0,
            gsum: Vec::new(),
            xsum: Vec::new(),
        }
    }
    /// Steps taken so far, counting every example seen.
    pub fn iterations(&self) -> usize {
        self.iter
    }
    /// Runs one example through the network, accumulates its gradients, and
    /// applies a parameter update on every `batch_size`-th call.
    ///
    /// Weight decay losses are only charged on the calls that apply an
    /// update; on the intermediate calls they are reported as zero.
    ///
    /// **Errors**
    ///
    /// Fails when `target` does not match the network's loss layer.
    pub fn train(&mut self, net: &mut Network, x: &Tensor, target: LossTarget) -> Result<TrainingResult> {
        net.forward(x, true);
        let cost_loss = net.backward(target)?;
        let mut l1_decay_loss = 0.0;
        let mut l2_decay_loss = 0.0;

        self.iter += 1;
        if self.iter % self.options.batch_size == 0 {
            let opts = &self.options;
            let mut pglist = net.params_and_grads();
            // momentum and the adaptive rules keep running state per
            // parameter, allocated lazily on the first update
            if self.gsum.is_empty() && (opts.method != Method::Sgd || opts.momentum > 0.0) {
                for pg in &pglist {
                    self.gsum.push(vec![0.0; pg.params.len()]);
                    if matches!(opts.method, Method::Adam | Method::Adadelta) {
                        self.xsum.push(vec![0.0; pg.params.len()]);
                    } else {
                        self.xsum.push(Vec::new());
                    }
                }
            }
            for (i, pg) in pglist.iter_mut().enumerate() {
                let l1_decay = opts.l1_decay * pg.l1_decay_mul;
                let l2_decay = opts.l2_decay * pg.l2_decay_mul;
                for j in 0..pg.params.len() {
                    let p = pg.params[j];
                    l2_decay_loss += l2_decay * p * p / 2.0;
                    l1_decay_loss += l1_decay * p.abs();
                    // subgradient of |p| at zero takes the negative branch
                    let l1_grad = l1_decay * if p > 0.0 { 1.0 } else { -1.0 };
                    let l2_grad = l2_decay * p;
                    // raw batch gradient
                    let gij = (l2_grad + l1_grad + pg.grads[j]) / opts.batch_size as f64;
                    match opts.method {
                        Method::Adam => {
                            let gsum = &mut self.gsum[i];
                            let xsum = &mut self.xsum[i];
                            gsum[j] = gsum[j] * opts.beta1 + (1.0 - opts.beta1) * gij;
                            xsum[j] = xsum[j] * opts.beta2 + (1.0 - opts.beta2) * gij * gij;
                            let bias_corr1 = gsum[j] * (1.0 - opts.beta1.powi(self.iter as i32));
                            let bias_corr2 = xsum[j] * (1.0 - opts.beta2.powi(self.iter as i32));
                            let dx = -opts.learning_rate * bias_corr1 / (bias_corr2.sqrt() + opts.eps);
                            pg.params[j] += dx;
                        }
                        Method::Adagrad => {
                            let gsum = &mut self.gsum[i];
                            gsum[j] += gij * gij;
                            let dx = -opts.learning_rate / (gsum[j] + opts.eps).sqrt() * gij;
                            pg.params[j] += dx;
                        }
                        Method::Windowgrad => {
                            // adagrad over a sliding window, so the history
                            // decays instead of growing without bound
                            let gsum = &mut self.gsum[i];
                            gsum[j] = opts.ro * gsum[j] + (1.0 - opts.ro) * gij * gij;
                            let dx = -opts.learning_rate / (gsum[j] + opts.eps).sqrt() * gij;
                            pg.params[j] += dx;
                        }
                        Method::Adadelta => {
                            let gsum = &mut self.gsum[i];
                            let xsum = &mut self.xsum[i];
                            gsum[j] = opts.ro * gsum[j] + (1.0 - opts.ro) * gij * gij;
                            let dx = -((xsum[j] + opts.eps) / (gsum[j] + opts.eps)).sqrt() * gij;
                            xsum[j] = opts.ro * xsum[j] + (1.0 - opts.ro) * dx * dx;
                            pg.params[j] += dx;
                        }
                        Method::Nesterov => {
                            let gsum = &mut self.gsum[i];
                            let mut dx = gsum[j];
                            gsum[j] = gsum[j] * opts.momentum + opts.learning_rate * gij;
                            dx = opts.momentum * dx - (1.0 + opts.momentum) * gsum[j];
                            pg.params[j] += dx;
                        }
                        Method::Sgd => {
                            if opts.momentum > 0.0 {
                                let gsum = &mut self.gsum[i];
                                let dx = opts.momentum * gsum[j] - opts.learning_rate * gij;
                                gsum[j] = dx;
                                pg.params[j] += dx;
                            } else {
                                pg.params[j] -= opts.learning_rate * gij;
                            }
                        }
                    }
                    pg.grads[j] = 0.0;
                }
            }
        }
        Ok(TrainingResult {
            loss: cost_loss + l1_decay_loss + l2_decay_loss,
            cost_loss,
            l1_decay_loss,
            l2_decay_loss,
        })
    }
}
