//! Loss layers. One of these must terminate a network; they seed the
//! backward gradient chain from a [`LossTarget`] and report a scalar loss.

use crate::layer::LayerDef;
use crate::tensor::Tensor;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// The supervision signal for one training example.
///
/// Each loss layer accepts exactly one variant; passing the wrong one is
/// rejected at the backward call boundary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LossTarget {
    /// Ground-truth class index, for [`SoftmaxLayer`] and [`SvmLayer`].
    Class(usize),
    /// A single regressed dimension and its target value, for
    /// [`RegressionLayer`].
    Dimension { dim: usize, value: f64 },
}

/// Softmax classifier over N discrete classes.
///
/// Exponentiates and normalizes its input into a probability distribution;
/// the per-example maximum is subtracted before exponentiating so large
/// scores cannot overflow. Loss is the negative log likelihood of the true
/// class.
#[derive(Debug, Serialize, Deserialize)]
pub struct SoftmaxLayer {
    out_depth: usize,
    #[serde(skip)]
    es: Vec<f64>,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl SoftmaxLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        Self {
            out_depth: def.in_sx * def.in_sy * def.in_depth,
            es: Vec::new(),
            in_act: None,
        }
    }
    pub(crate) fn out_depth(&self) -> usize {
        self.out_depth
    }
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    /// The class probabilities computed by the most recent forward pass.
    /// Empty before the first forward.
    pub fn probabilities(&self) -> &[f64] {
        &self.es
    }
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let mut out = Tensor::zeros(1, 1, self.out_depth);
        let amax = input.w().iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut es = vec![0.0; self.out_depth];
        let mut esum = 0.0;
        for (e, a) in es.iter_mut().zip(input.w()) {
            *e = (a - amax).exp();
            esum += *e;
        }
        for (o, e) in out.w_mut().iter_mut().zip(es.iter_mut()) {
            *e /= esum;
            *o = *e;
        }
        self.es = es; // saved for backprop
        self.in_act = Some(input);
        out
    }
    /// loss = -log(p(true class)); gradient at class i is `p_i - 1{i = y}`.
    pub(crate) fn backward_loss(&mut self, target: LossTarget) -> Result<f64> {
        let LossTarget::Class(y) = target else {
            bail!("softmax expects a class target");
        };
        let Some(x) = self.in_act.as_mut() else {
            bail!("softmax backward called before forward");
        };
        x.zero_grad();
        let dw = x.dw_mut();
        for (i, (g, &p)) in dw.iter_mut().zip(self.es.iter()).enumerate() {
            let indicator = if i == y { 1.0 } else { 0.0 };
            *g = p - indicator;
        }
        Ok(-self.es[y].ln())
    }
}

/// L2 regression cost layer. Forward is the identity on raw scores.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegressionLayer {
    num_inputs: usize,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl RegressionLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        Self {
            num_inputs: def.in_sx * def.in_sy * def.in_depth,
            in_act: None,
        }
    }
    pub(crate) fn out_depth(&self) -> usize {
        self.num_inputs
    }
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let out = input.clone();
        self.in_act = Some(input);
        out
    }
    /// loss = ½(x[dim] - value)²; only that dimension gets a gradient.
    pub(crate) fn backward_loss(&mut self, target: LossTarget) -> Result<f64> {
        let LossTarget::Dimension { dim, value } = target else {
            bail!("regression expects a dimension target");
        };
        let Some(x) = self.in_act.as_mut() else {
            bail!("regression backward called before forward");
        };
        x.zero_grad();
        let dy = x.w()[dim] - value;
        x.dw_mut()[dim] = dy;
        Ok(0.5 * dy * dy)
    }
}

/// Structured-margin (SVM) loss layer. Forward is the identity on raw
/// scores; the score of the true class should beat every other score by a
/// margin of 1.0.
#[derive(Debug, Serialize, Deserialize)]
pub struct SvmLayer {
    out_depth: usize,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl SvmLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        Self {
            out_depth: def.in_sx * def.in_sy * def.in_depth,
            in_act: None,
        }
    }
    pub(crate) fn out_depth(&self) -> usize {
        self.out_depth
    }
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let out = input.clone();
        self.in_act = Some(input);
        out
    }
    /// Every violating class pushes +1 gradient onto itself and -1 onto the
    /// true class, and adds its margin violation to the loss.
    pub(crate) fn backward_loss(&mut self, target: LossTarget) -> Result<f64> {
        let LossTarget::Class(y) = target else {
            bail!("svm expects a class target");
        };
        let Some(x) = self.in_act.as_mut() else {
            bail!("svm backward called before forward");
        };
        x.zero_grad();
        let yscore = x.w()[y];
        let margin = 1.0;
        let mut loss = 0.0;
        for i in 0..self.out_depth {
            if i == y {
                continue;
            }
            let ydiff = -yscore + x.w()[i] + margin;
            if ydiff > 0.0 {
                // violating dimension, apply loss
                x.dw_mut()[i] += 1.0;
                x.dw_mut()[y] -= 1.0;
                loss += ydiff;
            }
        }
        Ok(loss)
    }
}
