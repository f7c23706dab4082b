//! Layer definitions and the closed set of layer implementations.
//!
//! A network is a linear chain of layers. Every layer satisfies the same
//! contract: [`forward`](Layer::forward) consumes the input tensor, retains
//! it for the backward pass, and returns a newly allocated output tensor;
//! [`backward`](Layer::backward) reads the gradients of its output (lent
//! back by the network from the downstream layer) and fully overwrites the
//! gradients of its retained input, accumulating into its own parameter
//! gradients along the way. Loss layers additionally implement
//! [`backward_loss`](Layer::backward_loss), which seeds the gradient chain
//! from a [`LossTarget`] and returns a scalar loss.

use crate::tensor::Tensor;
use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod dot;
pub mod dropout;
pub mod input;
pub mod loss;
pub mod nonlinearity;
pub mod norm;
pub mod pool;

pub use dot::{ConvLayer, FullyConnLayer};
pub use dropout::DropoutLayer;
pub use input::InputLayer;
pub use loss::{LossTarget, RegressionLayer, SoftmaxLayer, SvmLayer};
pub use nonlinearity::{MaxoutLayer, ReluLayer, SigmoidLayer, TanhLayer};
pub use norm::LrnLayer;
pub use pool::PoolLayer;

/// Discriminator for the layer kinds a [`LayerDef`] can describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Input,
    Relu,
    Sigmoid,
    Tanh,
    Dropout,
    Conv,
    Pool,
    Lrn,
    Softmax,
    Regression,
    Fc,
    Maxout,
    Svm,
}

/// Activation shorthand on a fully-connected or convolutional definition.
///
/// Desugars into a dedicated nonlinearity layer following the layer that
/// declares it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Maxout,
}

/// A declarative description of one layer.
///
/// Only consumed at construction time. Optional hyperparameters are `None`
/// when unset and default per layer kind (e.g. pool stride 2, conv stride 1,
/// drop probability 0.5). The `in_*` fields are filled in by the network
/// during shape propagation and need not be set by hand except on the input
/// definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerDef {
    pub kind: LayerKind,
    pub num_neurons: usize,
    pub num_classes: usize,
    pub bias_pref: Option<f64>,
    pub activation: Option<Activation>,
    pub group_size: Option<usize>,
    pub drop_prob: Option<f64>,
    pub in_sx: usize,
    pub in_sy: usize,
    pub in_depth: usize,
    pub out_sx: usize,
    pub out_sy: usize,
    pub out_depth: usize,
    pub l1_decay_mul: Option<f64>,
    pub l2_decay_mul: Option<f64>,
    /// Filter size in x (and in y unless `sy` is set).
    pub sx: usize,
    pub sy: Option<usize>,
    pub pad: usize,
    pub stride: Option<usize>,
    /// Number of convolution filters.
    pub filters: usize,
    /// Local response normalization constants.
    pub k: f64,
    pub n: usize,
    pub alpha: f64,
    pub beta: f64,
}

impl LayerDef {
    /// Creates an empty definition of the given kind.
    pub fn new(kind: LayerKind) -> Self {
        Self {
            kind,
            num_neurons: 0,
            num_classes: 0,
            bias_pref: None,
            activation: None,
            group_size: None,
            drop_prob: None,
            in_sx: 0,
            in_sy: 0,
            in_depth: 0,
            out_sx: 0,
            out_sy: 0,
            out_depth: 0,
            l1_decay_mul: None,
            l2_decay_mul: None,
            sx: 0,
            sy: None,
            pad: 0,
            stride: None,
            filters: 0,
            k: 0.0,
            n: 0,
            alpha: 0.0,
            beta: 0.0,
        }
    }
    /// An input definition declaring the size of network inputs.
    pub fn input(out_sx: usize, out_sy: usize, out_depth: usize) -> Self {
        Self {
            out_sx,
            out_sy,
            out_depth,
            ..Self::new(LayerKind::Input)
        }
    }
    /// A fully-connected definition with `num_neurons` outputs.
    pub fn fc(num_neurons: usize) -> Self {
        Self {
            num_neurons,
            ..Self::new(LayerKind::Fc)
        }
    }
    /// A convolutional definition with `filters` kernels of size `sx`.
    pub fn conv(sx: usize, filters: usize) -> Self {
        Self {
            sx,
            filters,
            ..Self::new(LayerKind::Conv)
        }
    }
    /// A max-pooling definition with receptive field size `sx`.
    pub fn pool(sx: usize) -> Self {
        Self {
            sx,
            ..Self::new(LayerKind::Pool)
        }
    }
    /// A local response normalization definition over `n` adjacent channels.
    pub fn lrn(k: f64, n: usize, alpha: f64, beta: f64) -> Self {
        Self {
            k,
            n,
            alpha,
            beta,
            ..Self::new(LayerKind::Lrn)
        }
    }
    /// A dropout definition with the given drop probability.
    pub fn dropout(drop_prob: f64) -> Self {
        Self {
            drop_prob: Some(drop_prob),
            ..Self::new(LayerKind::Dropout)
        }
    }
    /// A softmax classification definition over `num_classes` classes.
    pub fn softmax(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Self::new(LayerKind::Softmax)
        }
    }
    /// An L2 regression definition over `num_neurons` outputs.
    pub fn regression(num_neurons: usize) -> Self {
        Self {
            num_neurons,
            ..Self::new(LayerKind::Regression)
        }
    }
    /// A structured-margin (SVM) definition over `num_classes` classes.
    pub fn svm(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Self::new(LayerKind::Svm)
        }
    }
    /// Adds an activation to follow this layer.
    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = Some(activation);
        self
    }
    /// Adds a dropout layer with probability `drop_prob` to follow this
    /// layer.
    pub fn drop_prob(mut self, drop_prob: f64) -> Self {
        self.drop_prob = Some(drop_prob);
        self
    }
    /// Sets the stride.
    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }
    /// Sets the zero padding added around the input borders.
    pub fn pad(mut self, pad: usize) -> Self {
        self.pad = pad;
        self
    }
    /// Sets the filter size in y, when it differs from `sx`.
    pub fn sy(mut self, sy: usize) -> Self {
        self.sy = Some(sy);
        self
    }
    /// Sets the starting bias for this layer's bias parameters.
    pub fn bias_pref(mut self, bias_pref: f64) -> Self {
        self.bias_pref = Some(bias_pref);
        self
    }
    /// Sets the maxout group size.
    pub fn group_size(mut self, group_size: usize) -> Self {
        self.group_size = Some(group_size);
        self
    }
    /// Sets the L1 weight decay multiplier for this layer's parameters.
    pub fn l1_decay_mul(mut self, l1_decay_mul: f64) -> Self {
        self.l1_decay_mul = Some(l1_decay_mul);
        self
    }
    /// Sets the L2 weight decay multiplier for this layer's parameters.
    pub fn l2_decay_mul(mut self, l2_decay_mul: f64) -> Self {
        self.l2_decay_mul = Some(l2_decay_mul);
        self
    }
}

/// One learnable parameter group: a parameter buffer, its gradient buffer,
/// and the weight decay multipliers that apply to it.
///
/// Biases use zero decay multipliers so regularization never pulls them
/// toward zero.
#[derive(Debug)]
pub struct ParamsAndGrads<'a> {
    pub params: &'a mut [f64],
    pub grads: &'a mut [f64],
    pub l1_decay_mul: f64,
    pub l2_decay_mul: f64,
}

/// A layer of a network.
///
/// The set of layer kinds is closed: construction from a [`LayerDef`] is one
/// exhaustive dispatch ([`Layer::from_def`]) and deserialization is a second
/// exhaustive dispatch on the serialized `layer_type` tag. Both live here so
/// a new kind cannot silently miss one.
///
/// # serde
/// Serializes to a record internally tagged with `layer_type` holding the
/// layer's shape, hyperparameters, and parameter tensors. Transient state
/// (retained activations, pooling and maxout switch tables, dropout
/// decisions) is not persisted and is rebuilt on deserialization.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "layer_type", rename_all = "lowercase")]
pub enum Layer {
    Input(InputLayer),
    Relu(ReluLayer),
    Sigmoid(SigmoidLayer),
    Tanh(TanhLayer),
    Dropout(DropoutLayer),
    Conv(ConvLayer),
    Pool(PoolLayer),
    Lrn(LrnLayer),
    Softmax(SoftmaxLayer),
    Regression(RegressionLayer),
    Fc(FullyConnLayer),
    Maxout(MaxoutLayer),
    Svm(SvmLayer),
}

impl Layer {
    /// Builds a layer from its definition.
    ///
    /// The definition's `in_*` fields must already be filled in (the network
    /// propagates them from the previous layer's output shape).
    ///
    /// **Errors**
    ///
    /// Returns an error for invalid hyperparameters, such as an even local
    /// response normalization window.
    pub fn from_def<R: Rng>(def: &LayerDef, rng: &mut R) -> Result<Self> {
        Ok(match def.kind {
            LayerKind::Input => Self::Input(InputLayer::from_def(def)),
            LayerKind::Relu => Self::Relu(ReluLayer::from_def(def)),
            LayerKind::Sigmoid => Self::Sigmoid(SigmoidLayer::from_def(def)),
            LayerKind::Tanh => Self::Tanh(TanhLayer::from_def(def)),
            LayerKind::Dropout => Self::Dropout(DropoutLayer::from_def(def, rng)),
            LayerKind::Conv => Self::Conv(ConvLayer::from_def(def, rng)),
            LayerKind::Pool => Self::Pool(PoolLayer::from_def(def)),
            LayerKind::Lrn => Self::Lrn(LrnLayer::from_def(def)?),
            LayerKind::Softmax => Self::Softmax(SoftmaxLayer::from_def(def)),
            LayerKind::Regression => Self::Regression(RegressionLayer::from_def(def)),
            LayerKind::Fc => Self::Fc(FullyConnLayer::from_def(def, rng)),
            LayerKind::Maxout => Self::Maxout(MaxoutLayer::from_def(def)),
            LayerKind::Svm => Self::Svm(SvmLayer::from_def(def)),
        })
    }
    /// Output width.
    pub fn out_sx(&self) -> usize {
        match self {
            Self::Input(l) => l.out_sx(),
            Self::Relu(l) => l.out_sx(),
            Self::Sigmoid(l) => l.out_sx(),
            Self::Tanh(l) => l.out_sx(),
            Self::Dropout(l) => l.out_sx(),
            Self::Conv(l) => l.out_sx(),
            Self::Pool(l) => l.out_sx(),
            Self::Lrn(l) => l.out_sx(),
            Self::Softmax(_) | Self::Regression(_) | Self::Svm(_) | Self::Fc(_) => 1,
            Self::Maxout(l) => l.out_sx(),
        }
    }
    /// Output height.
    pub fn out_sy(&self) -> usize {
        match self {
            Self::Input(l) => l.out_sy(),
            Self::Relu(l) => l.out_sy(),
            Self::Sigmoid(l) => l.out_sy(),
            Self::Tanh(l) => l.out_sy(),
            Self::Dropout(l) => l.out_sy(),
            Self::Conv(l) => l.out_sy(),
            Self::Pool(l) => l.out_sy(),
            Self::Lrn(l) => l.out_sy(),
            Self::Softmax(_) | Self::Regression(_) | Self::Svm(_) | Self::Fc(_) => 1,
            Self::Maxout(l) => l.out_sy(),
        }
    }
    /// Output depth.
    pub fn out_depth(&self) -> usize {
        match self {
            Self::Input(l) => l.out_depth(),
            Self::Relu(l) => l.out_depth(),
            Self::Sigmoid(l) => l.out_depth(),
            Self::Tanh(l) => l.out_depth(),
            Self::Dropout(l) => l.out_depth(),
            Self::Conv(l) => l.out_depth(),
            Self::Pool(l) => l.out_depth(),
            Self::Lrn(l) => l.out_depth(),
            Self::Softmax(l) => l.out_depth(),
            Self::Regression(l) => l.out_depth(),
            Self::Fc(l) => l.out_depth(),
            Self::Maxout(l) => l.out_depth(),
            Self::Svm(l) => l.out_depth(),
        }
    }
    /// Computes the forward pass, consuming the input tensor.
    ///
    /// The layer retains the input for its backward pass. Only dropout
    /// changes behavior with `is_training`.
    pub fn forward(&mut self, input: Tensor, is_training: bool) -> Tensor {
        match self {
            Self::Input(l) => l.forward(input),
            Self::Relu(l) => l.forward(input),
            Self::Sigmoid(l) => l.forward(input),
            Self::Tanh(l) => l.forward(input),
            Self::Dropout(l) => l.forward(input, is_training),
            Self::Conv(l) => l.forward(input),
            Self::Pool(l) => l.forward(input),
            Self::Lrn(l) => l.forward(input),
            Self::Softmax(l) => l.forward(input),
            Self::Regression(l) => l.forward(input),
            Self::Fc(l) => l.forward(input),
            Self::Maxout(l) => l.forward(input),
            Self::Svm(l) => l.forward(input),
        }
    }
    /// Computes the backward pass from the gradients of `output`, the tensor
    /// this layer produced on the most recent forward pass.
    ///
    /// Overwrites the retained input tensor's gradients and accumulates into
    /// parameter gradients. A no-op for input and loss layers.
    pub fn backward(&mut self, output: &Tensor) {
        match self {
            Self::Input(_) | Self::Softmax(_) | Self::Regression(_) | Self::Svm(_) => {}
            Self::Relu(l) => l.backward(output),
            Self::Sigmoid(l) => l.backward(output),
            Self::Tanh(l) => l.backward(output),
            Self::Dropout(l) => l.backward(output),
            Self::Conv(l) => l.backward(output),
            Self::Pool(l) => l.backward(output),
            Self::Lrn(l) => l.backward(output),
            Self::Fc(l) => l.backward(output),
            Self::Maxout(l) => l.backward(output),
        }
    }
    /// Computes the loss for `target` and seeds the gradient chain.
    ///
    /// **Errors**
    ///
    /// Returns an error if this layer is not a loss layer, if the target
    /// kind does not match the loss kind, or if no forward pass preceded
    /// this call.
    pub fn backward_loss(&mut self, target: LossTarget) -> Result<f64> {
        match self {
            Self::Softmax(l) => l.backward_loss(target),
            Self::Regression(l) => l.backward_loss(target),
            Self::Svm(l) => l.backward_loss(target),
            _ => bail!("layer has no loss; only softmax, regression, and svm layers compute one"),
        }
    }
    /// Whether this layer can terminate a network.
    pub fn is_loss(&self) -> bool {
        matches!(self, Self::Softmax(_) | Self::Regression(_) | Self::Svm(_))
    }
    /// Enumerates the learnable parameter groups of this layer.
    pub fn params_and_grads(&mut self) -> Vec<ParamsAndGrads<'_>> {
        match self {
            Self::Conv(l) => l.params_and_grads(),
            Self::Fc(l) => l.params_and_grads(),
            _ => Vec::new(),
        }
    }
    /// The input tensor retained by the most recent forward pass.
    ///
    /// Its gradient buffer is this layer's contribution to the backward
    /// chain; the network lends it to the upstream layer as that layer's
    /// output.
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        match self {
            Self::Input(_) => None,
            Self::Relu(l) => l.in_act(),
            Self::Sigmoid(l) => l.in_act(),
            Self::Tanh(l) => l.in_act(),
            Self::Dropout(l) => l.in_act(),
            Self::Conv(l) => l.in_act(),
            Self::Pool(l) => l.in_act(),
            Self::Lrn(l) => l.in_act(),
            Self::Softmax(l) => l.in_act(),
            Self::Regression(l) => l.in_act(),
            Self::Fc(l) => l.in_act(),
            Self::Maxout(l) => l.in_act(),
            Self::Svm(l) => l.in_act(),
        }
    }
    /// Rebuilds transient derived state after deserialization.
    ///
    /// Pooling and maxout switch tables are sized here so a backward pass is
    /// valid as soon as a forward pass has run.
    pub(crate) fn rebuild_transient(&mut self) {
        match self {
            Self::Pool(l) => l.rebuild_transient(),
            Self::Maxout(l) => l.rebuild_transient(),
            Self::Dropout(l) => l.rebuild_transient(),
            _ => {}
        }
    }
}
