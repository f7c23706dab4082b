//! A network manages a linear chain of layers: the first is an input layer,
//! the last a loss layer.

use crate::layer::{Activation, Layer, LayerDef, LayerKind, LossTarget, ParamsAndGrads};
use crate::tensor::Tensor;
use anyhow::{bail, Result};
use rand::Rng;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// Expands shorthand in a definition chain.
///
/// Softmax/SVM definitions get a preceding fully-connected layer projecting
/// to their class count, regression likewise to its neuron count; an
/// `activation` field becomes a following nonlinearity layer; a drop
/// probability on a non-dropout definition becomes a following dropout
/// layer. ReLU-activated layers without an explicit starting bias get a
/// small positive one so units receive gradients early instead of starting
/// dead.
fn desugar(defs: &[LayerDef]) -> Vec<LayerDef> {
    let mut new_defs = Vec::with_capacity(defs.len() * 2);
    for def in defs {
        let mut def = def.clone();
        match def.kind {
            LayerKind::Softmax | LayerKind::Svm => {
                new_defs.push(LayerDef::fc(def.num_classes));
            }
            LayerKind::Regression => {
                new_defs.push(LayerDef::fc(def.num_neurons));
            }
            _ => {}
        }
        if matches!(def.kind, LayerKind::Fc | LayerKind::Conv)
            && def.bias_pref.is_none()
            && def.activation == Some(Activation::Relu)
        {
            def.bias_pref = Some(0.1);
        }
        new_defs.push(def.clone());
        if let Some(activation) = def.activation {
            new_defs.push(match activation {
                Activation::Relu => LayerDef::new(LayerKind::Relu),
                Activation::Sigmoid => LayerDef::new(LayerKind::Sigmoid),
                Activation::Tanh => LayerDef::new(LayerKind::Tanh),
                Activation::Maxout => {
                    LayerDef::new(LayerKind::Maxout).group_size(def.group_size.unwrap_or(2))
                }
            });
        }
        if let Some(drop_prob) = def.drop_prob {
            if def.kind != LayerKind::Dropout {
                new_defs.push(LayerDef::dropout(drop_prob));
            }
        }
    }
    new_defs
}

/// An ordered chain of layers driven forward and backward as a unit.
///
/// # serde
/// Serializes as its layer records. Deserialization rebuilds the transient
/// derived state (switch tables, gradient buffers) the records do not carry.
#[derive(Debug, Serialize)]
pub struct Network {
    layers: Vec<Layer>,
}

impl Network {
    /// Builds the network from a definition chain.
    ///
    /// Definitions are desugared, then shapes propagate forward: each layer
    /// after the first derives its input shape from the previous layer's
    /// output shape.
    ///
    /// **Errors**
    ///
    /// The chain must hold at least an input definition followed by one
    /// more, must start with [`LayerKind::Input`], must end in a loss layer
    /// after desugaring, and every definition must construct (see
    /// [`Layer::from_def`]).
    pub fn new<R: Rng>(defs: &[LayerDef], rng: &mut R) -> Result<Self> {
        if defs.len() < 2 {
            bail!("at least one input layer and one loss layer are required");
        }
        if defs[0].kind != LayerKind::Input {
            bail!("the first layer must be the input layer, to declare the size of inputs");
        }
        let defs = desugar(defs);
        let mut layers: Vec<Layer> = Vec::with_capacity(defs.len());
        for mut def in defs {
            if let Some(prev) = layers.last() {
                def.in_sx = prev.out_sx();
                def.in_sy = prev.out_sy();
                def.in_depth = prev.out_depth();
            }
            layers.push(Layer::from_def(&def, rng)?);
        }
        match layers.last() {
            Some(last) if last.is_loss() => {}
            _ => bail!("the last layer must be a loss layer (softmax, regression, or svm)"),
        }
        Ok(Self { layers })
    }
    /// The layer chain.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
    /// Forward-propagates `input` through every layer and returns the final
    /// output tensor.
    ///
    /// The trainer passes `is_training = true`; callers doing inference
    /// should pass `false` so dropout scales deterministically.
    pub fn forward(&mut self, input: &Tensor, is_training: bool) -> Tensor {
        let mut act = input.clone();
        for layer in &mut self.layers {
            act = layer.forward(act, is_training);
        }
        act
    }
    /// Backpropagates from the loss layer, computing gradients with respect
    /// to every parameter and to the input. Returns the cost loss.
    ///
    /// **Errors**
    ///
    /// Fails if the target does not match the loss layer or if no forward
    /// pass has run yet.
    pub fn backward(&mut self, target: LossTarget) -> Result<f64> {
        let Some(last) = self.layers.last_mut() else {
            bail!("network has no layers");
        };
        let loss = last.backward_loss(target)?;
        for i in (0..self.layers.len() - 1).rev() {
            let (head, tail) = self.layers.split_at_mut(i + 1);
            match tail[0].in_act() {
                Some(output) => head[i].backward(output),
                None => bail!("backward called before forward"),
            }
        }
        Ok(loss)
    }
    /// Forward-propagates in prediction mode and returns the cost loss for
    /// `target` without accumulating parameter gradients upstream.
    pub fn cost_loss(&mut self, input: &Tensor, target: LossTarget) -> Result<f64> {
        self.forward(input, false);
        let Some(last) = self.layers.last_mut() else {
            bail!("network has no layers");
        };
        last.backward_loss(target)
    }
    /// Flattens every layer's learnable parameter groups into one ordered
    /// list for the optimizer.
    pub fn params_and_grads(&mut self) -> Vec<ParamsAndGrads<'_>> {
        self.layers
            .iter_mut()
            .flat_map(Layer::params_and_grads)
            .collect()
    }
    /// The index of the class with the highest probability in the most
    /// recent forward pass.
    ///
    /// **Errors**
    ///
    /// Only valid when the last layer is a softmax classifier that has run
    /// forward at least once.
    pub fn prediction(&self) -> Result<usize> {
        let Some(Layer::Softmax(softmax)) = self.layers.last() else {
            bail!("prediction assumes a softmax layer at the end of the network");
        };
        let probabilities = softmax.probabilities();
        if probabilities.is_empty() {
            bail!("prediction called before forward");
        }
        let mut max_i = 0;
        let mut max_p = probabilities[0];
        for (i, &p) in probabilities.iter().enumerate().skip(1) {
            if p > max_p {
                max_p = p;
                max_i = i;
            }
        }
        Ok(max_i)
    }
    /// The gradient of the loss with respect to the most recent input,
    /// valid after a backward pass.
    pub fn input_gradient(&self) -> Option<&[f64]> {
        self.layers.get(1).and_then(Layer::in_act).map(Tensor::dw)
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Repr {
            layers: Vec<Layer>,
        }
        let Repr { mut layers } = Repr::deserialize(deserializer)?;
        for layer in &mut layers {
            layer.rebuild_transient();
        }
        Ok(Self { layers })
    }
}
