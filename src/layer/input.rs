use crate::layer::LayerDef;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// The entry layer of a network. Declares the shape of network inputs and
/// passes tensors through unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputLayer {
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
}

impl InputLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        Self {
            // spatial dimensions default to 1 for plain vector inputs
            out_sx: def.out_sx.max(1),
            out_sy: def.out_sy.max(1),
            out_depth: def.out_depth,
        }
    }
    pub(crate) fn out_sx(&self) -> usize {
        self.out_sx
    }
    pub(crate) fn out_sy(&self) -> usize {
        self.out_sy
    }
    pub(crate) fn out_depth(&self) -> usize {
        self.out_depth
    }
    /// Identity. The tensor moves on to the first real layer, which retains
    /// it; the gradients written there are the gradients at the input.
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        input
    }
}
