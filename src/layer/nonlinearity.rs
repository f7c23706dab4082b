//! Elementwise nonlinearities. Each computes its output on a fresh tensor
//! and derives backward gradients from the output values alone (plus, for
//! maxout, the cached switch indices).

use crate::layer::LayerDef;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// ReLU: `x -> max(0, x)`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReluLayer {
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl ReluLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        Self {
            out_sx: def.in_sx,
            out_sy: def.in_sy,
            out_depth: def.in_depth,
            in_act: None,
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
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let mut out = input.clone();
        for w in out.w_mut() {
            if *w < 0.0 {
                *w = 0.0;
            }
        }
        self.in_act = Some(input);
        out
    }
    pub(crate) fn backward(&mut self, output: &Tensor) {
        let Some(v) = self.in_act.as_mut() else {
            return;
        };
        v.zero_grad();
        let dw = v.dw_mut();
        for i in 0..dw.len() {
            if output.w()[i] > 0.0 {
                dw[i] = output.dw()[i];
            }
        }
    }
}

/// Sigmoid: `x -> 1 / (1 + e^-x)`, output in (0, 1).
#[derive(Debug, Serialize, Deserialize)]
pub struct SigmoidLayer {
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl SigmoidLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        Self {
            out_sx: def.in_sx,
            out_sy: def.in_sy,
            out_depth: def.in_depth,
            in_act: None,
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
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let mut out = input.zeros_like();
        for (o, v) in out.w_mut().iter_mut().zip(input.w()) {
            *o = 1.0 / (1.0 + (-v).exp());
        }
        self.in_act = Some(input);
        out
    }
    /// dy/dx = y(1 - y), from the output values.
    pub(crate) fn backward(&mut self, output: &Tensor) {
        let Some(v) = self.in_act.as_mut() else {
            return;
        };
        v.zero_grad();
        let dw = v.dw_mut();
        for i in 0..dw.len() {
            let y = output.w()[i];
            dw[i] = y * (1.0 - y) * output.dw()[i];
        }
    }
}

/// Tanh: `x -> tanh(x)`, output in (-1, 1).
#[derive(Debug, Serialize, Deserialize)]
pub struct TanhLayer {
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl TanhLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        Self {
            out_sx: def.in_sx,
            out_sy: def.in_sy,
            out_depth: def.in_depth,
            in_act: None,
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
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let mut out = input.zeros_like();
        for (o, v) in out.w_mut().iter_mut().zip(input.w()) {
            *o = v.tanh();
        }
        self.in_act = Some(input);
        out
    }
    /// dy/dx = 1 - y², from the output values.
    pub(crate) fn backward(&mut self, output: &Tensor) {
        let Some(v) = self.in_act.as_mut() else {
            return;
        };
        v.zero_grad();
        let dw = v.dw_mut();
        for i in 0..dw.len() {
            let y = output.w()[i];
            dw[i] = (1.0 - y * y) * output.dw()[i];
        }
    }
}

/// Maxout: partitions the input depth into consecutive groups of
/// `group_size` and forwards the maximum of each group.
///
/// The winning member of every group is recorded so the backward pass routes
/// the gradient to it alone. The input depth should divide evenly by the
/// group size.
#[derive(Debug, Serialize, Deserialize)]
pub struct MaxoutLayer {
    group_size: usize,
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
    #[serde(skip)]
    switches: Vec<usize>,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl MaxoutLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        let group_size = def.group_size.unwrap_or(2);
        let mut layer = Self {
            group_size,
            out_sx: def.in_sx,
            out_sy: def.in_sy,
            out_depth: def.in_depth / group_size,
            switches: Vec::new(),
            in_act: None,
        };
        layer.rebuild_transient();
        layer
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
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    pub(crate) fn rebuild_transient(&mut self) {
        self.switches = vec![0; self.out_sx * self.out_sy * self.out_depth];
    }
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let v = &input;
        let mut out = Tensor::zeros(self.out_sx, self.out_sy, self.out_depth);
        if self.out_sx == 1 && self.out_sy == 1 {
            // 1-D fast path: no spatial coordinates to track
            for i in 0..self.out_depth {
                let ix = i * self.group_size;
                let mut a = v.w()[ix];
                let mut ai = 0;
                for j in 1..self.group_size {
                    let a2 = v.w()[ix + j];
                    if a2 > a {
                        a = a2;
                        ai = j;
                    }
                }
                out.w_mut()[i] = a;
                self.switches[i] = ix + ai;
            }
        } else {
            let mut n = 0; // switch counter
            for x in 0..v.sx() {
                for y in 0..v.sy() {
                    for i in 0..self.out_depth {
                        let ix = i * self.group_size;
                        let mut a = v.get(x, y, ix);
                        let mut ai = 0;
                        for j in 1..self.group_size {
                            let a2 = v.get(x, y, ix + j);
                            if a2 > a {
                                a = a2;
                                ai = j;
                            }
                        }
                        out.set(x, y, i, a);
                        self.switches[n] = ix + ai;
                        n += 1;
                    }
                }
            }
        }
        self.in_act = Some(input);
        out
    }
    pub(crate) fn backward(&mut self, output: &Tensor) {
        let Some(v) = self.in_act.as_mut() else {
            return;
        };
        v.zero_grad();
        if self.out_sx == 1 && self.out_sy == 1 {
            for i in 0..self.out_depth {
                let chain = output.dw()[i];
                v.dw_mut()[self.switches[i]] = chain;
            }
        } else {
            let mut n = 0;
            for x in 0..output.sx() {
                for y in 0..output.sy() {
                    for i in 0..self.out_depth {
                        let chain = output.get_grad(x, y, i);
                        v.set_grad(x, y, self.switches[n], chain);
                        n += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;
    use approx::assert_relative_eq;

    fn def(kind: LayerKind, in_depth: usize) -> LayerDef {
        let mut def = LayerDef::new(kind);
        def.in_sx = 1;
        def.in_sy = 1;
        def.in_depth = in_depth;
        def
    }

    #[test]
    fn relu_blocks_gradient_where_output_is_zero() {
        let mut layer = ReluLayer::from_def(&def(LayerKind::Relu, 3));
        let mut out = layer.forward(Tensor::from_vec(vec![-1.0, 0.5, 2.0]));
        assert_eq!(out.w(), &[0.0, 0.5, 2.0]);
        for g in out.dw_mut() {
            *g = 1.0;
        }
        layer.backward(&out);
        assert_eq!(layer.in_act().unwrap().dw(), &[0.0, 1.0, 1.0]);
    }

    #[test]
    fn tanh_gradient_is_one_minus_output_squared() {
        let mut layer = TanhLayer::from_def(&def(LayerKind::Tanh, 2));
        let mut out = layer.forward(Tensor::from_vec(vec![0.3, -1.1]));
        for g in out.dw_mut() {
            *g = 1.0;
        }
        layer.backward(&out);
        let v = layer.in_act().unwrap();
        for i in 0..2 {
            let y = out.w()[i];
            assert_relative_eq!(v.dw()[i], 1.0 - y * y, epsilon = 1e-12);
        }
    }

    #[test]
    fn sigmoid_output_stays_in_unit_interval() {
        let mut layer = SigmoidLayer::from_def(&def(LayerKind::Sigmoid, 3));
        let out = layer.forward(Tensor::from_vec(vec![-50.0, 0.0, 50.0]));
        assert!(out.w().iter().all(|&y| (0.0..=1.0).contains(&y)));
        assert_relative_eq!(out.w()[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn maxout_routes_gradient_to_the_winning_member() {
        let mut layer = MaxoutLayer::from_def(&def(LayerKind::Maxout, 4).group_size(2));
        let mut out = layer.forward(Tensor::from_vec(vec![0.1, 0.9, -2.0, -3.0]));
        assert_eq!(out.w(), &[0.9, -2.0]);
        out.dw_mut()[0] = 5.0;
        out.dw_mut()[1] = 7.0;
        layer.backward(&out);
        assert_eq!(layer.in_act().unwrap().dw(), &[0.0, 5.0, 7.0, 0.0]);
    }
}
