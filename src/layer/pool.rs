use crate::layer::LayerDef;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Max-pooling layer.
///
/// Each output cell takes the maximum over its receptive field within one
/// channel. The winning (x, y) coordinate is recorded per output cell during
/// the forward pass; the backward pass routes the entire output gradient to
/// exactly that coordinate.
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolLayer {
    sx: usize,
    sy: usize,
    in_sx: usize,
    in_sy: usize,
    in_depth: usize,
    out_sx: usize,
    out_sy: usize,
    stride: usize,
    pad: usize,
    #[serde(skip)]
    switches: Vec<(usize, usize)>,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl PoolLayer {
    pub(crate) fn from_def(def: &LayerDef) -> Self {
        let sx = def.sx;
        let sy = def.sy.unwrap_or(sx);
        let stride = def.stride.unwrap_or(2);
        let pad = def.pad;
        let out_sx = (def.in_sx + 2 * pad - sx) / stride + 1;
        let out_sy = (def.in_sy + 2 * pad - sy) / stride + 1;
        let mut layer = Self {
            sx,
            sy,
            in_sx: def.in_sx,
            in_sy: def.in_sy,
            in_depth: def.in_depth,
            out_sx,
            out_sy,
            stride,
            pad,
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
        self.in_depth
    }
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    /// Sizes the switch table. Must run at construction and after
    /// deserialization, before any backward pass.
    pub(crate) fn rebuild_transient(&mut self) {
        self.switches = vec![(0, 0); self.out_sx * self.out_sy * self.in_depth];
    }
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let v = &input;
        let mut out = Tensor::zeros(self.out_sx, self.out_sy, self.in_depth);
        let mut n = 0; // switch counter
        for d in 0..self.in_depth {
            let mut x = -(self.pad as isize);
            for ax in 0..self.out_sx {
                let mut y = -(self.pad as isize);
                for ay in 0..self.out_sy {
                    // ties go to the first maximum in scan order
                    let mut best = f64::NEG_INFINITY;
                    let mut win = (0, 0);
                    for fx in 0..self.sx {
                        for fy in 0..self.sy {
                            let ox = x + fx as isize;
                            let oy = y + fy as isize;
                            if oy >= 0
                                && oy < v.sy() as isize
                                && ox >= 0
                                && ox < v.sx() as isize
                            {
                                let value = v.get(ox as usize, oy as usize, d);
                                if value > best {
                                    best = value;
                                    win = (ox as usize, oy as usize);
                                }
                            }
                        }
                    }
                    self.switches[n] = win;
                    n += 1;
                    out.set(ax, ay, d, best);
                    y += self.stride as isize;
                }
                x += self.stride as isize;
            }
        }
        self.in_act = Some(input);
        out
    }
    /// No parameters; the whole output gradient goes to the recorded winner
    /// and nowhere else.
    pub(crate) fn backward(&mut self, output: &Tensor) {
        let Some(v) = self.in_act.as_mut() else {
            return;
        };
        v.zero_grad();
        let mut n = 0;
        for d in 0..self.in_depth {
            for ax in 0..self.out_sx {
                for ay in 0..self.out_sy {
                    let chain = output.get_grad(ax, ay, d);
                    let (wx, wy) = self.switches[n];
                    v.add_grad(wx, wy, d, chain);
                    n += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_def(in_sx: usize, in_sy: usize, in_depth: usize, sx: usize, stride: usize) -> LayerDef {
        let mut def = LayerDef::pool(sx).stride(stride);
        def.in_sx = in_sx;
        def.in_sy = in_sy;
        def.in_depth = in_depth;
        def
    }

    #[test]
    fn output_size_floors_when_stride_does_not_divide() {
        // (6 - 2) / 4 + 1 = 2; the final partial application is trimmed
        let layer = PoolLayer::from_def(&pool_def(6, 6, 1, 2, 4));
        assert_eq!((layer.out_sx(), layer.out_sy()), (2, 2));
    }

    #[test]
    fn backward_routes_gradient_to_the_winner_only() {
        let mut layer = PoolLayer::from_def(&pool_def(4, 4, 1, 2, 2));
        let mut input = Tensor::zeros(4, 4, 1);
        input.set(1, 0, 0, 3.0);
        input.set(2, 3, 0, 5.0);
        let mut out = layer.forward(input);
        assert_eq!(out.get(0, 0, 0), 3.0);
        assert_eq!(out.get(1, 1, 0), 5.0);
        out.set_grad(0, 0, 0, 1.5);
        out.set_grad(1, 1, 0, -2.0);
        layer.backward(&out);
        let v = layer.in_act().unwrap();
        assert_eq!(v.get_grad(1, 0, 0), 1.5);
        assert_eq!(v.get_grad(2, 3, 0), -2.0);
        let mass: f64 = v.dw().iter().map(|g| g.abs()).sum();
        assert_eq!(mass, 3.5);
    }
}
