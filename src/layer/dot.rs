//! Layers that take dot products with their input: fully-connected layers
//! and convolutions (spatial weight sharing). They are close cousins and
//! share the filter-plus-bias parameter scheme.

use crate::layer::{LayerDef, ParamsAndGrads};
use crate::tensor::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fully-connected layer: one filter per output unit, each filter as long as
/// the flattened input.
#[derive(Debug, Serialize, Deserialize)]
pub struct FullyConnLayer {
    out_depth: usize,
    num_inputs: usize,
    l1_decay_mul: f64,
    l2_decay_mul: f64,
    filters: Vec<Tensor>,
    biases: Tensor,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl FullyConnLayer {
    pub(crate) fn from_def<R: Rng>(def: &LayerDef, rng: &mut R) -> Self {
        let out_depth = def.num_neurons;
        let num_inputs = def.in_sx * def.in_sy * def.in_depth;
        let bias = def.bias_pref.unwrap_or(0.0);
        Self {
            out_depth,
            num_inputs,
            l1_decay_mul: def.l1_decay_mul.unwrap_or(0.0),
            l2_decay_mul: def.l2_decay_mul.unwrap_or(1.0),
            filters: (0..out_depth)
                .map(|_| Tensor::randn(1, 1, num_inputs, rng))
                .collect(),
            biases: Tensor::filled(1, 1, out_depth, bias),
            in_act: None,
        }
    }
    pub(crate) fn out_depth(&self) -> usize {
        self.out_depth
    }
    pub(crate) fn in_act(&self) -> Option<&Tensor> {
        self.in_act.as_ref()
    }
    /// output[i] = dot(filter_i, input) + bias_i
    pub(crate) fn forward(&mut self, input: Tensor) -> Tensor {
        let mut out = Tensor::zeros(1, 1, self.out_depth);
        for (i, f) in self.filters.iter().enumerate() {
            let sum = input
                .w()
                .iter()
                .zip(f.w())
                .fold(0.0, |acc, (v, w)| v.mul_add(*w, acc));
            out.w_mut()[i] = sum + self.biases.w()[i];
        }
        self.in_act = Some(input);
        out
    }
    /// Every output unit consumed the whole input, so the input gradient
    /// accumulates a contribution from each filter.
    pub(crate) fn backward(&mut self, output: &Tensor) {
        let Some(v) = self.in_act.as_mut() else {
            return;
        };
        v.zero_grad();
        for (i, f) in self.filters.iter_mut().enumerate() {
            let chain = output.dw()[i];
            let (fw, fdw) = f.buffers_mut();
            let (vw, vdw) = v.buffers_mut();
            for d in 0..fw.len() {
                vdw[d] = fw[d].mul_add(chain, vdw[d]); // grad wrt input data
                fdw[d] = vw[d].mul_add(chain, fdw[d]); // grad wrt params
            }
            self.biases.dw_mut()[i] += chain;
        }
    }
    pub(crate) fn params_and_grads(&mut self) -> Vec<ParamsAndGrads<'_>> {
        let mut response = Vec::with_capacity(self.out_depth + 1);
        for f in self.filters.iter_mut() {
            let (params, grads) = f.buffers_mut();
            response.push(ParamsAndGrads {
                params,
                grads,
                l1_decay_mul: self.l1_decay_mul,
                l2_decay_mul: self.l2_decay_mul,
            });
        }
        let (params, grads) = self.biases.buffers_mut();
        response.push(ParamsAndGrads {
            params,
            grads,
            l1_decay_mul: 0.0,
            l2_decay_mul: 0.0,
        });
        response
    }
}

/// Convolutional layer: `out_depth` small 3-D kernels correlated over the
/// zero-padded input at a fixed stride.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConvLayer {
    sx: usize,
    sy: usize,
    in_sx: usize,
    in_sy: usize,
    in_depth: usize,
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
    stride: usize,
    pad: usize,
    l1_decay_mul: f64,
    l2_decay_mul: f64,
    filters: Vec<Tensor>,
    biases: Tensor,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl ConvLayer {
    pub(crate) fn from_def<R: Rng>(def: &LayerDef, rng: &mut R) -> Self {
        let sx = def.sx;
        let sy = def.sy.unwrap_or(sx);
        let stride = def.stride.unwrap_or(1);
        let pad = def.pad;
        let out_depth = def.filters;
        // floor division: if the strided filter does not fit the padded
        // input exactly, the output is trimmed rather than erroring on an
        // incomplete final application
        let out_sx = (def.in_sx + 2 * pad - sx) / stride + 1;
        let out_sy = (def.in_sy + 2 * pad - sy) / stride + 1;
        Self {
            sx,
            sy,
            in_sx: def.in_sx,
            in_sy: def.in_sy,
            in_depth: def.in_depth,
            out_sx,
            out_sy,
            out_depth,
            stride,
            pad,
            l1_decay_mul: def.l1_decay_mul.unwrap_or(0.0),
            l2_decay_mul: def.l2_decay_mul.unwrap_or(1.0),
            filters: (0..out_depth)
                .map(|_| Tensor::randn(sx, sy, def.in_depth, rng))
                .collect(),
            biases: Tensor::filled(1, 1, out_depth, def.bias_pref.unwrap_or(0.0)),
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
        let mut out = Tensor::zeros(self.out_sx, self.out_sy, self.out_depth);
        let v = &input;
        for (d, f) in self.filters.iter().enumerate() {
            let mut y = -(self.pad as isize);
            for ay in 0..self.out_sy {
                let mut x = -(self.pad as isize);
                for ax in 0..self.out_sx {
                    // convolve centered at this particular location;
                    // footprint positions outside the input contribute zero
                    let mut sum = 0.0;
                    for fy in 0..f.sy() {
                        let oy = y + fy as isize;
                        if oy < 0 || oy >= v.sy() as isize {
                            continue;
                        }
                        for fx in 0..f.sx() {
                            let ox = x + fx as isize;
                            if ox < 0 || ox >= v.sx() as isize {
                                continue;
                            }
                            for fd in 0..f.depth() {
                                sum += f.get(fx, fy, fd) * v.get(ox as usize, oy as usize, fd);
                            }
                        }
                    }
                    sum += self.biases.w()[d];
                    out.set(ax, ay, d, sum);
                    x += self.stride as isize;
                }
                y += self.stride as isize;
            }
        }
        self.in_act = Some(input);
        out
    }
    /// Scatters each output gradient back through the same footprint into
    /// the filter gradients, the input gradients, and the bias gradient.
    pub(crate) fn backward(&mut self, output: &Tensor) {
        let Some(v) = self.in_act.as_mut() else {
            return;
        };
        v.zero_grad();
        for (d, f) in self.filters.iter_mut().enumerate() {
            let mut y = -(self.pad as isize);
            for ay in 0..self.out_sy {
                let mut x = -(self.pad as isize);
                for ax in 0..self.out_sx {
                    let chain = output.get_grad(ax, ay, d);
                    for fy in 0..f.sy() {
                        let oy = y + fy as isize;
                        if oy < 0 || oy >= v.sy() as isize {
                            continue;
                        }
                        for fx in 0..f.sx() {
                            let ox = x + fx as isize;
                            if ox < 0 || ox >= v.sx() as isize {
                                continue;
                            }
                            let (ox, oy) = (ox as usize, oy as usize);
                            for fd in 0..f.depth() {
                                f.add_grad(fx, fy, fd, v.get(ox, oy, fd) * chain);
                                v.add_grad(ox, oy, fd, f.get(fx, fy, fd) * chain);
                            }
                        }
                    }
                    self.biases.dw_mut()[d] += chain;
                    x += self.stride as isize;
                }
                y += self.stride as isize;
            }
        }
    }
    pub(crate) fn params_and_grads(&mut self) -> Vec<ParamsAndGrads<'_>> {
        let mut response = Vec::with_capacity(self.out_depth + 1);
        for f in self.filters.iter_mut() {
            let (params, grads) = f.buffers_mut();
            response.push(ParamsAndGrads {
                params,
                grads,
                l1_decay_mul: self.l1_decay_mul,
                l2_decay_mul: self.l2_decay_mul,
            });
        }
        let (params, grads) = self.biases.buffers_mut();
        response.push(ParamsAndGrads {
            params,
            grads,
            l1_decay_mul: 0.0,
            l2_decay_mul: 0.0,
        });
        response
    }
}
