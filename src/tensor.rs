use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// The basic building block of all data in a network.
///
/// A [`Tensor`] is a 3-D volume of numbers with a width (`sx`), height
/// (`sy`), and depth. It holds activations, filter weights, and biases, and
/// additionally stores a gradient with respect to each value. Values and
/// gradients are flat buffers of equal length addressed row-major with the
/// channel varying fastest: `(sx * y + x) * depth + d`.
///
/// # serde
/// Only the shape and values are persisted. Deserialization allocates a
/// fresh zeroed gradient buffer of matching length.
#[derive(Debug, Serialize, Deserialize)]
#[serde(from = "TensorRepr")]
pub struct Tensor {
    sx: usize,
    sy: usize,
    depth: usize,
    w: Vec<f64>,
    #[serde(skip_serializing)]
    dw: Vec<f64>,
}

#[derive(Deserialize)]
struct TensorRepr {
    sx: usize,
    sy: usize,
    depth: usize,
    w: Vec<f64>,
}

impl From<TensorRepr> for Tensor {
    fn from(repr: TensorRepr) -> Self {
        let TensorRepr { sx, sy, depth, w } = repr;
        let dw = vec![0.0; w.len()];
        Self { sx, sy, depth, w, dw }
    }
}

impl Tensor {
    /// Creates a tensor with every value set to `value` and zero gradients.
    pub fn filled(sx: usize, sy: usize, depth: usize, value: f64) -> Self {
        let n = sx * sy * depth;
        Self {
            sx,
            sy,
            depth,
            w: vec![value; n],
            dw: vec![0.0; n],
        }
    }
    /// Creates a zeroed tensor.
    pub fn zeros(sx: usize, sy: usize, depth: usize) -> Self {
        Self::filled(sx, sy, depth, 0.0)
    }
    /// Creates a 1×1×N tensor from a vector of values.
    pub fn from_vec(w: Vec<f64>) -> Self {
        let dw = vec![0.0; w.len()];
        Self {
            sx: 1,
            sy: 1,
            depth: w.len(),
            w,
            dw,
        }
    }
    /// Creates a tensor with values drawn from a normal distribution scaled
    /// by `sqrt(1 / n)`.
    ///
    /// The scaling equalizes the output variance of every neuron; otherwise
    /// neurons with many incoming connections produce outputs of larger
    /// variance.
    pub fn randn<R: Rng>(sx: usize, sy: usize, depth: usize, rng: &mut R) -> Self {
        let n = sx * sy * depth;
        let scale = (1.0 / n.max(1) as f64).sqrt();
        let w = (0..n)
            .map(|_| rng.sample::<f64, _>(StandardNormal) * scale)
            .collect();
        Self {
            sx,
            sy,
            depth,
            w,
            dw: vec![0.0; n],
        }
    }
    /// Width of the tensor.
    pub fn sx(&self) -> usize {
        self.sx
    }
    /// Height of the tensor.
    pub fn sy(&self) -> usize {
        self.sy
    }
    /// Depth (number of channels) of the tensor.
    pub fn depth(&self) -> usize {
        self.depth
    }
    /// Number of elements (`sx * sy * depth`).
    pub fn len(&self) -> usize {
        self.w.len()
    }
    /// Whether the tensor has no elements.
    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }
    fn index(&self, x: usize, y: usize, d: usize) -> usize {
        (self.sx * y + x) * self.depth + d
    }
    /// Returns the value at (`x`, `y`, `d`).
    pub fn get(&self, x: usize, y: usize, d: usize) -> f64 {
        self.w[self.index(x, y, d)]
    }
    /// Sets the value at (`x`, `y`, `d`).
    pub fn set(&mut self, x: usize, y: usize, d: usize, value: f64) {
        let i = self.index(x, y, d);
        self.w[i] = value;
    }
    /// Adds `value` to the value at (`x`, `y`, `d`).
    pub fn add(&mut self, x: usize, y: usize, d: usize, value: f64) {
        let i = self.index(x, y, d);
        self.w[i] += value;
    }
    /// Returns the gradient at (`x`, `y`, `d`).
    pub fn get_grad(&self, x: usize, y: usize, d: usize) -> f64 {
        self.dw[self.index(x, y, d)]
    }
    /// Sets the gradient at (`x`, `y`, `d`).
    pub fn set_grad(&mut self, x: usize, y: usize, d: usize, value: f64) {
        let i = self.index(x, y, d);
        self.dw[i] = value;
    }
    /// Adds `value` to the gradient at (`x`, `y`, `d`).
    pub fn add_grad(&mut self, x: usize, y: usize, d: usize, value: f64) {
        let i = self.index(x, y, d);
        self.dw[i] += value;
    }
    /// The value buffer.
    pub fn w(&self) -> &[f64] {
        &self.w
    }
    /// The value buffer, mutably.
    pub fn w_mut(&mut self) -> &mut [f64] {
        &mut self.w
    }
    /// The gradient buffer.
    pub fn dw(&self) -> &[f64] {
        &self.dw
    }
    /// The gradient buffer, mutably.
    pub fn dw_mut(&mut self) -> &mut [f64] {
        &mut self.dw
    }
    /// The value and gradient buffers, mutably and simultaneously.
    pub fn buffers_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.w, &mut self.dw)
    }
    /// Zeroes the gradient buffer.
    ///
    /// A layer owns the obligation to zero its input tensor's gradients
    /// before accumulating into them during a backward pass.
    pub fn zero_grad(&mut self) {
        self.dw.iter_mut().for_each(|g| *g = 0.0);
    }
    /// Creates a zeroed tensor of the same shape.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.sx, self.sy, self.depth)
    }
    /// Sets every value to `value`.
    pub fn set_const(&mut self, value: f64) {
        self.w.iter_mut().for_each(|w| *w = value);
    }
    /// Adds the values of `other` elementwise.
    pub fn add_from(&mut self, other: &Self) {
        for (w, o) in self.w.iter_mut().zip(other.w.iter()) {
            *w += o;
        }
    }
    /// The index of the largest value, or `None` for an empty tensor.
    pub fn max_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &w) in self.w.iter().enumerate() {
            match best {
                Some((_, b)) if w <= b => {}
                _ => best = Some((i, w)),
            }
        }
        best.map(|(i, _)| i)
    }
    /// Adds the values of `other` elementwise, scaled by `scale`.
    pub fn add_from_scaled(&mut self, other: &Self, scale: f64) {
        for (w, o) in self.w.iter_mut().zip(other.w.iter()) {
            *w += scale * o;
        }
    }
}

impl Clone for Tensor {
    /// Clones the shape and values. The clone gets fresh zero gradients.
    fn clone(&self) -> Self {
        Self {
            sx: self.sx,
            sy: self.sy,
            depth: self.depth,
            w: self.w.clone(),
            dw: vec![0.0; self.w.len()],
        }
    }
}
