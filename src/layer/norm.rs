use crate::layer::LayerDef;
use crate::tensor::Tensor;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Local response normalization in a window along the depth of a volume.
///
/// `denom = (alpha / n) * sum(window squares) + k`, `output = input /
/// denom^beta`, with the window of `n` adjacent channels centered on the
/// channel being normalized and clamped at the depth boundaries.
#[derive(Debug, Serialize, Deserialize)]
pub struct LrnLayer {
    k: f64,
    n: usize,
    alpha: f64,
    beta: f64,
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
    #[serde(skip)]
    in_act: Option<Tensor>,
    /// Denominators cached by the forward pass for backprop.
    #[serde(skip)]
    s: Option<Tensor>,
}

impl LrnLayer {
    /// **Errors**
    ///
    /// The window size `n` must be odd so it can center on a channel.
    pub(crate) fn from_def(def: &LayerDef) -> Result<Self> {
        ensure!(
            def.n % 2 == 1,
            "local response normalization window must be odd, got {}",
            def.n
        );
        Ok(Self {
            k: def.k,
            n: def.n,
            alpha: def.alpha,
            beta: def.beta,
            out_sx: def.in_sx,
            out_sy: def.in_sy,
            out_depth: def.in_depth,
            in_act: None,
            s: None,
        })
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
        let v = &input;
        let mut out = v.zeros_like();
        let mut s = v.zeros_like();
        let n2 = self.n / 2;
        for x in 0..v.sx() {
            for y in 0..v.sy() {
                for i in 0..v.depth() {
                    let ai = v.get(x, y, i);
                    let lo = i.saturating_sub(n2);
                    let hi = (i + n2).min(v.depth() - 1);
                    let mut den = 0.0;
                    for j in lo..=hi {
                        let aa = v.get(x, y, j);
                        den += aa * aa;
                    }
                    den *= self.alpha / self.n as f64;
                    den += self.k;
                    s.set(x, y, i, den);
                    out.set(x, y, i, ai / den.powf(self.beta));
                }
            }
        }
        self.s = Some(s);
        self.in_act = Some(input);
        out
    }
    /// Exact derivative of the normalization: each channel collects the
    /// contribution of every output whose window covers it, plus the
    /// quotient-rule delta term when it is the window's center.
    pub(crate) fn backward(&mut self, output: &Tensor) {
        let Some(v) = self.in_act.as_mut() else {
            return;
        };
        let Some(s) = self.s.as_ref() else {
            return;
        };
        v.zero_grad();
        let n2 = self.n / 2;
        for x in 0..v.sx() {
            for y in 0..v.sy() {
                for i in 0..v.depth() {
                    let chain = output.get_grad(x, y, i);
                    let ai = v.get(x, y, i);
                    let si = s.get(x, y, i);
                    let sb = si.powf(self.beta);
                    let sb2 = sb * sb;
                    let lo = i.saturating_sub(n2);
                    let hi = (i + n2).min(v.depth() - 1);
                    for j in lo..=hi {
                        let aj = v.get(x, y, j);
                        let mut g = -ai
                            * self.beta
                            * si.powf(self.beta - 1.0)
                            * self.alpha
                            / self.n as f64
                            * 2.0
                            * aj;
                        if j == i {
                            g += sb;
                        }
                        g /= sb2;
                        g *= chain;
                        v.add_grad(x, y, j, g);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lrn_def(n: usize, depth: usize) -> LayerDef {
        let mut def = LayerDef::lrn(2.0, n, 1e-4, 0.75);
        def.in_sx = 1;
        def.in_sy = 1;
        def.in_depth = depth;
        def
    }

    #[test]
    fn even_window_is_rejected() {
        assert!(LrnLayer::from_def(&lrn_def(4, 8)).is_err());
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut layer = LrnLayer::from_def(&lrn_def(3, 5)).unwrap();
        let x = Tensor::from_vec(vec![0.4, -1.2, 2.0, 0.1, -0.7]);
        let chain = [1.0, -0.5, 2.0, 0.25, -1.5];

        let mut out = layer.forward(x.clone());
        for (g, c) in out.dw_mut().iter_mut().zip(chain) {
            *g = c;
        }
        layer.backward(&out);
        let analytic: Vec<f64> = layer.in_act().unwrap().dw().to_vec();

        // scalar objective: dot(chain, forward(x))
        let delta = 1e-6;
        for i in 0..x.len() {
            let mut objective_at = |sign: f64| {
                let mut xp = x.clone();
                xp.w_mut()[i] += sign * delta;
                let out = layer.forward(xp);
                out.w().iter().zip(chain).map(|(o, c)| o * c).sum::<f64>()
            };
            let numeric = (objective_at(1.0) - objective_at(-1.0)) / (2.0 * delta);
            assert_relative_eq!(analytic[i], numeric, epsilon = 1e-5, max_relative = 1e-5);
        }
    }
}
