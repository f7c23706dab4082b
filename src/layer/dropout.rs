use crate::layer::LayerDef;
use crate::tensor::Tensor;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

fn entropy_rng() -> SmallRng {
    SmallRng::from_entropy()
}

/// Dropout layer.
///
/// At training time each element is dropped independently with probability
/// `drop_prob`; the decisions are cached so the backward pass zeroes exactly
/// the dropped gradients. At prediction time every value is scaled by
/// `drop_prob` instead, deterministically.
#[derive(Debug, Serialize, Deserialize)]
pub struct DropoutLayer {
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
    drop_prob: f64,
    #[serde(skip)]
    dropped: Vec<bool>,
    #[serde(skip, default = "entropy_rng")]
    rng: SmallRng,
    #[serde(skip)]
    in_act: Option<Tensor>,
}

impl DropoutLayer {
    pub(crate) fn from_def<R: Rng>(def: &LayerDef, rng: &mut R) -> Self {
        let mut layer = Self {
            out_sx: def.in_sx,
            out_sy: def.in_sy,
            out_depth: def.in_depth,
            drop_prob: def.drop_prob.unwrap_or(0.5),
            dropped: Vec::new(),
            rng: SmallRng::seed_from_u64(rng.next_u64()),
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
        self.dropped = vec![false; self.out_sx * self.out_sy * self.out_depth];
    }
    pub(crate) fn forward(&mut self, input: Tensor, is_training: bool) -> Tensor {
        let mut out = input.clone();
        if is_training {
            for (w, dropped) in out.w_mut().iter_mut().zip(self.dropped.iter_mut()) {
                if self.rng.gen::<f64>() < self.drop_prob {
                    *w = 0.0;
                    *dropped = true;
                } else {
                    *dropped = false;
                }
            }
        } else {
            // scale the activations during prediction. Note: this scales by
            // the drop probability, not the keep probability, matching the
            // engine's historical behavior
            for w in out.w_mut() {
                *w *= self.drop_prob;
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
            if !self.dropped[i] {
                dw[i] = output.dw()[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(drop_prob: f64, depth: usize) -> DropoutLayer {
        let mut def = LayerDef::dropout(drop_prob);
        def.in_sx = 1;
        def.in_sy = 1;
        def.in_depth = depth;
        DropoutLayer::from_def(&def, &mut SmallRng::seed_from_u64(7))
    }

    #[test]
    fn prediction_scales_values_by_the_drop_probability() {
        let mut layer = layer(0.3, 4);
        let out = layer.forward(Tensor::filled(1, 1, 4, 1.0), false);
        assert!(out.w().iter().all(|&w| w == 0.3));
    }

    #[test]
    fn prediction_is_deterministic() {
        let mut layer = layer(0.5, 16);
        let x = Tensor::from_vec((0..16).map(f64::from).collect());
        let a = layer.forward(x.clone(), false);
        let b = layer.forward(x, false);
        assert_eq!(a.w(), b.w());
    }

    #[test]
    fn backward_masks_exactly_the_dropped_elements() {
        let mut layer = layer(0.5, 64);
        let mut out = layer.forward(Tensor::filled(1, 1, 64, 1.0), true);
        for g in out.dw_mut() {
            *g = 1.0;
        }
        layer.backward(&out);
        let v = layer.in_act().unwrap();
        for i in 0..64 {
            if out.w()[i] == 0.0 {
                assert_eq!(v.dw()[i], 0.0);
            } else {
                assert_eq!(v.dw()[i], 1.0);
            }
        }
    }
}
