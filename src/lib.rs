//! Neural networks as a linear chain of layers, trained with reverse-mode
//! automatic differentiation.
//!
//! A [`Network`] is described declaratively as a list of [`LayerDef`]s,
//! starting with an input layer and ending in a loss layer. Definitions are
//! desugared on construction (activation shorthand becomes dedicated layers,
//! classifiers gain a projection layer) and shapes propagate forward, so
//! only the input shape and each layer's own hyperparameters need to be
//! spelled out. A [`Trainer`] then fits the parameters one example at a
//! time.
//!
//! ```
//! use convnet::{Activation, LayerDef, LossTarget, Network, Tensor, Trainer, TrainerOptions};
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! # fn main() -> anyhow::Result<()> {
//! let defs = [
//!     LayerDef::input(1, 1, 2),
//!     LayerDef::fc(5).activation(Activation::Tanh),
//!     LayerDef::softmax(3),
//! ];
//! let mut rng = SmallRng::seed_from_u64(0);
//! let mut net = Network::new(&defs, &mut rng)?;
//! let mut trainer = Trainer::new(TrainerOptions::default());
//!
//! let x = Tensor::from_vec(vec![0.5, -1.3]);
//! trainer.train(&mut net, &x, LossTarget::Class(2))?;
//!
//! net.forward(&x, false);
//! let class = net.prediction()?;
//! assert!(class < 3);
//! # Ok(())
//! # }
//! ```

pub mod layer;
pub mod network;
pub mod optimizer;
pub mod tensor;

pub use layer::{Activation, Layer, LayerDef, LayerKind, LossTarget, ParamsAndGrads};
pub use network::Network;
pub use optimizer::{Method, Trainer, TrainerOptions, TrainingResult};
pub use tensor::Tensor;
