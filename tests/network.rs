use convnet::{
    Activation, Layer, LayerDef, LossTarget, Network, Tensor, Trainer, TrainerOptions,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn classifier_defs() -> Vec<LayerDef> {
    vec![
        LayerDef::input(1, 1, 2),
        LayerDef::fc(5).activation(Activation::Tanh),
        LayerDef::fc(5).activation(Activation::Tanh),
        LayerDef::softmax(3),
    ]
}

fn classifier(rng: &mut SmallRng) -> Network {
    Network::new(&classifier_defs(), rng).unwrap()
}

#[test]
fn definitions_desugar_into_seven_layers() {
    let mut rng = SmallRng::seed_from_u64(0);
    let net = classifier(&mut rng);
    // input, fc, tanh, fc, tanh, fc (added for softmax), softmax
    assert_eq!(net.layers().len(), 7);
    assert!(matches!(net.layers()[0], Layer::Input(_)));
    assert!(matches!(net.layers()[2], Layer::Tanh(_)));
    assert!(matches!(net.layers()[5], Layer::Fc(_)));
    assert!(matches!(net.layers()[6], Layer::Softmax(_)));
}

#[test]
fn construction_rejects_malformed_chains() {
    let mut rng = SmallRng::seed_from_u64(0);
    // too short
    assert!(Network::new(&[LayerDef::input(1, 1, 2)], &mut rng).is_err());
    // does not start with an input layer
    assert!(Network::new(&[LayerDef::fc(2), LayerDef::softmax(2)], &mut rng).is_err());
    // does not end in a loss layer
    assert!(Network::new(&[LayerDef::input(1, 1, 2), LayerDef::fc(2)], &mut rng).is_err());
}

#[test]
fn backward_before_forward_is_an_error() {
    let mut rng = SmallRng::seed_from_u64(0);
    let mut net = classifier(&mut rng);
    assert!(net.backward(LossTarget::Class(0)).is_err());
}

#[test]
fn forward_yields_a_probability_distribution() {
    let mut rng = SmallRng::seed_from_u64(1);
    let mut net = classifier(&mut rng);
    let x = Tensor::from_vec(vec![0.2, -0.3]);
    let out = net.forward(&x, false);
    assert_eq!(out.len(), 3);
    let sum: f64 = out.w().iter().sum();
    assert!((sum - 1.0).abs() < 1e-4, "probabilities sum to {sum}");
    assert!(out.w().iter().all(|&p| (0.0..=1.0).contains(&p)));
    assert_eq!(net.prediction().unwrap(), out.max_index().unwrap());
}

#[test]
fn training_increases_the_probability_of_the_target_class() {
    let mut rng = SmallRng::seed_from_u64(2);
    let mut net = classifier(&mut rng);
    let mut trainer = Trainer::new(
        TrainerOptions::default()
            .learning_rate(0.0001)
            .momentum(0.0)
            .batch_size(1),
    );
    for _ in 0..100 {
        let x = Tensor::from_vec(vec![
            rng.gen::<f64>() * 2.0 - 1.0,
            rng.gen::<f64>() * 2.0 - 1.0,
        ]);
        let class = rng.gen_range(0..3);
        let before = net.forward(&x, false).w()[class];
        trainer.train(&mut net, &x, LossTarget::Class(class)).unwrap();
        let after = net.forward(&x, false).w()[class];
        assert!(
            after > before,
            "p(class {class}) fell from {before} to {after}"
        );
    }
}

#[test]
fn input_gradient_matches_finite_differences() {
    let mut rng = SmallRng::seed_from_u64(3);
    let mut net = classifier(&mut rng);
    let x = Tensor::from_vec(vec![0.6, -0.4]);
    let target = LossTarget::Class(1);

    net.forward(&x, false);
    net.backward(target).unwrap();
    let analytic = net.input_gradient().unwrap().to_vec();

    let delta = 1e-6;
    for i in 0..x.len() {
        let mut loss_at = |sign: f64| {
            let mut xp = x.clone();
            xp.w_mut()[i] += sign * delta;
            net.cost_loss(&xp, target).unwrap()
        };
        let numeric = (loss_at(1.0) - loss_at(-1.0)) / (2.0 * delta);
        let scale = analytic[i].abs().max(numeric.abs()).max(1e-9);
        assert!(
            (analytic[i] - numeric).abs() / scale < 0.01,
            "gradient mismatch at {i}: analytic {} vs numeric {numeric}",
            analytic[i]
        );
    }
}

#[test]
fn conv_pool_input_gradient_matches_finite_differences() {
    let mut rng = SmallRng::seed_from_u64(6);
    let defs = [
        LayerDef::input(6, 6, 1),
        LayerDef::conv(3, 2),
        LayerDef::pool(2),
        LayerDef::softmax(2),
    ];
    let mut net = Network::new(&defs, &mut rng).unwrap();
    let mut x = Tensor::zeros(6, 6, 1);
    for w in x.w_mut() {
        *w = rng.gen::<f64>() * 2.0 - 1.0;
    }
    let target = LossTarget::Class(0);

    net.forward(&x, false);
    net.backward(target).unwrap();
    let analytic = net.input_gradient().unwrap().to_vec();

    let delta = 1e-6;
    for i in 0..x.len() {
        let mut loss_at = |sign: f64| {
            let mut xp = x.clone();
            xp.w_mut()[i] += sign * delta;
            net.cost_loss(&xp, target).unwrap()
        };
        let numeric = (loss_at(1.0) - loss_at(-1.0)) / (2.0 * delta);
        let scale = analytic[i].abs().max(numeric.abs()).max(1e-9);
        assert!(
            (analytic[i] - numeric).abs() / scale < 0.01,
            "gradient mismatch at {i}: analytic {} vs numeric {numeric}",
            analytic[i]
        );
    }
}

#[test]
fn svm_margin_training_reduces_loss() {
    let mut rng = SmallRng::seed_from_u64(7);
    let defs = [
        LayerDef::input(1, 1, 2),
        LayerDef::fc(5).activation(Activation::Tanh),
        LayerDef::svm(3),
    ];
    let mut net = Network::new(&defs, &mut rng).unwrap();
    assert!(net.prediction().is_err(), "svm has no softmax probabilities");

    let mut trainer = Trainer::new(TrainerOptions::default().momentum(0.0));
    let x = Tensor::from_vec(vec![0.6, -0.2]);
    let target = LossTarget::Class(1);
    let first = trainer.train(&mut net, &x, target).unwrap().cost_loss;
    assert!(first > 0.0, "fresh scores sit inside the margin");
    let mut last = first;
    for _ in 0..100 {
        last = trainer.train(&mut net, &x, target).unwrap().cost_loss;
    }
    assert!(last < first, "loss went from {first} to {last}");
}

#[test]
fn regression_reduces_distance_to_the_target() {
    let mut rng = SmallRng::seed_from_u64(4);
    let defs = [
        LayerDef::input(1, 1, 2),
        LayerDef::fc(6).activation(Activation::Tanh),
        LayerDef::regression(1),
    ];
    let mut net = Network::new(&defs, &mut rng).unwrap();
    assert!(net.prediction().is_err(), "regression has no class prediction");

    let mut trainer = Trainer::new(TrainerOptions::default().momentum(0.0));
    let x = Tensor::from_vec(vec![0.5, -0.5]);
    let target = LossTarget::Dimension { dim: 0, value: 0.8 };
    let first = trainer.train(&mut net, &x, target).unwrap().cost_loss;
    for _ in 0..200 {
        trainer.train(&mut net, &x, target).unwrap();
    }
    let last = net.cost_loss(&x, target).unwrap();
    assert!(last < first / 10.0, "loss went from {first} to {last}");
}

#[test]
fn loss_target_kind_must_match_the_loss_layer() {
    let mut rng = SmallRng::seed_from_u64(5);
    let mut net = classifier(&mut rng);
    let x = Tensor::from_vec(vec![0.1, 0.2]);
    net.forward(&x, false);
    assert!(net
        .backward(LossTarget::Dimension { dim: 0, value: 1.0 })
        .is_err());
}
