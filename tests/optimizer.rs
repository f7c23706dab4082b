use convnet::{
    Activation, LayerDef, LossTarget, Method, Network, Tensor, Trainer, TrainerOptions,
};
use rand::rngs::SmallRng;
use rand::SeedableRng;

fn classifier(seed: u64) -> Network {
    let defs = [
        LayerDef::input(1, 1, 2),
        LayerDef::fc(5).activation(Activation::Tanh),
        LayerDef::softmax(3),
    ];
    Network::new(&defs, &mut SmallRng::seed_from_u64(seed)).unwrap()
}

fn snapshot(net: &mut Network) -> Vec<f64> {
    net.params_and_grads()
        .iter()
        .flat_map(|pg| pg.params.iter().copied())
        .collect()
}

#[test]
fn default_method_is_sgd() {
    assert_eq!(Method::default(), Method::Sgd);
    assert_eq!(TrainerOptions::default().method, Method::Sgd);
    assert_eq!(TrainerOptions::default().batch_size, 1);
    assert_eq!(TrainerOptions::default().learning_rate, 0.01);
}

#[test]
fn updates_wait_for_a_full_batch() {
    let mut net = classifier(10);
    let mut trainer = Trainer::new(TrainerOptions::default().momentum(0.0).batch_size(3));
    let x = Tensor::from_vec(vec![0.4, -0.9]);
    let target = LossTarget::Class(0);

    let before = snapshot(&mut net);
    trainer.train(&mut net, &x, target).unwrap();
    assert_eq!(snapshot(&mut net), before, "no update after one example");
    trainer.train(&mut net, &x, target).unwrap();
    assert_eq!(snapshot(&mut net), before, "no update after two examples");
    trainer.train(&mut net, &x, target).unwrap();
    assert_ne!(snapshot(&mut net), before, "third example fills the batch");
    assert_eq!(trainer.iterations(), 3);
}

#[test]
fn every_method_reduces_loss_on_a_repeated_example() {
    for method in [
        Method::Sgd,
        Method::Adam,
        Method::Adagrad,
        Method::Windowgrad,
        Method::Adadelta,
        Method::Nesterov,
    ] {
        let mut net = classifier(11);
        let mut trainer = Trainer::new(TrainerOptions::default().method(method));
        let x = Tensor::from_vec(vec![0.7, 0.1]);
        let target = LossTarget::Class(2);
        let first = trainer.train(&mut net, &x, target).unwrap().cost_loss;
        let mut last = first;
        for _ in 0..100 {
            last = trainer.train(&mut net, &x, target).unwrap().cost_loss;
        }
        assert!(
            last < first,
            "{method:?}: loss went from {first} to {last}"
        );
    }
}

#[test]
fn weight_decay_losses_are_charged_on_update_steps() {
    // filters carry an L1 multiplier of 0 unless the definition sets one
    let defs = [
        LayerDef::input(1, 1, 2),
        LayerDef::fc(5).activation(Activation::Tanh).l1_decay_mul(1.0),
        LayerDef::softmax(3),
    ];
    let mut net = Network::new(&defs, &mut SmallRng::seed_from_u64(12)).unwrap();
    let mut trainer = Trainer::new(
        TrainerOptions::default()
            .momentum(0.0)
            .l2_decay(0.001)
            .l1_decay(0.0001),
    );
    let x = Tensor::from_vec(vec![0.4, -0.9]);
    let result = trainer.train(&mut net, &x, LossTarget::Class(1)).unwrap();
    assert!(result.l2_decay_loss > 0.0);
    assert!(result.l1_decay_loss > 0.0);
    let total = result.cost_loss + result.l1_decay_loss + result.l2_decay_loss;
    assert!((result.loss - total).abs() < 1e-12);
}

#[test]
fn l1_decay_pushes_a_zero_weight_positive() {
    // with every parameter and the regression error at zero, the only force
    // on the weights is the L1 subgradient, whose negative branch applies
    // at exactly zero
    let defs = [
        LayerDef::input(1, 1, 1),
        LayerDef::fc(1).l1_decay_mul(1.0),
        LayerDef::regression(1),
    ];
    let mut net = Network::new(&defs, &mut SmallRng::seed_from_u64(14)).unwrap();
    for pg in net.params_and_grads() {
        for p in pg.params.iter_mut() {
            *p = 0.0;
        }
    }
    let mut trainer = Trainer::new(
        TrainerOptions::default()
            .momentum(0.0)
            .learning_rate(0.1)
            .l1_decay(0.5),
    );
    let x = Tensor::from_vec(vec![1.0]);
    trainer
        .train(&mut net, &x, LossTarget::Dimension { dim: 0, value: 0.0 })
        .unwrap();
    let params = snapshot(&mut net);
    // param += -lr * l1_decay * sign(0) = -0.1 * 0.5 * -1
    assert!((params[0] - 0.05).abs() < 1e-12, "got {}", params[0]);
    assert!(params[1..].iter().all(|&p| p == 0.0));
}

#[test]
fn decay_losses_are_zero_between_batch_boundaries() {
    let mut net = classifier(13);
    let mut trainer = Trainer::new(
        TrainerOptions::default()
            .momentum(0.0)
            .batch_size(2)
            .l2_decay(0.001),
    );
    let x = Tensor::from_vec(vec![0.4, -0.9]);
    let mid = trainer.train(&mut net, &x, LossTarget::Class(1)).unwrap();
    assert_eq!(mid.l2_decay_loss, 0.0);
    let boundary = trainer.train(&mut net, &x, LossTarget::Class(1)).unwrap();
    assert!(boundary.l2_decay_loss > 0.0);
}
