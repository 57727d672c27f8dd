//! Integration tests for the training strategies.
//!
//! These tests verify end-to-end training behavior:
//! - Every strategy keeps weights inside `[min_weight, max_weight]`
//! - Supervised modes are accepted or rejected per strategy
//! - Progress callbacks see every sample
//! - A full experiment runs every epoch and evaluates the testing set

use bionn::connections::{ConnectionStore, DenseConnections};
use bionn::data::{unlabelled, InMemoryProvider};
use bionn::experiment::{Experiment, ExperimentConfig};
use bionn::training::{HebbianTrainer, NaiveHebbian, TargetedRightDegree};
use bionn::{
    AlgorithmKind, BionnError, LabelledSample, LearningMode, Network, NetworkConfig,
    TrainingAlgorithm, TrainingConfig,
};
use rstest::rstest;
use std::sync::atomic::AtomicBool;

/// Two classes: left half bright or right half bright.
fn halves(count: usize) -> Vec<LabelledSample> {
    (0..count)
        .map(|i| {
            let label = i % 2;
            let data = (0..8)
                .map(|unit| if (unit < 4) == (label == 0) { 255 } else { 0 })
                .collect();
            LabelledSample::new(data, label)
        })
        .collect()
}

fn network(seed: u64) -> Network {
    let mut config = NetworkConfig::with_layers(8, vec![6, 5], 2, 3);
    config.activation_threshold = 1;
    config.min_weight = -2;
    config.max_weight = 2;
    config.seed = Some(seed);
    Network::new(&config).expect("valid config")
}

fn assert_weights_in_bounds(network: &Network) {
    for layer in 0..network.connection_count() {
        let weights = network.all_weights(layer).unwrap();
        assert!(
            weights
                .iter()
                .all(|w| (network.min_weight()..=network.max_weight()).contains(w)),
            "layer {layer} has a weight outside the configured range"
        );
    }
}

fn algorithm(kind: AlgorithmKind) -> Box<dyn TrainingAlgorithm<DenseConnections>> {
    TrainingConfig {
        algorithm: kind,
        learning_probability: 1.0,
        activation_samples: 3,
        particles: 2,
        ..TrainingConfig::default()
    }
    .build()
    .expect("valid training config")
}

#[rstest]
#[case::cd(AlgorithmKind::Cd)]
#[case::sampling(AlgorithmKind::CdSampling)]
#[case::persistent(AlgorithmKind::Pcd)]
fn test_weights_stay_in_bounds(#[case] kind: AlgorithmKind) {
    let mut network = network(1);
    let samples = halves(12);
    let mut trainer = algorithm(kind);

    for _ in 0..5 {
        trainer
            .train_unsupervised(&mut network, &unlabelled(&samples), None)
            .unwrap();
        trainer
            .train_supervised(&mut network, &samples, LearningMode::FeedForward, None)
            .unwrap();
        assert_weights_in_bounds(&network);
    }
}

#[rstest]
#[case::cd_joint_normal(AlgorithmKind::Cd, LearningMode::JointNormal, false)]
#[case::cd_joint_alternative(AlgorithmKind::Cd, LearningMode::JointAlternative, false)]
#[case::sampling_joint_normal(AlgorithmKind::CdSampling, LearningMode::JointNormal, true)]
#[case::sampling_joint_alternative(AlgorithmKind::CdSampling, LearningMode::JointAlternative, true)]
#[case::persistent_joint_normal(AlgorithmKind::Pcd, LearningMode::JointNormal, true)]
#[case::persistent_joint_alternative(AlgorithmKind::Pcd, LearningMode::JointAlternative, false)]
fn test_joint_mode_support(
    #[case] kind: AlgorithmKind,
    #[case] mode: LearningMode,
    #[case] supported: bool,
) {
    let mut network = network(2);
    let before: Vec<Vec<i32>> = (0..network.connection_count())
        .map(|layer| network.all_weights(layer).unwrap())
        .collect();

    let result = algorithm(kind).train_supervised(&mut network, &halves(6), mode, None);
    if supported {
        let metrics = result.unwrap();
        assert_eq!(metrics.layers_trained, 2);
        assert_weights_in_bounds(&network);
    } else {
        assert!(matches!(result, Err(BionnError::Unsupported(_))));
        // rejected before touching the network
        let after: Vec<Vec<i32>> = (0..network.connection_count())
            .map(|layer| network.all_weights(layer).unwrap())
            .collect();
        assert_eq!(before, after);
    }
}

#[test]
fn test_joint_modes_need_a_hidden_layer_below_the_labels() {
    let mut config = NetworkConfig::with_layers(8, vec![], 2, 3);
    config.seed = Some(3);
    let mut network: Network = Network::new(&config).unwrap();
    let result = algorithm(AlgorithmKind::CdSampling).train_supervised(
        &mut network,
        &halves(2),
        LearningMode::JointNormal,
        None,
    );
    assert!(matches!(result, Err(BionnError::InvalidConfig(_))));
}

#[test]
fn test_unknown_label_is_rejected() {
    let mut network = network(4);
    let samples = vec![LabelledSample::new(vec![255; 8], 5)];
    let result = algorithm(AlgorithmKind::Cd).train_supervised(
        &mut network,
        &samples,
        LearningMode::FeedForward,
        None,
    );
    assert!(matches!(result, Err(BionnError::OutOfBounds { what: "label", .. })));
}

#[rstest]
#[case::cd(AlgorithmKind::Cd)]
#[case::sampling(AlgorithmKind::CdSampling)]
#[case::persistent(AlgorithmKind::Pcd)]
fn test_progress_sees_every_sample(#[case] kind: AlgorithmKind) {
    let mut network = network(5);
    let samples = halves(7);
    let mut seen = Vec::new();
    let mut record = |done: usize| seen.push(done);
    algorithm(kind)
        .train_unsupervised(&mut network, &unlabelled(&samples), Some(&mut record))
        .unwrap();
    assert_eq!(seen.iter().max().copied(), Some(7));
    assert_eq!(seen[0], 1);
}

#[test]
fn test_hebbian_rules_only_add_excitatory_edges() {
    let mut config = NetworkConfig::with_layers(8, vec![6], 2, 3);
    config.activation_threshold = 1;
    config.weight_probabilities = Some(vec![0.0, 1.0, 0.0]);
    config.seed = Some(6);
    let mut network: Network = Network::new(&config).unwrap();
    let samples = halves(4);

    // all-zero weights and threshold 1: nothing fires past the input layer
    let mut naive = HebbianTrainer::new(NaiveHebbian::new(1.0).unwrap());
    naive
        .train_unsupervised(&mut network, &unlabelled(&samples), None)
        .unwrap();
    assert_eq!(network.connections(0).unwrap().non_zero_count(), 0);

    naive
        .train_supervised(&mut network, &samples, LearningMode::FeedForward, None)
        .unwrap();
    assert!(network.all_weights(1).unwrap().iter().all(|&w| w == 0 || w == 1));

    let mut targeted = HebbianTrainer::new(TargetedRightDegree { target_degree: 2 });
    targeted
        .train_supervised(&mut network, &samples, LearningMode::FeedForward, None)
        .unwrap();
    assert!(network.all_weights(1).unwrap().iter().all(|&w| w == 0 || w == 1));
}

#[rstest]
#[case::symmetric(-1, 1, true)]
#[case::inhibitory_only(-2, 0, false)]
fn test_hebbian_rules_stay_inside_weight_range(
    #[case] min_weight: i32,
    #[case] max_weight: i32,
    #[case] grows: bool,
) {
    let mut config = NetworkConfig::with_layers(8, vec![], 2, 3);
    config.activation_threshold = 1;
    config.min_weight = min_weight;
    config.max_weight = max_weight;
    config.weight_probabilities = Some({
        let mut p = vec![0.0; usize::try_from(max_weight - min_weight + 1).unwrap()];
        p[usize::try_from(-min_weight).unwrap()] = 1.0;
        p
    });
    config.seed = Some(8);
    let mut network: Network = Network::new(&config).unwrap();
    let samples = halves(6);

    HebbianTrainer::new(NaiveHebbian::new(1.0).unwrap())
        .train_supervised(&mut network, &samples, LearningMode::FeedForward, None)
        .unwrap();
    assert_weights_in_bounds(&network);
    HebbianTrainer::new(TargetedRightDegree { target_degree: 8 })
        .train_supervised(&mut network, &samples, LearningMode::FeedForward, None)
        .unwrap();
    assert_weights_in_bounds(&network);

    let created = network.connections(0).unwrap().non_zero_count();
    assert_eq!(created > 0, grows);
}

#[test]
fn test_experiment_runs_full_schedule() {
    let mut network_config = NetworkConfig::with_layers(8, vec![8], 2, 4);
    network_config.activation_threshold = 2;
    network_config.seed = Some(12);
    let config = ExperimentConfig {
        network: network_config,
        training: TrainingConfig {
            algorithm: AlgorithmKind::Cd,
            learning_probability: 0.3,
            ..TrainingConfig::default()
        },
        unsupervised_epochs: 3,
        supervised_epochs: 10,
        evaluation_attempts: 5,
    };
    let provider = InMemoryProvider::new(2, halves(40), halves(10));
    let cancel = AtomicBool::new(false);

    let report = Experiment::new(config)
        .run::<DenseConnections, _>(&provider, &cancel, None)
        .unwrap();
    assert_eq!(report.epochs.len(), 13);
    let evaluation = report.evaluation.expect("run was not cancelled");
    assert_eq!(evaluation.samples, 10);
    assert_eq!(evaluation.confusion.iter().flatten().sum::<usize>(), 10);
    assert_weights_in_bounds(&report.network);
}
