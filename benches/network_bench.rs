use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mpd_con::annotator::Annotator;
use mpd_con::column_network::ColumnNetwork;
use mpd_con::emission::StarTreeModel;
use mpd_con::example_gen::generate_ensemble;
use mpd_con::mpd_config::MpdConfigBuilder;

pub fn bench_network(c: &mut Criterion) {
    let num_sequences = [4, 16];
    let num_columns = [200, 2000];
    let num_samples = 100;
    let split_rates = [0.01, 0.05];

    let mut benchmark_group = c.benchmark_group("network-group");
    benchmark_group.sample_size(10);

    for &ns in num_sequences.iter() {
        for &nc in num_columns.iter() {
            for &sr in split_rates.iter() {
                let (_truth, ensemble) = generate_ensemble(ns, nc, num_samples, sr);

                let test_label = format!("viterbi_{ns}x{nc}x{num_samples}_{sr}");
                benchmark_group.bench_function(&test_label, |b| b.iter(|| {
                    black_box({
                        let mut network = ColumnNetwork::default();
                        for alignment in ensemble.iter() {
                            network.add_alignment(alignment).unwrap();
                        }
                        network.compute_equivalence_class_freqs().unwrap();
                        network.update_viterbi().unwrap();
                        network.consensus().unwrap()
                    });
                }));

                // pairwise statistics are only used by path counting and scoring
                let config = MpdConfigBuilder::default()
                    .two_state(true)
                    .build().unwrap();
                let test_label = format!("log_n_paths_{ns}x{nc}x{num_samples}_{sr}");
                benchmark_group.bench_function(&test_label, |b| b.iter(|| {
                    black_box({
                        let mut network = ColumnNetwork::with_config(config.clone());
                        for alignment in ensemble.iter() {
                            network.add_alignment(alignment).unwrap();
                        }
                        network.compute_equivalence_class_freqs().unwrap();
                        network.log_n_paths().unwrap()
                    });
                }));
            }
        }
    }

    benchmark_group.finish();
}

pub fn bench_annotator(c: &mut Criterion) {
    let mut benchmark_group = c.benchmark_group("annotator-group");
    benchmark_group.sample_size(10);

    let (_truth, ensemble) = generate_ensemble(8, 500, 100, 0.05);
    for num_states in [2, 4] {
        let rhos: Vec<f64> = (0..num_states).map(|s| 1.0 + s as f64).collect();
        let switch = 0.05 / (num_states - 1) as f64;
        let transitions: Vec<Vec<f64>> = (0..num_states)
            .map(|s| (0..num_states).map(|t| if s == t { 0.95 } else { switch }).collect())
            .collect();
        let initial = vec![1.0 / num_states as f64; num_states];

        let test_label = format!("annotate_8x500x100_{num_states}");
        benchmark_group.bench_function(&test_label, |b| b.iter(|| {
            black_box({
                let model = StarTreeModel::jukes_cantor(b"ACGT", 0.1, rhos.clone()).unwrap();
                let annotator = Annotator::new(Box::new(model), transitions.clone(), initial.clone()).unwrap();
                let mut network = ColumnNetwork::default();
                for alignment in ensemble.iter() {
                    network.add_alignment(alignment).unwrap();
                }
                network.compute_equivalence_class_freqs().unwrap();
                annotator.annotate(&mut network).unwrap()
            });
        }));
    }

    benchmark_group.finish();
}

criterion_group!(benches, bench_network, bench_annotator);
criterion_main!(benches);
