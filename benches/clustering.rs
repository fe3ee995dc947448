use criterion::{black_box, criterion_group, criterion_main, Criterion};
use microstates::cluster::{Aahc, Clustering, ModKMeans};
use microstates::{predict, ClusterSet, PredictOptions, SegmentLength};
use rand::prelude::*;

/// Unit-norm maps scattered around `k` random templates with random polarity.
fn synthetic(n: usize, d: usize, k: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let templates: Vec<Vec<f32>> = (0..k)
        .map(|_| (0..d).map(|_| rng.random::<f32>() - 0.5).collect())
        .collect();
    (0..n)
        .map(|i| {
            let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
            let mut x: Vec<f32> = templates[i % k]
                .iter()
                .map(|v| sign * (v + 0.1 * (rng.random::<f32>() - 0.5)))
                .collect();
            let n = x.iter().map(|v| v * v).sum::<f32>().sqrt();
            x.iter_mut().for_each(|v| *v /= n);
            x
        })
        .collect()
}

fn bench_modkmeans(c: &mut Criterion) {
    let mut group = c.benchmark_group("modkmeans");
    let data = synthetic(1000, 32, 4, 42);

    group.bench_function("fit_n1000_d32_k4_restarts10", |b| {
        b.iter(|| {
            let model = ModKMeans::new(4).with_n_init(10).with_seed(42);
            model.fit_centers(black_box(&data)).unwrap();
        })
    });

    group.finish();
}

fn bench_aahc(c: &mut Criterion) {
    let mut group = c.benchmark_group("aahc");
    group.sample_size(10);
    let data = synthetic(200, 32, 4, 7);

    group.bench_function("fit_n200_d32_k4", |b| {
        b.iter(|| {
            Aahc::new(4).fit_centers(black_box(&data)).unwrap();
        })
    });

    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict");
    let centers = synthetic(4, 32, 4, 1);
    let set = ClusterSet::from_centers(centers).unwrap();
    let signal = synthetic(10_000, 32, 4, 3);
    let opts = PredictOptions {
        min_segment_length: SegmentLength::Samples(5),
        ..PredictOptions::default()
    };

    group.bench_function("backfit_smooth_n10000_d32_k4", |b| {
        b.iter(|| {
            predict(&set, black_box(&signal), &opts).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_modkmeans, bench_aahc, bench_predict);
criterion_main!(benches);
