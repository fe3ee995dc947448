use approx::assert_abs_diff_eq;
use microstates::similarity::similarity;
use microstates::{
    fit, fit_cancellable, predict, resample, CancelToken, ClusterSet, Error, FitOptions,
    PredictOptions, Reference, ResampleOptions, SegmentLength, Strategy,
};

fn hadamard4() -> Vec<Vec<f32>> {
    vec![
        vec![0.5, 0.5, 0.5, 0.5],
        vec![0.5, -0.5, 0.5, -0.5],
        vec![0.5, 0.5, -0.5, -0.5],
        vec![0.5, -0.5, -0.5, 0.5],
    ]
}

/// Each basis vector repeated ten times, every other copy negated.
fn duplicated_basis() -> Vec<Vec<f32>> {
    let mut out = Vec::new();
    for b in hadamard4() {
        for i in 0..10 {
            let s = if i % 2 == 0 { 1.0 } else { -1.0 };
            out.push(b.iter().map(|v| v * s).collect());
        }
    }
    out
}

fn seeded(strategy: Strategy) -> FitOptions {
    FitOptions {
        random_seed: Some(2024),
        n_restarts: 20,
        strategy,
        ..FitOptions::default()
    }
}

fn assert_recovers_basis(set: &ClusterSet) {
    for b in hadamard4() {
        let best = set
            .centers()
            .iter()
            .map(|c| similarity(c, &b))
            .fold(0.0f32, f32::max);
        assert_abs_diff_eq!(best, 1.0, epsilon = 1e-5);
    }
}

#[test]
fn orthonormal_maps_are_recovered_exactly() {
    let data = duplicated_basis();
    for strategy in [Strategy::ModKMeans, Strategy::Aahc] {
        let result = fit(&data, 4, &seeded(strategy)).unwrap();
        assert_recovers_basis(result.cluster_set());
        assert_abs_diff_eq!(result.gev().total, 1.0, epsilon = 1e-6);
        for g in &result.gev().per_cluster {
            assert_abs_diff_eq!(*g, 0.25, epsilon = 1e-6);
        }
        assert!(result.converged());
    }
}

#[test]
fn strategies_agree_on_separated_clusters() {
    let mut data = Vec::new();
    for (j, b) in hadamard4().iter().enumerate() {
        for i in 0..8 {
            let e = 0.02 * (i as f32 - 3.5);
            let mut x = b.clone();
            x[(i + j) % 4] += e;
            if i % 3 == 0 {
                x.iter_mut().for_each(|v| *v = -*v);
            }
            data.push(x);
        }
    }
    let km = fit(&data, 4, &seeded(Strategy::ModKMeans)).unwrap();
    let ag = fit(&data, 4, &seeded(Strategy::Aahc)).unwrap();

    // Same partition up to relabeling.
    let (a, b) = (km.labels(), ag.labels());
    for i in 0..data.len() {
        for j in 0..data.len() {
            assert_eq!(a[i] == a[j], b[i] == b[j], "rows {i} and {j}");
        }
    }
    assert_abs_diff_eq!(km.gev().total, ag.gev().total, epsilon = 1e-4);
}

#[test]
fn single_cluster_is_the_aligned_mean() {
    let u = [0.6f32, 0.8, 0.0, 0.0];
    let perturb = [
        [0.05f32, -0.03, 0.02, 0.0],
        [-0.02, 0.01, 0.0, 0.04],
        [0.0, 0.02, -0.05, 0.01],
        [0.03, 0.0, 0.01, -0.02],
        [-0.04, -0.01, 0.03, 0.02],
        [0.01, 0.04, 0.0, -0.03],
    ];
    let data: Vec<Vec<f32>> = perturb
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let s = if i % 2 == 0 { 1.0 } else { -1.0 };
            u.iter().zip(p).map(|(a, b)| s * (a + b)).collect()
        })
        .collect();

    let result = fit(&data, 1, &seeded(Strategy::ModKMeans)).unwrap();
    let center = result.cluster_set().center(0).unwrap();

    // Sign-aligned mean of the unit-norm inputs.
    let mut mean = vec![0.0f32; 4];
    for x in &data {
        let n = x.iter().map(|v| v * v).sum::<f32>().sqrt();
        let s: f32 = if x.iter().zip(&u).map(|(a, b)| a * b).sum::<f32>() < 0.0 {
            -1.0
        } else {
            1.0
        };
        for (m, v) in mean.iter_mut().zip(x) {
            *m += s * v / n;
        }
    }
    assert_abs_diff_eq!(similarity(center, &mean), 1.0, epsilon = 1e-5);

    // No single direction explains noticeably more: compare with the leading
    // eigenvector from power iteration.
    let unit: Vec<Vec<f32>> = data
        .iter()
        .map(|x| {
            let n = x.iter().map(|v| v * v).sum::<f32>().sqrt();
            x.iter().map(|v| v / n).collect()
        })
        .collect();
    let mut v = vec![1.0f32, 0.0, 0.0, 0.0];
    for _ in 0..200 {
        let mut next = vec![0.0f32; 4];
        for x in &unit {
            let p: f32 = x.iter().zip(&v).map(|(a, b)| a * b).sum();
            for (n, xi) in next.iter_mut().zip(x) {
                *n += p * xi;
            }
        }
        let n = next.iter().map(|a| a * a).sum::<f32>().sqrt();
        v = next.into_iter().map(|a| a / n).collect();
    }
    let best: f64 = unit
        .iter()
        .map(|x| f64::from(similarity(x, &v)).powi(2))
        .sum::<f64>()
        / unit.len() as f64;
    assert!(result.gev().total <= best + 1e-5);
    assert_abs_diff_eq!(result.gev().total, best, epsilon = 1e-3);
}

#[test]
fn isolated_sample_is_smoothed_into_a_neighbor() {
    let basis = hadamard4();
    let set = ClusterSet::from_centers(basis[..3].to_vec()).unwrap();

    let mut signal: Vec<Vec<f32>> = Vec::new();
    signal.extend(std::iter::repeat(basis[0].clone()).take(25));
    signal.push(basis[2].clone());
    signal.extend(std::iter::repeat(basis[1].clone()).take(24));
    assert_eq!(signal.len(), 50);

    let raw = predict(&set, &signal, &PredictOptions::default()).unwrap();
    assert_eq!(raw.labels()[25], Some(2));

    let opts = PredictOptions {
        min_segment_length: SegmentLength::Samples(3),
        ..PredictOptions::default()
    };
    let seg = predict(&set, &signal, &opts).unwrap();
    let l = seg.labels();
    assert!(l[25] == l[24] || l[25] == l[26]);
    assert!(seg.segments().iter().all(|s| s.duration() >= 3));
}

#[test]
fn save_and_load_round_trip() {
    let result = fit(&duplicated_basis(), 4, &seeded(Strategy::ModKMeans)).unwrap();
    let set = result.cluster_set();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("maps.safetensors");
    set.save(&path).unwrap();
    let loaded = ClusterSet::load(&path).unwrap();

    assert_eq!(&loaded, set);
    assert_eq!(loaded.metadata().options, seeded(Strategy::ModKMeans));
    assert_eq!(loaded.metadata().gev, Some(result.gev().total));
    for (a, b) in loaded.centers().iter().flatten().zip(set.centers().iter().flatten()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn loading_a_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ClusterSet::load(dir.path().join("absent.safetensors")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn winning_seed_reproduces_the_fit() {
    let data = duplicated_basis();
    let result = fit(&data, 4, &seeded(Strategy::ModKMeans)).unwrap();
    let seed = result.cluster_set().metadata().seed.unwrap();

    let again = fit(
        &data,
        4,
        &FitOptions {
            random_seed: Some(seed),
            n_restarts: 1,
            ..FitOptions::default()
        },
    )
    .unwrap();
    assert_eq!(again.cluster_set().centers(), result.cluster_set().centers());
}

#[test]
fn average_reference_is_reused_at_predict_time() {
    // A constant offset on every channel vanishes under the average reference.
    let offset = 3.0f32;
    let data: Vec<Vec<f32>> = duplicated_basis()
        .into_iter()
        .map(|x| x.into_iter().map(|v| v + offset).collect())
        .collect();
    let opts = FitOptions {
        reference: Reference::Average,
        ..seeded(Strategy::Aahc)
    };
    let result = fit(&data, 3, &opts).unwrap();
    let seg = predict(result.cluster_set(), &data, &PredictOptions::default()).unwrap();
    assert_abs_diff_eq!(seg.gev().total, result.gev().total, epsilon = 1e-5);
}

#[test]
fn cancelled_fit_exposes_nothing() {
    let token = CancelToken::new();
    token.cancel();
    let err = fit_cancellable(&duplicated_basis(), 4, &seeded(Strategy::ModKMeans), &token)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn resampled_epochs_can_be_fitted() {
    let epochs = resample(
        &duplicated_basis(),
        &ResampleOptions {
            n_epochs: Some(2),
            n_samples: Some(20),
            replace: false,
            seed: Some(5),
            ..ResampleOptions::default()
        },
    )
    .unwrap();
    assert_eq!(epochs.len(), 2);
    for epoch in &epochs {
        let result = fit(epoch, 2, &seeded(Strategy::Aahc)).unwrap();
        assert_eq!(result.labels().len(), 20);
    }
}
