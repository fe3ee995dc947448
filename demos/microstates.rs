//! Fit four microstates to a synthetic recording and backfit them.

use microstates::{fit, predict, FitOptions, PredictOptions, Reference, SegmentLength, Strategy};

fn main() -> microstates::Result<()> {
    // Four 8-channel templates; the recording dwells on each for ~40 ms at
    // 250 Hz, with alternating polarity and a little channel noise.
    let templates: Vec<Vec<f32>> = vec![
        vec![1.0, 0.8, 0.3, -0.2, -0.6, -0.9, -0.4, 0.0],
        vec![-0.7, 0.2, 0.9, 0.6, -0.1, -0.5, 0.3, -0.8],
        vec![0.1, -0.9, -0.3, 0.7, 0.8, 0.0, -0.6, 0.2],
        vec![0.5, 0.5, -0.8, -0.8, 0.4, 0.4, 0.2, -0.3],
    ];
    let sfreq = 250.0f32;
    let mut recording = Vec::new();
    for t in 0..2000usize {
        let state = (t / 10) % 4;
        let polarity = if (t / 5) % 2 == 0 { 1.0 } else { -1.0 };
        let noise = |c: usize| 0.05 * ((t * 31 + c * 17) % 13) as f32 / 13.0;
        recording.push(
            templates[state]
                .iter()
                .enumerate()
                .map(|(c, v)| polarity * v + noise(c))
                .collect::<Vec<f32>>(),
        );
    }

    // Cluster every 5th sample as a stand-in for GFP peaks.
    let peaks: Vec<Vec<f32>> = recording.iter().step_by(5).cloned().collect();

    for strategy in [Strategy::ModKMeans, Strategy::Aahc] {
        let options = FitOptions {
            random_seed: Some(42),
            n_restarts: 10,
            strategy,
            reference: Reference::Average,
            ..FitOptions::default()
        };
        let result = fit(&peaks, 4, &options)?;
        println!("=== {strategy:?} ===");
        println!(
            "  fit GEV {:.4} after {} iterations (converged: {})",
            result.gev().total,
            result.n_iter(),
            result.converged()
        );

        let seg = predict(
            result.cluster_set(),
            &recording,
            &PredictOptions {
                min_segment_length: SegmentLength::Seconds(0.02),
                sfreq: Some(sfreq),
                ..PredictOptions::default()
            },
        )?;
        println!("  backfit GEV {:.4}", seg.gev().total);
        for s in seg.stats()? {
            println!(
                "  state {}: {} segments, mean {:.1} ms, coverage {:.1}%, {:.1}/s",
                s.cluster,
                s.n_segments,
                s.mean_duration * 1e3,
                s.time_coverage * 100.0,
                s.occurrences
            );
        }
    }

    Ok(())
}
