use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use qscan_core::reconstruct::{dead_reckoning, positions_from_encoder};
use qscan_core::{AcquisitionPlan, MeasurementKind, MotionProfile};
use qscan_traits::EncoderType;

// Delta counts of a motor slewing at a constant rate, with a little jitter.
fn synth_deltas(n: usize, seed: u32) -> Vec<f64> {
    let mut state = seed.max(1);
    let mut next = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    };
    (0..n).map(|_| 40.0 + (next() - 0.5)).collect()
}

fn long_scan(n: usize) -> (MotionProfile, AcquisitionPlan) {
    let mt = 0.001;
    let profile = MotionProfile {
        motor: "theta".into(),
        start: 0.0,
        end: 100.0,
        extended_start: -1.0,
        extended_end: 101.0,
        real_start: 0.0,
        real_end: 100.0,
        real_extended_start: -1.0,
        real_extended_end: 101.0,
        backlash_position: -1.0,
        acceleration_time: 0.2,
        acceleration_distance: 1.0,
        base_velocity: 0.0,
    };
    let requested = n - 404;
    let body_time = mt * (requested - 1) as f64;
    let plan = AcquisitionPlan {
        measurement: MeasurementKind::PresetTime { seconds: mt },
        measurement_time: mt,
        requested_num_measurements: requested,
        actual_num_measurements: n,
        premove_measurements: 2,
        acceleration_measurements: 200,
        premove_time: 2.0 * mt,
        acceleration_time: 0.2,
        body_time,
        estimated_duration: body_time + 0.404,
        backlash_correction: false,
        ports: vec![0],
    };
    (profile, plan)
}

pub fn bench_reconstruct(c: &mut Criterion) {
    let mut g = c.benchmark_group("reconstruct");
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE")
        && let Ok(n) = ss.parse::<usize>()
    {
        g.sample_size(n.max(1));
    } else {
        g.sample_size(50);
    }

    let n = 100_000usize;
    let deltas = synth_deltas(n, 0xC0FFEE);
    for ty in [EncoderType::Absolute, EncoderType::Incremental, EncoderType::Delta] {
        g.bench_function(format!("encoder_{ty:?}").to_lowercase(), |b| {
            b.iter_batched(
                || deltas.clone(),
                |raw| {
                    let p = positions_from_encoder(black_box(&raw), ty, 0.0025, 0.0, -1.0, n);
                    black_box(p);
                },
                BatchSize::LargeInput,
            )
        });
    }

    let (profile, plan) = long_scan(n);
    g.bench_function("dead_reckoning", |b| {
        b.iter(|| black_box(dead_reckoning(black_box(&profile), black_box(&plan))))
    });
    g.finish();
}

criterion_group!(reconstruct, bench_reconstruct);
criterion_main!(reconstruct);
