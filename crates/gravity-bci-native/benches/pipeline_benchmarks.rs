//! Benchmarks for the per-tick signal path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use gravity_bci_core::{BciConfig, MindState, Window};
use gravity_bci_native::ml::features::FeatureExtractor;
use gravity_bci_native::processing::filters::BandpassFilter;
use gravity_bci_native::simulation::{SyntheticEeg, SyntheticEegConfig, TrialProtocol};
use gravity_bci_native::{Pipeline, PipelineSettings, Trainer};

/// One channel-major window of synthetic EEG
fn synthetic_window(samples: usize, seed: u64) -> Window {
    let mut eeg = SyntheticEeg::new(SyntheticEegConfig::default(), seed);
    let block = eeg.block(MindState::MotorImagery, samples);
    let channels: Vec<Vec<f64>> = (0..block[0].channel_count())
        .map(|c| block.iter().map(|s| s.values[c]).collect())
        .collect();
    Window::from_channels(0, &channels)
}

fn bench_bandpass(c: &mut Criterion) {
    let mut group = c.benchmark_group("bandpass");
    let config = BciConfig::default();
    let filter = BandpassFilter::from_signal(&config.signal()).expect("default passband is valid");

    for size in [250, 500, 1000] {
        let window = synthetic_window(size, 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let state = filter.initial_state(window.channel_count(), size);
            b.iter(|| {
                let filtered = filter.apply(black_box(&window), &state);
                black_box(filtered)
            });
        });
    }

    group.finish();
}

fn bench_feature_extraction(c: &mut Criterion) {
    let protocol = TrialProtocol { trials_per_class: 4, ..TrialProtocol::default() };
    let recording = SyntheticEeg::new(SyntheticEegConfig::default(), 2).record(&protocol);
    let trainer = Trainer::new(BciConfig::default()).expect("default configuration is valid");
    let model = trainer.fit(&recording).expect("synthetic data trains");
    let extractor = FeatureExtractor::from_model(&model).expect("trained model is consistent");
    let window = synthetic_window(250, 3);

    c.bench_function("extract_features", |b| {
        b.iter(|| {
            let features = extractor.extract(black_box(&window));
            black_box(features)
        });
    });
}

fn bench_pipeline_tick(c: &mut Criterion) {
    let protocol = TrialProtocol { trials_per_class: 4, ..TrialProtocol::default() };
    let mut eeg = SyntheticEeg::new(SyntheticEegConfig::default(), 4);
    let recording = eeg.record(&protocol);
    let trainer = Trainer::new(BciConfig::default()).expect("default configuration is valid");
    let model = trainer.fit(&recording).expect("synthetic data trains");
    let stride = eeg.block(MindState::Rest, 63);

    let mut pipeline = Pipeline::new(&model, PipelineSettings::default()).expect("trained model is consistent");
    pipeline.ingest_chunk(&eeg.block(MindState::Rest, 250)).expect("montage matches");

    c.bench_function("pipeline_tick", |b| {
        b.iter(|| {
            pipeline.ingest_chunk(black_box(&stride)).expect("montage matches");
            black_box(pipeline.tick())
        });
    });
}

criterion_group!(benches, bench_bandpass, bench_feature_extraction, bench_pipeline_tick);

criterion_main!(benches);
