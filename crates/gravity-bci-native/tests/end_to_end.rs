//! End-to-end pipeline scenarios on synthetic data

use gravity_bci_core::{BciConfig, MindState, Model, Sample, SkipReason};
use gravity_bci_native::processing::windowing::WindowSchedule;
use gravity_bci_native::{
    evaluate, Pipeline, PipelineSettings, SyntheticEeg, SyntheticEegConfig, TickOutcome, Trainer, TrialProtocol,
};

fn trained_model(seed: u64, trials_per_class: usize) -> Model {
    let protocol = TrialProtocol { trials_per_class, ..TrialProtocol::default() };
    let recording = SyntheticEeg::new(SyntheticEegConfig::default(), seed).record(&protocol);
    Trainer::new(BciConfig::default()).unwrap().fit(&recording).unwrap()
}

#[test]
fn test_ten_seconds_yield_37_windows() {
    let config = BciConfig::default();
    let mut schedule = WindowSchedule::from_signal(&config.signal());
    let polled = (1..=2500u64).filter(|&total| schedule.poll(total)).count();
    assert_eq!(polled, 37);

    let model = trained_model(7, 4);
    let mut eeg = SyntheticEeg::new(SyntheticEegConfig::default(), 8);
    let samples: Vec<Sample> = eeg.block(MindState::Rest, 2500);

    let mut pipeline = Pipeline::new(&model, PipelineSettings::default()).unwrap();
    let mut windows = Vec::new();
    let ticks = pipeline
        .run_offline(&samples, |report| {
            if let Some(span) = report.window.clone() {
                windows.push(span);
            }
        })
        .unwrap();

    assert_eq!(ticks, 37);
    assert_eq!(windows.len(), 37);
    assert!(windows.iter().all(|w| w.end - w.start == 250));
    assert_eq!(windows.last().map(|w| w.end), Some(2500));
}

#[test]
fn test_held_out_accuracy() {
    let model = trained_model(21, 10);
    assert!(model.summary.cross_validation_accuracy.is_some());

    let protocol = TrialProtocol { trials_per_class: 5, ..TrialProtocol::default() };
    let held_out = SyntheticEeg::new(SyntheticEegConfig::default(), 22).record(&protocol);
    let report = evaluate(&model, &held_out, PipelineSettings::default()).unwrap();

    assert!(report.scored_windows > 50, "scored {}", report.scored_windows);
    assert!(report.raw_accuracy > 0.8, "raw accuracy {}", report.raw_accuracy);
    assert!(report.flips > 0);
}

#[test]
fn test_flatline_channel_holds_state_and_warns_once() {
    let model = trained_model(31, 4);
    let mut eeg = SyntheticEeg::new(SyntheticEegConfig::default(), 32);
    let mut pipeline = Pipeline::new(&model, PipelineSettings::default()).unwrap();

    pipeline.ingest_chunk(&eeg.block(MindState::MotorImagery, 250)).unwrap();
    let first = pipeline.tick().unwrap();
    assert!(matches!(first.outcome, TickOutcome::Decided { .. }));
    let held = pipeline.control_state();

    let mut warnings = 0;
    for tick in 1..=5 {
        let mut stride = eeg.block(MindState::MotorImagery, 63);
        for sample in &mut stride {
            sample.values[2] = 0.0;
        }
        pipeline.ingest_chunk(&stride).unwrap();

        let report = pipeline.tick().unwrap();
        assert_eq!(report.control, held, "control changed on flat tick {tick}");
        match report.outcome {
            TickOutcome::Skipped { reason, consecutive, warning } => {
                assert_eq!(reason, SkipReason::DegenerateWindow { channel: 2 });
                assert_eq!(consecutive, tick);
                if let Some(warning) = warning {
                    warnings += 1;
                    assert_eq!(tick, 5);
                    assert_eq!(warning.retained, held);
                }
            }
            TickOutcome::Decided { .. } => panic!("flat tick {tick} was decided"),
        }
    }
    assert_eq!(warnings, 1);

    pipeline.ingest_chunk(&eeg.block(MindState::MotorImagery, 250)).unwrap();
    let recovered = pipeline.tick().unwrap();
    assert!(matches!(recovered.outcome, TickOutcome::Decided { .. }));
    assert_eq!(pipeline.consecutive_skipped(), 0);
}
