//! Async session behavior against real and scripted sources

use std::time::Duration;

use gravity_bci_core::{BciConfig, MindState, Model, PipelineError, Sample};
use gravity_bci_native::bridge::{SampleSource, SourceError, SourceRead, SourceResult};
use gravity_bci_native::{
    ReplaySource, Session, SessionError, SessionEvent, SyntheticEeg, SyntheticEegConfig, SyntheticSource,
    Trainer, TrialProtocol,
};

fn trained_model(seed: u64) -> Model {
    let protocol = TrialProtocol { trials_per_class: 4, ..TrialProtocol::default() };
    let recording = SyntheticEeg::new(SyntheticEegConfig::default(), seed).record(&protocol);
    Trainer::new(BciConfig::default()).unwrap().fit(&recording).unwrap()
}

/// Sends a few chunks, then fails or goes silent.
struct ScriptedSource {
    eeg: SyntheticEeg,
    chunks_left: usize,
    then_disconnect: bool,
}

impl SampleSource for ScriptedSource {
    fn channel_count(&self) -> usize {
        self.eeg.channel_labels().len()
    }

    fn channel_labels(&self) -> Option<Vec<String>> {
        Some(self.eeg.channel_labels().to_vec())
    }

    fn sample_rate_hz(&self) -> f64 {
        self.eeg.sample_rate_hz()
    }

    fn read_chunk(&mut self, timeout: Duration) -> SourceResult<SourceRead> {
        if self.chunks_left > 0 {
            self.chunks_left -= 1;
            std::thread::sleep(Duration::from_millis(20));
            return Ok(SourceRead::Samples(self.eeg.block(MindState::Rest, 5)));
        }
        if self.then_disconnect {
            return Err(SourceError::Disconnected { reason: "amplifier unplugged".into() });
        }
        std::thread::sleep(timeout);
        Ok(SourceRead::Timeout)
    }
}

#[tokio::test]
async fn test_paced_replay_publishes_control() {
    let model = trained_model(41);
    let protocol = TrialProtocol { trials_per_class: 1, inter_trial_ms: 0, ..TrialProtocol::default() };
    let recording = SyntheticEeg::new(SyntheticEegConfig::default(), 42).record(&protocol);

    let session = Session::new(model, BciConfig::default()).unwrap();
    let mut handle = session.start(ReplaySource::from_recording(&recording).paced()).unwrap();
    let mut events = handle.take_events().unwrap();
    let mut control = handle.control();
    assert_eq!(control.current_state(), MindState::Rest);

    let watcher = tokio::spawn(async move {
        let mut wakeups = 0u64;
        while control.changed().await.is_some() {
            wakeups += 1;
        }
        wakeups
    });

    let summary = handle.join().await.unwrap();
    // 6 s of data at a 250 ms stride
    assert!(summary.ticks >= 12 && summary.ticks <= 30, "ticks {}", summary.ticks);
    assert!(summary.decided > 0);

    // notified on flips only, never once per tick
    let wakeups = watcher.await.unwrap();
    assert!(wakeups <= summary.flips, "{wakeups} wakeups for {} flips", summary.flips);
    assert!(summary.flips < summary.ticks);

    let mut ended = false;
    while let Ok(event) = events.try_recv() {
        ended |= event == SessionEvent::SourceEnded;
    }
    assert!(ended);
}

#[tokio::test]
async fn test_stop_between_ticks() {
    let model = trained_model(43);
    let source = SyntheticSource::new(SyntheticEeg::new(SyntheticEegConfig::default(), 44), 2000);

    let handle = Session::new(model, BciConfig::default()).unwrap().start(source).unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!handle.is_finished());

    let summary = tokio::time::timeout(Duration::from_secs(3), handle.shutdown()).await.unwrap().unwrap();
    assert!(summary.ticks >= 1 && summary.ticks <= 4, "ticks {}", summary.ticks);
}

#[tokio::test]
async fn test_disconnect_is_fatal() {
    let model = trained_model(45);
    let source = ScriptedSource {
        eeg: SyntheticEeg::new(SyntheticEegConfig::default(), 46),
        chunks_left: 3,
        then_disconnect: true,
    };

    let mut handle = Session::new(model, BciConfig::default()).unwrap().start(source).unwrap();
    let mut events = handle.take_events().unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle.join()).await.unwrap();

    assert!(matches!(
        result,
        Err(SessionError::Pipeline(PipelineError::SourceDisconnected { ref reason })) if reason.contains("unplugged")
    ));
    let mut disconnected = false;
    while let Ok(event) = events.try_recv() {
        disconnected |= matches!(event, SessionEvent::SourceDisconnected { .. });
    }
    assert!(disconnected);
}

#[tokio::test]
async fn test_long_silence_is_treated_as_disconnect() {
    let model = trained_model(47);
    let config = BciConfig { acquisition_timeout_ms: 100, max_source_gap_ms: 400, ..BciConfig::default() };
    let source = ScriptedSource {
        eeg: SyntheticEeg::new(SyntheticEegConfig::default(), 48),
        chunks_left: 2,
        then_disconnect: false,
    };

    let mut handle = Session::new(model, config).unwrap().start(source).unwrap();
    let mut events = handle.take_events().unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle.join()).await.unwrap();

    assert!(matches!(result, Err(SessionError::Pipeline(PipelineError::SourceDisconnected { .. }))));
    let mut stalled = false;
    while let Ok(event) = events.try_recv() {
        stalled |= matches!(event, SessionEvent::SourceStalled { .. });
    }
    assert!(stalled);
}

#[tokio::test]
async fn test_wrong_montage_fails_at_start() {
    let model = trained_model(49);
    let labels: Vec<String> = ["C3", "C4", "Cz", "Pz"].iter().map(|s| (*s).to_string()).collect();
    let samples = vec![Sample::new(0.0, vec![0.0; 4]); 10];
    let source = ReplaySource::new(labels, 250.0, samples);

    let result = Session::new(model, BciConfig::default()).unwrap().start(source);
    assert!(matches!(result, Err(PipelineError::ModelIncompatible { .. })));
}
