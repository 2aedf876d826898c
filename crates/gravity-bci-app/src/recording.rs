//! CSV recordings in the acquisition rig's export layout
//!
//! ```text
//! Ch1,Ch2,...,ChN,Label,Timestamp
//! ```
//!
//! `Label` is 1 for motor imagery and 0 for rest. The file carries no
//! montage, so channel columns are mapped in order onto the configured
//! channel labels.

use std::path::Path;

use anyhow::{bail, Context};
use gravity_bci_core::{BciConfig, MindState, Sample};
use gravity_bci_native::LabeledRecording;
use tracing::info;

const LABEL_COLUMN: &str = "Label";
const TIMESTAMP_COLUMN: &str = "Timestamp";

fn parse_label(field: &str) -> Option<MindState> {
    let value: f64 = field.trim().parse().ok()?;
    if value == 0.0 {
        Some(MindState::Rest)
    } else if value == 1.0 {
        Some(MindState::MotorImagery)
    } else {
        None
    }
}

/// Read a labelled recording, taking montage and sample rate from `config`.
pub fn read_recording(path: &Path, config: &BciConfig) -> anyhow::Result<LabeledRecording> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let channel_columns: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| name.starts_with("Ch"))
        .map(|(i, _)| i)
        .collect();
    let label_column = headers
        .iter()
        .position(|h| h == LABEL_COLUMN)
        .with_context(|| format!("{} has no {LABEL_COLUMN} column", path.display()))?;
    let timestamp_column = headers.iter().position(|h| h == TIMESTAMP_COLUMN);

    if channel_columns.len() != config.channel_count() {
        bail!(
            "{} has {} channel columns but the configuration lists {} channels ({})",
            path.display(),
            channel_columns.len(),
            config.channel_count(),
            config.channel_labels.join(" ")
        );
    }

    let mut recording = LabeledRecording::empty(config.channel_labels.clone(), config.sample_rate_hz);
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("row {}", row + 2))?;
        let field = |i: usize| record.get(i).unwrap_or("");

        let values = channel_columns
            .iter()
            .map(|&i| field(i).trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("row {}: bad channel value", row + 2))?;
        let label = parse_label(field(label_column))
            .with_context(|| format!("row {}: label {:?} is neither 0 nor 1", row + 2, field(label_column)))?;
        #[allow(clippy::cast_precision_loss)]
        let timestamp_s = match timestamp_column {
            Some(i) => field(i).trim().parse().with_context(|| format!("row {}: bad timestamp", row + 2))?,
            None => row as f64 / config.sample_rate_hz,
        };

        recording.push(Sample::new(timestamp_s, values), label)?;
    }

    let (rest, mi) = recording.class_counts();
    info!(
        "Read {} samples ({:.1} s, {} rest / {} MI) from {}",
        recording.len(),
        recording.duration_s(),
        rest,
        mi,
        path.display()
    );
    Ok(recording)
}

/// Write a labelled recording in the export layout.
pub fn write_recording(path: &Path, recording: &LabeledRecording) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;

    let mut header: Vec<String> = (1..=recording.channel_count()).map(|i| format!("Ch{i}")).collect();
    header.push(LABEL_COLUMN.to_string());
    header.push(TIMESTAMP_COLUMN.to_string());
    writer.write_record(&header)?;

    for (sample, label) in recording.samples().iter().zip(recording.labels()) {
        let mut row: Vec<String> = sample.values.iter().map(ToString::to_string).collect();
        row.push(label.label().to_string());
        row.push(sample.timestamp_s.to_string());
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!("Wrote {} samples to {}", recording.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gravity-bci-app-{}-{}", std::process::id(), name))
    }

    fn two_channel_config() -> BciConfig {
        BciConfig { channel_labels: vec!["C3".into(), "C4".into()], ..BciConfig::default() }
    }

    #[test]
    fn test_reads_collector_export() {
        let path = temp_path("export.csv");
        std::fs::write(&path, "Ch1,Ch2,Label,Timestamp\n1.5,-2.0,0,10.0\n3.0,4.25,1,10.004\n").unwrap();

        let recording = read_recording(&path, &two_channel_config()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(recording.len(), 2);
        assert_eq!(recording.channel_labels(), ["C3".to_string(), "C4".to_string()]);
        assert_eq!(recording.labels(), [MindState::Rest, MindState::MotorImagery]);
        assert_eq!(recording.samples()[1].values, vec![3.0, 4.25]);
        assert!((recording.samples()[1].timestamp_s - 10.004).abs() < 1e-12);
    }

    #[test]
    fn test_write_then_read() {
        let mut original = LabeledRecording::empty(vec!["C3".into(), "C4".into()], 250.0);
        original.push(Sample::new(0.0, vec![0.5, 1.0]), MindState::MotorImagery).unwrap();
        original.push(Sample::new(0.004, vec![-0.5, 2.0]), MindState::Rest).unwrap();

        let path = temp_path("roundtrip.csv");
        write_recording(&path, &original).unwrap();
        let restored = read_recording(&path, &two_channel_config()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(restored, original);
    }

    #[test]
    fn test_channel_count_must_match_config() {
        let path = temp_path("wide.csv");
        std::fs::write(&path, "Ch1,Ch2,Ch3,Label,Timestamp\n1,2,3,0,0\n").unwrap();
        let result = read_recording(&path, &two_channel_config());
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_label_rejected() {
        assert_eq!(parse_label("1.0"), Some(MindState::MotorImagery));
        assert_eq!(parse_label(" 0 "), Some(MindState::Rest));
        assert_eq!(parse_label("2"), None);
    }
}
