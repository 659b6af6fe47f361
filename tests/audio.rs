use std::error::Error;

use video_transcriber::audio::{duration_secs, read_wav_samples};
use video_transcriber::error::AudioError;

fn write_wav(path: &std::path::Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for sample in samples {
        writer.write_sample(*sample).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn read_wav_samples_normalizes_full_range() -> Result<(), Box<dyn Error>> {
    let temp_dir = tempfile::tempdir()?;
    let wav_path = temp_dir.path().join("extreme.wav");
    write_wav(&wav_path, 16_000, 1, &[i16::MAX, i16::MIN]);

    let samples = read_wav_samples(&wav_path, 16_000)?;
    assert_eq!(samples.len(), 2);

    assert_eq!(samples[0], 1.0);
    assert!(samples[1] <= -1.0);

    Ok(())
}

#[test]
fn read_wav_samples_rejects_other_sample_rates() -> Result<(), Box<dyn Error>> {
    let temp_dir = tempfile::tempdir()?;
    let wav_path = temp_dir.path().join("8k.wav");
    write_wav(&wav_path, 8_000, 1, &[0, 1, 2]);

    match read_wav_samples(&wav_path, 16_000) {
        Err(AudioError::Format(message)) => assert!(message.contains("8000 Hz")),
        other => panic!("expected a format error, got {other:?}"),
    }

    Ok(())
}

#[test]
fn read_wav_samples_rejects_stereo() -> Result<(), Box<dyn Error>> {
    let temp_dir = tempfile::tempdir()?;
    let wav_path = temp_dir.path().join("stereo.wav");
    write_wav(&wav_path, 16_000, 2, &[0, 0, 1, 1]);

    assert!(matches!(
        read_wav_samples(&wav_path, 16_000),
        Err(AudioError::Format(_))
    ));

    Ok(())
}

#[test]
fn missing_file_is_a_wav_error() {
    let result = read_wav_samples(std::path::Path::new("/nonexistent/audio.wav"), 16_000);
    assert!(matches!(result, Err(AudioError::Wav(_))));
}

#[test]
fn duration_is_samples_over_rate() {
    assert_eq!(duration_secs(32_000, 16_000), 2.0);
    assert_eq!(duration_secs(10, 0), 0.0);
}
