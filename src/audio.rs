//! Audio loading for the decode loop.
//!
//! Acquisition always leaves a mono, 16-bit PCM WAV file at the decoder's
//! sample rate; this module turns that file into normalized samples.

use std::path::Path;

use crate::error::AudioError;

/// Read WAV file samples and convert them to the format decoders consume.
///
/// # Arguments
///
/// * `wav_path` - Path to the WAV file to read
/// * `sample_rate` - The sample rate the file must have, in Hz
///
/// # Returns
///
/// Returns a vector of f32 samples normalized to the range [-1.0, 1.0].
///
/// # Errors
///
/// This function will return an error if:
/// - The file cannot be opened or read
/// - The WAV format is incorrect (not mono, 16-bit integer PCM at `sample_rate`)
///
/// # Examples
///
/// ```rust,no_run
/// use video_transcriber::audio::read_wav_samples;
/// use std::path::Path;
///
/// let samples = read_wav_samples(Path::new("audio.wav"), 16_000)?;
/// println!("Loaded {} samples", samples.len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn read_wav_samples(wav_path: &Path, sample_rate: u32) -> Result<Vec<f32>, AudioError> {
    let mut reader = hound::WavReader::open(wav_path)?;
    let spec = reader.spec();

    let expected_spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    if spec.channels != expected_spec.channels {
        return Err(AudioError::Format(format!(
            "expected {} channel, found {}",
            expected_spec.channels, spec.channels
        )));
    }

    if spec.sample_rate != expected_spec.sample_rate {
        return Err(AudioError::Format(format!(
            "expected {} Hz sample rate, found {} Hz",
            expected_spec.sample_rate, spec.sample_rate
        )));
    }

    if spec.bits_per_sample != expected_spec.bits_per_sample {
        return Err(AudioError::Format(format!(
            "expected {} bits per sample, found {}",
            expected_spec.bits_per_sample, spec.bits_per_sample
        )));
    }

    if spec.sample_format != expected_spec.sample_format {
        return Err(AudioError::Format(format!(
            "expected Int sample format, found {:?}",
            spec.sample_format
        )));
    }

    let samples: Result<Vec<f32>, _> = reader
        .samples::<i16>()
        .map(|sample| sample.map(|s| s as f32 / i16::MAX as f32))
        .collect();

    Ok(samples?)
}

/// Duration in seconds of `sample_count` samples at `sample_rate`.
pub fn duration_secs(sample_count: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    (sample_count as f64 / sample_rate as f64) as f32
}
