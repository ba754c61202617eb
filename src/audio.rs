use crate::error::{Result, SessionError};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

/// Decoded mono samples at a known rate.
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Play length from the WAV header alone.
pub fn wav_duration(path: &Path) -> Result<Duration> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| SessionError::Playback(format!("unreadable WAV '{}': {}", path.display(), e)))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(SessionError::Playback("WAV declares 0 Hz".into()));
    }
    let frames = reader.duration() as u64;
    Ok(Duration::from_micros(frames * 1_000_000 / spec.sample_rate as u64))
}

/// Decode a WAV file to mono f32, downmixing if needed.
#[cfg_attr(not(feature = "audio-io"), allow(dead_code))]
pub fn decode_wav(path: &Path) -> Result<DecodedClip> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| SessionError::Playback(format!("unreadable WAV '{}': {}", path.display(), e)))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SessionError::Playback(format!("bad WAV samples: {}", e)))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| SessionError::Playback(format!("bad WAV samples: {}", e)))?
        }
    };

    let samples = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        interleaved
    };

    Ok(DecodedClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// 16-bit mono WAV file in memory, the shape the backend's speech-to-text
/// expects for captured audio.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SessionError::Capture(format!("Failed to start WAV: {}", e)))?;
        for &s in samples {
            let clamped = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(clamped)
                .map_err(|e| SessionError::Capture(format!("Failed to write WAV: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| SessionError::Capture(format!("Failed to finish WAV: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

#[derive(Default)]
pub struct ResamplerState {
    t: f64,
    last_sample: f32,
    has_last: bool,
}

/// Streaming linear resampler; `state` carries the fractional position across
/// chunks.
#[cfg_attr(not(feature = "audio-io"), allow(dead_code))]
pub fn resample_linear(
    samples: &[f32],
    input_rate: u32,
    target_rate: u32,
    state: &mut ResamplerState,
) -> Vec<f32> {
    if samples.is_empty() || input_rate == target_rate {
        return samples.to_vec();
    }
    let step = input_rate as f64 / target_rate as f64;
    let mut out = Vec::with_capacity(((samples.len() as f64 / step) + 2.0) as usize);

    let mut buf = Vec::with_capacity(samples.len() + 1);
    if state.has_last {
        buf.push(state.last_sample);
    }
    buf.extend_from_slice(samples);

    let mut i: usize = 0;
    let mut t = state.t;
    while i + 1 < buf.len() {
        let s0 = buf[i];
        let s1 = buf[i + 1];
        out.push(s0 + (s1 - s0) * t as f32);
        t += step;
        while t >= 1.0 {
            t -= 1.0;
            i += 1;
            if i + 1 >= buf.len() {
                break;
            }
        }
    }

    state.t = t;
    if let Some(last) = buf.last() {
        state.last_sample = *last;
        state.has_last = true;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_wav_reports_its_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples = vec![0.25f32; 8000];
        std::fs::write(&path, encode_wav(&samples, 16000).unwrap()).unwrap();

        assert_eq!(wav_duration(&path).unwrap(), Duration::from_millis(500));
        let decoded = decode_wav(&path).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples.len(), 8000);
        assert!((decoded.samples[0] - 0.25).abs() < 0.001);
    }

    #[test]
    fn non_wav_is_a_playback_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"definitely not riff").unwrap();
        assert!(matches!(wav_duration(&path), Err(SessionError::Playback(_))));
    }

    #[test]
    fn resample_halves_sample_count() {
        let mut state = ResamplerState::default();
        let input: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let out = resample_linear(&input, 48000, 24000, &mut state);
        assert!((out.len() as i64 - 240).abs() <= 1);
        assert!(out.windows(2).all(|w| w[1] >= w[0]));
    }
}
