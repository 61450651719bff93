//! WAV file extractor.
//!
//! Seeks straight to the requested window instead of decoding the whole
//! recording, then downmixes to mono and resamples to 16kHz.

use crate::audio::extractor::{AudioExtractor, AudioWindow};
use crate::defaults::SAMPLE_RATE;
use crate::error::{DiaristError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

type Reader = hound::WavReader<BufReader<File>>;

/// Extractor for WAV recordings on the local filesystem.
#[derive(Debug, Clone, Copy)]
pub struct WavExtractor {
    target_rate: u32,
}

impl WavExtractor {
    pub fn new() -> Self {
        Self {
            target_rate: SAMPLE_RATE,
        }
    }

    pub fn with_target_rate(mut self, target_rate: u32) -> Self {
        self.target_rate = target_rate;
        self
    }

    fn open(audio_ref: &Path) -> Result<Reader> {
        hound::WavReader::open(audio_ref).map_err(|e| DiaristError::Extraction {
            message: format!("Failed to parse WAV file {}: {}", audio_ref.display(), e),
        })
    }
}

impl Default for WavExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioExtractor for WavExtractor {
    fn probe_duration(&self, audio_ref: &Path) -> Result<f64> {
        let reader = Self::open(audio_ref)?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(DiaristError::Extraction {
                message: format!("{} declares a zero sample rate", audio_ref.display()),
            });
        }
        Ok(reader.duration() as f64 / spec.sample_rate as f64)
    }

    fn extract_window(
        &self,
        audio_ref: &Path,
        start_time: f64,
        end_time: f64,
    ) -> Result<AudioWindow> {
        if !(start_time >= 0.0 && end_time > start_time) {
            return Err(DiaristError::Extraction {
                message: format!("invalid window [{start_time}, {end_time})"),
            });
        }

        let mut reader = Self::open(audio_ref)?;
        let spec = reader.spec();
        let rate = spec.sample_rate as f64;
        let total_frames = reader.duration();
        let start_frame = ((start_time * rate).floor() as u32).min(total_frames);
        let end_frame = ((end_time * rate).ceil() as u32).min(total_frames);

        reader
            .seek(start_frame)
            .map_err(|e| DiaristError::Extraction {
                message: format!("Failed to seek to {start_time}s: {e}"),
            })?;

        let wanted = (end_frame - start_frame) as usize * spec.channels as usize;
        let raw = read_samples(&mut reader, spec, wanted).map_err(|e| DiaristError::Extraction {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let mono = downmix(&raw, spec.channels);
        let samples = resample(&mono, spec.sample_rate, self.target_rate);

        Ok(AudioWindow {
            samples,
            sample_rate: self.target_rate,
            start_time,
            end_time,
        })
    }
}

fn read_samples(
    reader: &mut Reader,
    spec: hound::WavSpec,
    count: usize,
) -> std::result::Result<Vec<i16>, hound::Error> {
    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .take(count)
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect(),
        (hound::SampleFormat::Int, 16) => reader.samples::<i16>().take(count).collect(),
        (hound::SampleFormat::Int, bits) => reader
            .samples::<i32>()
            .take(count)
            .map(|s| s.map(|v| scale_to_i16(v, bits)))
            .collect(),
    }
}

fn scale_to_i16(value: i32, bits: u16) -> i16 {
    if bits > 16 {
        (value >> (bits - 16)) as i16
    } else {
        (value << (16 - bits)) as i16
    }
}

/// Average interleaved channels into mono.
fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(dir: &TempDir, name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn probe_reports_duration_in_seconds() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "two_seconds.wav", 16000, 1, &vec![0i16; 32000]);

        let duration = WavExtractor::new().probe_duration(&path).unwrap();
        assert!((duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn probe_empty_wav_is_zero() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "empty.wav", 16000, 1, &[]);
        assert_eq!(WavExtractor::new().probe_duration(&path).unwrap(), 0.0);
    }

    #[test]
    fn probe_missing_file_fails() {
        let result = WavExtractor::new().probe_duration(Path::new("/nonexistent/diarist.wav"));
        match result {
            Err(DiaristError::Extraction { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            other => panic!("Expected Extraction error, got {other:?}"),
        }
    }

    #[test]
    fn extract_window_reads_only_requested_range() {
        let dir = TempDir::new().unwrap();
        // One second of 0s followed by one second of 1000s
        let mut samples = vec![0i16; 16000];
        samples.extend(vec![1000i16; 16000]);
        let path = write_wav(&dir, "steps.wav", 16000, 1, &samples);

        let window = WavExtractor::new().extract_window(&path, 1.0, 2.0).unwrap();
        assert_eq!(window.samples.len(), 16000);
        assert!(window.samples.iter().all(|&s| s == 1000));
        assert_eq!(window.sample_rate, 16000);
    }

    #[test]
    fn extract_window_clamps_past_end() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "short.wav", 16000, 1, &vec![5i16; 8000]);

        let window = WavExtractor::new().extract_window(&path, 0.0, 30.0).unwrap();
        assert_eq!(window.samples.len(), 8000);
    }

    #[test]
    fn extract_window_downmixes_stereo() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "stereo.wav", 16000, 2, &[100, 200, 300, 400]);

        let window = WavExtractor::new().extract_window(&path, 0.0, 1.0).unwrap();
        assert_eq!(window.samples, vec![150, 350]);
    }

    #[test]
    fn extract_window_resamples_to_16khz() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "48k.wav", 48000, 1, &vec![1000i16; 48000]);

        let window = WavExtractor::new().extract_window(&path, 0.0, 1.0).unwrap();
        assert!(window.samples.len() >= 15900 && window.samples.len() <= 16100);
        assert!(window.samples.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn extract_window_rejects_inverted_range() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "a.wav", 16000, 1, &[0i16; 100]);
        assert!(WavExtractor::new().extract_window(&path, 2.0, 1.0).is_err());
    }

    #[test]
    fn scale_to_i16_handles_other_bit_depths() {
        assert_eq!(scale_to_i16(0x7f_ffff, 24), i16::MAX);
        assert_eq!(scale_to_i16(127, 8), 127 << 8);
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300, 400, 500];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let resampled = resample(&[0i16, 1000, 2000], 8000, 16000);
        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert!(resampled[1] > 0 && resampled[1] < 1000);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 16000, 8000).is_empty());
        assert_eq!(resample(&[100i16], 16000, 8000), vec![100]);
    }
}
