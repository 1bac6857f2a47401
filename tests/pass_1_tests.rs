//! Validation tests for Pass 1: Spectral Transform and Source Separation

use piano2midi::audio::{AudioBuffer, AudioState};
use piano2midi::config::Config;
use piano2midi::passes::{pass_0, pass_1};
use piano2midi::spectral::{forward, inverse, istft, stft};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Generate a sum of sine tones with the given amplitudes
fn generate_tones(tones: &[(f32, f32)], n_samples: usize, sr: u32) -> Vec<f32> {
    (0..n_samples)
        .map(|i| {
            let t = i as f32 / sr as f32;
            tones
                .iter()
                .map(|&(freq, amp)| amp * (2.0 * PI * freq * t).sin())
                .sum()
        })
        .collect()
}

/// Magnitude of the signal's correlation with a complex tone
fn tone_level(samples: &[f32], freq: f32, sr: u32) -> f32 {
    let (mut re, mut im) = (0.0f64, 0.0f64);
    for (i, &x) in samples.iter().enumerate() {
        let phase = 2.0 * std::f64::consts::PI * freq as f64 * i as f64 / sr as f64;
        re += x as f64 * phase.cos();
        im -= x as f64 * phase.sin();
    }
    ((re * re + im * im).sqrt() / samples.len() as f64) as f32
}

fn max_abs_error(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stft_round_trip_noise() {
        let mut rng = StdRng::seed_from_u64(42);
        let y: Vec<f32> = (0..20_000).map(|_| rng.gen_range(-1.0..1.0)).collect();

        for &(frame, hop) in &[
            (2048, 512),
            (2048, 1536),
            (2048, 2048),
            (1024, 1000),
            (1024, 1024),
            (512, 128),
        ] {
            let spec = stft(&y, frame, hop, 16000).unwrap();
            let y_hat = istft(&spec);
            assert_eq!(y_hat.len(), y.len());
            let err = max_abs_error(&y, &y_hat);
            assert!(err < 1e-4, "frame {} hop {}: max error {}", frame, hop, err);
        }
    }

    #[test]
    fn test_round_trip_covers_signal_tail() {
        // Remainders past half a frame used to be left out of the last frame
        let cases = [
            (2048, 1536, 1536 * 13 + 1200),
            (1024, 1024, 1024 * 7 + 900),
            (2048, 512, 512 * 20 + 500),
        ];
        for &(frame, hop, len) in &cases {
            let y = vec![0.5f32; len];
            let spec = stft(&y, frame, hop, 16000).unwrap();
            let y_hat = istft(&spec);
            assert_eq!(y_hat.len(), len);
            let first_bad = y.iter().zip(&y_hat).position(|(a, b)| (a - b).abs() > 1e-4);
            assert_eq!(first_bad, None, "frame {} hop {} len {}", frame, hop, len);
        }
    }

    #[test]
    fn test_stft_shape_and_frame_times() {
        let y = vec![0.1f32; 16000];
        let spec = stft(&y, 2048, 512, 16000).unwrap();
        assert_eq!(spec.n_bins(), 1025);
        assert_eq!(spec.n_frames(), 1 + 16000usize.div_ceil(512));

        let times = spec.times();
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 0.032).abs() < 1e-6);
        assert!(spec.frames().all(|f| f.bins.len() == 1025));
    }

    #[test]
    fn test_short_signal_round_trip() {
        // Shorter than one frame
        let y = vec![0.25f32, -0.5, 0.75, -1.0, 0.5];
        let spec = stft(&y, 2048, 512, 16000).unwrap();
        let y_hat = istft(&spec);
        assert!(max_abs_error(&y, &y_hat) < 1e-4);
    }

    #[test]
    fn test_multichannel_round_trip() {
        let left = generate_tones(&[(440.0, 0.5)], 8000, 16000);
        let right = generate_tones(&[(330.0, 0.5)], 8000, 16000);
        let buffer = AudioBuffer::stereo(left, right, 16000).unwrap();

        let spectrograms = forward(&buffer, 2048, 512).unwrap();
        assert_eq!(spectrograms.len(), 2);
        let restored = inverse(&spectrograms).unwrap();

        assert_eq!(restored.n_channels(), 2);
        assert!(max_abs_error(buffer.channel(0), restored.channel(0)) < 1e-4);
        assert!(max_abs_error(buffer.channel(1), restored.channel(1)) < 1e-4);
    }

    #[test]
    fn test_invalid_frame_params() {
        assert!(stft(&[0.0; 100], 0, 512, 16000).is_err());
        assert!(stft(&[0.0; 100], 2048, 0, 16000).is_err());
        assert!(stft(&[0.0; 100], 512, 1024, 16000).is_err());
    }

    #[test]
    fn test_separation_is_normalized_mono() {
        let config = Config::default();
        let samples = generate_tones(&[(440.0, 0.3)], 16000, 16000);
        let mut state = AudioState::from_samples(samples, 16000).unwrap();

        pass_0::run(&mut state, &config).unwrap();
        pass_1::run(&mut state, &config).unwrap();

        let isolated = state.isolated.as_ref().unwrap();
        assert_eq!(isolated.n_channels(), 1);
        assert_eq!(isolated.len(), 16000);
        assert!((isolated.peak() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_suppression_band_attenuated() {
        let config = Config::default();
        let samples = generate_tones(&[(200.0, 0.4), (800.0, 0.4)], 16000, 16000);
        let buffer = AudioBuffer::mono(samples, 16000).unwrap();

        let isolated = pass_1::separate(&buffer, &config).unwrap();
        let low = tone_level(isolated.channel(0), 200.0, 16000);
        let high = tone_level(isolated.channel(0), 800.0, 16000);
        assert!(high > 5.0 * low, "200 Hz {} vs 800 Hz {}", low, high);
    }

    #[test]
    fn test_stereo_centered_content_reduced() {
        let config = Config::default();
        let n = 16000;
        let center = generate_tones(&[(440.0, 0.4)], n, 16000);
        let panned = generate_tones(&[(660.0, 0.4)], n, 16000);
        let left: Vec<f32> = center.iter().zip(&panned).map(|(c, p)| c + p).collect();
        let buffer = AudioBuffer::stereo(left, center, 16000).unwrap();

        let isolated = pass_1::separate(&buffer, &config).unwrap();
        let centered_level = tone_level(isolated.channel(0), 440.0, 16000);
        let panned_level = tone_level(isolated.channel(0), 660.0, 16000);
        assert!(
            panned_level > 2.0 * centered_level,
            "centered {} vs panned {}",
            centered_level,
            panned_level
        );
    }

    #[test]
    fn test_silence_separates_to_silence() {
        let config = Config::default();
        let buffer = AudioBuffer::mono(vec![0.0; 8000], 16000).unwrap();
        let isolated = pass_1::separate(&buffer, &config).unwrap();
        assert!(isolated.channel(0).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_separation_requires_preflight() {
        let config = Config::default();
        let mut state = AudioState::from_samples(vec![0.1; 100], 16000).unwrap();
        assert!(pass_1::run(&mut state, &config).is_err());
    }
}
