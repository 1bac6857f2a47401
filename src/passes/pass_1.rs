//! Pass 1: Source Separation
//!
//! Isolates the target instrument from a mono or stereo mix:
//! harmonic/percussive separation per channel, stereo difference/sum
//! blending, band-limited spectral masking with harmonic emphasis, and a
//! short time-domain cleanup before peak normalization.

use crate::audio::{corrcoef, moving_average, peak_normalize, AudioBuffer, AudioState};
use crate::config::{Config, HpssConfig, SeparationConfig};
use crate::error::{Result as TranscriptionResult, TranscriptionError};
use crate::spectral::{
    frame_energy, istft, magnitude_spectrogram, median_filter_freq, median_filter_time, stft,
    Spectrogram,
};
use log::{debug, info};
use ndarray::{Array2, Zip};

const TINY: f32 = 1e-12;

/// Wiener-style soft mask: share of `x` against `x_ref` after raising both
/// to `power`. Two vanishing inputs split evenly.
pub fn softmask(x: f32, x_ref: f32, power: f32) -> f32 {
    let z = x.max(x_ref);
    if z < TINY {
        return 0.5;
    }
    let mask = (x / z).powf(power);
    let ref_mask = (x_ref / z).powf(power);
    mask / (mask + ref_mask)
}

/// Split a spectrogram into harmonic and percussive parts.
///
/// The time-axis median keeps sustained partials, the frequency-axis
/// median keeps broadband transients. With `margin > 1` bins that
/// dominate neither side by that factor end up in neither component.
pub fn hpss(spec: &Spectrogram, config: &HpssConfig) -> (Spectrogram, Spectrogram) {
    let mag = magnitude_spectrogram(spec);
    let harmonic_floor = median_filter_time(&mag, config.harmonic_kernel);
    let percussive_floor = median_filter_freq(&mag, config.percussive_kernel);

    let mut harmonic = spec.s.clone();
    let mut percussive = spec.s.clone();
    Zip::from(&mut harmonic)
        .and(&mut percussive)
        .and(&harmonic_floor)
        .and(&percussive_floor)
        .for_each(|h, p, &hf, &pf| {
            *h *= softmask(hf, config.margin * pf, config.power);
            *p *= softmask(pf, config.margin * hf, config.power);
        });

    (spec.with_data(harmonic), spec.with_data(percussive))
}

/// Harmonic component of one channel, back in the time domain
pub fn harmonic_component(
    samples: &[f32],
    sample_rate: u32,
    config: &HpssConfig,
) -> TranscriptionResult<Vec<f32>> {
    let spec = stft(samples, config.n_fft, config.hop_length, sample_rate)?;
    let (harmonic, _percussive) = hpss(&spec, config);

    let total: f32 = frame_energy(&magnitude_spectrogram(&spec)).iter().sum();
    if total > 0.0 {
        let kept: f32 = frame_energy(&magnitude_spectrogram(&harmonic)).iter().sum();
        debug!("  HPSS kept {:.1}% of energy as harmonic", 100.0 * kept / total);
    }

    Ok(istft(&harmonic))
}

/// Weighted blend of the channel difference and the channel average.
/// Content identical in both channels cancels in the difference.
pub fn blend_stereo(left: &[f32], right: &[f32], config: &SeparationConfig) -> Vec<f32> {
    left.iter()
        .zip(right)
        .map(|(&l, &r)| config.difference_weight * (l - r) + config.sum_weight * (l + r) / 2.0)
        .collect()
}

/// Static per-bin gain: out-of-range bins and the suppression band are
/// attenuated, everything else passes.
pub fn band_gains(freqs: &[f32], config: &SeparationConfig) -> Vec<f32> {
    let [range_lo, range_hi] = config.instrument_range_hz;
    let [band_lo, band_hi] = config.suppression_band_hz;
    freqs
        .iter()
        .map(|&f| {
            if f < range_lo || f > range_hi {
                config.out_of_range_gain
            } else if f >= band_lo && f <= band_hi {
                config.suppression_gain
            } else {
                1.0
            }
        })
        .collect()
}

/// Per-cell gain boosting bins whose 2nd, 3rd or 4th multiple carries
/// more than `harmonic_ratio_threshold` of the bin's own energy.
pub fn harmonic_emphasis(mag: &Array2<f32>, config: &SeparationConfig) -> Array2<f32> {
    let (n_bins, n_frames) = mag.dim();
    let mut gains = Array2::<f32>::ones((n_bins, n_frames));

    for t in 0..n_frames {
        for i in 1..n_bins.saturating_sub(1) {
            let fundamental = mag[[i, t]];
            if fundamental <= TINY {
                continue;
            }
            let threshold = config.harmonic_ratio_threshold * fundamental * fundamental;
            let consistent = (2..=4)
                .map(|h| i * h)
                .filter(|&idx| idx < n_bins)
                .any(|idx| mag[[idx, t]].powi(2) > threshold);
            if consistent {
                gains[[i, t]] = config.harmonic_gain;
            }
        }
    }

    gains
}

/// Suppression first, then harmonic emphasis on the suppressed spectrum
pub fn apply_spectral_mask(spec: &Spectrogram, config: &SeparationConfig) -> Spectrogram {
    let gains = band_gains(&spec.freqs(), config);

    let mut filtered = spec.s.clone();
    for (bin, mut row) in filtered.outer_iter_mut().enumerate() {
        row.mapv_inplace(|c| c * gains[bin]);
    }

    let emphasis = harmonic_emphasis(&filtered.map(|c| c.norm()), config);
    Zip::from(&mut filtered)
        .and(&emphasis)
        .for_each(|c, &g| *c *= g);

    spec.with_data(filtered)
}

/// Blend in a short moving average, then normalize the peak to 1.0
pub fn time_domain_cleanup(samples: &[f32], sample_rate: u32, config: &SeparationConfig) -> Vec<f32> {
    let window = (sample_rate as f32 * config.smoothing_ms / 1000.0) as usize;
    let cleaned: Vec<f32> = if window > 1 {
        let smoothed = moving_average(samples, window);
        samples
            .iter()
            .zip(&smoothed)
            .map(|(&x, &s)| (1.0 - config.smoothing_mix) * x + config.smoothing_mix * s)
            .collect()
    } else {
        samples.to_vec()
    };
    peak_normalize(&cleaned)
}

/// Produce a mono, peak-normalized estimate of the target instrument
pub fn separate(buffer: &AudioBuffer, config: &Config) -> TranscriptionResult<AudioBuffer> {
    if buffer.is_empty() {
        return Err(TranscriptionError::EmptyInput(
            "source buffer has zero samples".to_string(),
        ));
    }
    let sr = buffer.sample_rate();

    let blended = if buffer.n_channels() == 2 {
        debug!(
            "  Stereo input, channel correlation {:.3}",
            corrcoef(buffer.channel(0), buffer.channel(1))
        );
        let left = harmonic_component(buffer.channel(0), sr, &config.hpss)?;
        let right = harmonic_component(buffer.channel(1), sr, &config.hpss)?;
        blend_stereo(&left, &right, &config.separation)
    } else {
        harmonic_component(buffer.channel(0), sr, &config.hpss)?
    };

    let spec = stft(
        &blended,
        config.stft.frame_length,
        config.stft.hop_length,
        sr,
    )?;
    let masked = apply_spectral_mask(&spec, &config.separation);
    let filtered = istft(&masked);

    let isolated = time_domain_cleanup(&filtered, sr, &config.separation);
    AudioBuffer::mono(isolated, sr)
}

pub fn run(state: &mut AudioState, config: &Config) -> TranscriptionResult<()> {
    info!("Pass 1: Source Separation");

    let prepared = state.prepared.as_ref().ok_or_else(|| {
        TranscriptionError::InvalidParameters("Pass 0 must run before Pass 1".to_string())
    })?;

    info!(
        "  {} path, HPSS margin {:.1}",
        if prepared.n_channels() == 2 { "Stereo" } else { "Mono" },
        config.hpss.margin
    );
    let isolated = separate(prepared, config)?;
    debug!("  Isolated {} samples", isolated.len());
    state.isolated = Some(isolated);

    info!("  ✓ Pass 1 complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmask() {
        assert!((softmask(1.0, 1.0, 2.0) - 0.5).abs() < 1e-6);
        assert!(softmask(10.0, 1.0, 2.0) > 0.98);
        assert!(softmask(1.0, 10.0, 2.0) < 0.02);
        assert_eq!(softmask(0.0, 0.0, 2.0), 0.5);
    }

    #[test]
    fn test_band_gains() {
        let config = SeparationConfig::default();
        let gains = band_gains(&[10.0, 100.0, 300.0, 440.0, 5000.0], &config);
        assert_eq!(gains, vec![0.1, 0.05, 0.05, 1.0, 0.1]);
    }

    #[test]
    fn test_blend_cancels_centered_content() {
        let config = SeparationConfig::default();
        let center = vec![0.5, -0.5, 0.25];
        let blended = blend_stereo(&center, &center, &config);
        // Only the 20% sum share survives
        for (b, c) in blended.iter().zip(&center) {
            assert!((b - 0.2 * c).abs() < 1e-6);
        }

        let panned = blend_stereo(&[1.0], &[0.0], &config);
        assert!((panned[0] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_harmonic_emphasis() {
        let config = SeparationConfig::default();
        let mut mag = Array2::<f32>::zeros((16, 1));
        mag[[3, 0]] = 1.0;
        mag[[6, 0]] = 0.6; // 2nd harmonic of bin 3, energy ratio 0.36
        mag[[7, 0]] = 1.0;
        mag[[14, 0]] = 0.5; // 2nd harmonic of bin 7, energy ratio 0.25
        mag[[5, 0]] = 1.0; // no partials above it

        let gains = harmonic_emphasis(&mag, &config);
        assert_eq!(gains[[3, 0]], 1.2);
        assert_eq!(gains[[7, 0]], 1.0);
        assert_eq!(gains[[5, 0]], 1.0);
        assert_eq!(gains[[6, 0]], 1.0);
        assert_eq!(gains[[0, 0]], 1.0);
    }

    #[test]
    fn test_emphasis_sees_suppressed_spectrum() {
        use rustfft::num_complex::Complex32;

        // 32-point frames at 16 kHz: bin k sits at 500 * k Hz
        let config = SeparationConfig {
            suppression_band_hz: [900.0, 1100.0],
            ..SeparationConfig::default()
        };
        let mut s = Array2::<Complex32>::zeros((17, 1));
        s[[2, 0]] = Complex32::new(1.0, 0.0);
        s[[4, 0]] = Complex32::new(0.1, 0.0);
        let spec = Spectrogram {
            s,
            frame_length: 32,
            hop_length: 8,
            sample_rate: 16000,
            signal_len: 32,
        };

        // Unsuppressed, the 2 kHz partial is far too weak to count
        let raw = harmonic_emphasis(&magnitude_spectrogram(&spec), &config);
        assert_eq!(raw[[2, 0]], 1.0);

        // Once the 1 kHz bin is cut to 0.05 the same partial dominates it
        let masked = apply_spectral_mask(&spec, &config);
        assert!((masked.s[[2, 0]].re - 0.05 * 1.2).abs() < 1e-6);
        assert!((masked.s[[4, 0]].re - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_cleanup_silence_stays_silent() {
        let config = SeparationConfig::default();
        let out = time_domain_cleanup(&[0.0; 1000], 16000, &config);
        assert!(out.iter().all(|&x| x == 0.0));
    }
}
