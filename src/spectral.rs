//! Spectral processing utilities (STFT, inverse STFT, median filtering)

use crate::audio::AudioBuffer;
use crate::config::validate_frame_params;
use crate::error::{Result as TranscriptionResult, TranscriptionError};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use rustfft::{num_complex::Complex32, FftPlanner};

/// Complex spectrogram of a single channel.
///
/// `s` is laid out `[bin, frame]`. Frames are centered: frame `t` is
/// centered on sample `t * hop_length` of the original signal, which is
/// zero-padded by `frame_length / 2` on both sides.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub s: Array2<Complex32>,
    pub frame_length: usize,
    pub hop_length: usize,
    pub sample_rate: u32,
    /// Length of the analyzed signal, needed to crop the inverse
    pub signal_len: usize,
}

/// One analysis frame: bin values in increasing frequency order
#[derive(Debug, Clone)]
pub struct SpectralFrame {
    pub index: usize,
    pub time_sec: f32,
    pub bins: Vec<Complex32>,
}

impl Spectrogram {
    pub fn n_bins(&self) -> usize {
        self.s.shape()[0]
    }

    pub fn n_frames(&self) -> usize {
        self.s.shape()[1]
    }

    /// Center frequency of every bin
    pub fn freqs(&self) -> Vec<f32> {
        bin_frequencies(self.sample_rate, self.frame_length)
    }

    /// Center time of every frame
    pub fn times(&self) -> Vec<f32> {
        (0..self.n_frames())
            .map(|t| (t * self.hop_length) as f32 / self.sample_rate as f32)
            .collect()
    }

    pub fn frame(&self, index: usize) -> SpectralFrame {
        SpectralFrame {
            index,
            time_sec: (index * self.hop_length) as f32 / self.sample_rate as f32,
            bins: self.s.column(index).to_vec(),
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = SpectralFrame> + '_ {
        (0..self.n_frames()).map(move |t| self.frame(t))
    }

    /// Same frame layout with a different complex matrix
    pub fn with_data(&self, s: Array2<Complex32>) -> Self {
        Self {
            s,
            frame_length: self.frame_length,
            hop_length: self.hop_length,
            sample_rate: self.sample_rate,
            signal_len: self.signal_len,
        }
    }
}

/// Bin center frequencies for a real FFT of `frame_length` points
pub fn bin_frequencies(sample_rate: u32, frame_length: usize) -> Vec<f32> {
    (0..frame_length / 2 + 1)
        .map(|i| i as f32 * sample_rate as f32 / frame_length as f32)
        .collect()
}

/// Analysis and synthesis window for a given hop.
///
/// Raised-sine tapers of length `min(frame - hop, frame / 2)` at both
/// ends and a flat top in between, sampled at half-sample offsets. For
/// `hop <= frame / 2` this is the periodic Hann window; for `hop == frame`
/// it is rectangular. Overlapping frames keep the squared-window sum at
/// or above 0.25, so the inverse never divides by a vanishing weight.
pub fn stft_window(frame_length: usize, hop_length: usize) -> Vec<f32> {
    let taper = frame_length
        .saturating_sub(hop_length)
        .min(frame_length / 2);
    let rise = |j: usize| {
        (std::f32::consts::PI * (j as f32 + 0.5) / (2 * taper) as f32)
            .sin()
            .powi(2)
    };
    (0..frame_length)
        .map(|i| {
            if i < taper {
                rise(i)
            } else if i >= frame_length - taper {
                rise(frame_length - 1 - i)
            } else {
                1.0
            }
        })
        .collect()
}

/// Compute STFT of a single channel
pub fn stft(
    y: &[f32],
    frame_length: usize,
    hop_length: usize,
    sample_rate: u32,
) -> TranscriptionResult<Spectrogram> {
    validate_frame_params(frame_length, hop_length)?;
    if y.is_empty() {
        return Err(TranscriptionError::InvalidParameters(
            "cannot transform an empty signal".to_string(),
        ));
    }

    let pad = frame_length / 2;
    let mut padded = vec![0.0f32; y.len() + 2 * pad];
    padded[pad..pad + y.len()].copy_from_slice(y);

    // Last frame center lies at or past the final sample
    let n_frames = 1 + y.len().div_ceil(hop_length);
    let n_bins = frame_length / 2 + 1;
    let window = stft_window(frame_length, hop_length);
    let fft = FftPlanner::<f32>::new().plan_fft_forward(frame_length);

    let columns: Vec<Vec<Complex32>> = (0..n_frames)
        .into_par_iter()
        .map(|frame_idx| {
            let start = frame_idx * hop_length;
            let mut frame: Vec<Complex32> = (0..frame_length)
                .map(|i| {
                    let sample = padded.get(start + i).copied().unwrap_or(0.0);
                    Complex32::new(sample * window[i], 0.0)
                })
                .collect();
            fft.process(&mut frame);
            frame.truncate(n_bins);
            frame
        })
        .collect();

    let mut s = Array2::<Complex32>::zeros((n_bins, n_frames));
    for (frame_idx, column) in columns.into_iter().enumerate() {
        for (bin, value) in column.into_iter().enumerate() {
            s[[bin, frame_idx]] = value;
        }
    }

    Ok(Spectrogram {
        s,
        frame_length,
        hop_length,
        sample_rate,
        signal_len: y.len(),
    })
}

/// Inverse STFT by weighted overlap-add
pub fn istft(spec: &Spectrogram) -> Vec<f32> {
    let n_fft = spec.frame_length;
    let hop_length = spec.hop_length;
    let n_bins = spec.n_bins();
    let n_frames = spec.n_frames();
    let pad = n_fft / 2;

    let window = stft_window(n_fft, hop_length);
    let ifft = FftPlanner::<f32>::new().plan_fft_inverse(n_fft);

    let frames: Vec<Vec<f32>> = (0..n_frames)
        .into_par_iter()
        .map(|frame_idx| {
            let mut frame = vec![Complex32::new(0.0, 0.0); n_fft];
            for bin in 0..n_bins {
                frame[bin] = spec.s[[bin, frame_idx]];
            }
            // Rebuild negative frequencies from conjugate symmetry
            for bin in n_bins..n_fft {
                frame[bin] = frame[n_fft - bin].conj();
            }
            ifft.process(&mut frame);
            frame
                .iter()
                .zip(&window)
                .map(|(c, &w)| c.re / n_fft as f32 * w)
                .collect()
        })
        .collect();

    // Sequential overlap-add keeps the summation order fixed
    let total_len = (n_frames - 1) * hop_length + n_fft;
    let mut y = vec![0.0f32; total_len];
    let mut window_sum = vec![0.0f32; total_len];
    for (frame_idx, frame) in frames.iter().enumerate() {
        let start = frame_idx * hop_length;
        for i in 0..n_fft {
            y[start + i] += frame[i];
            window_sum[start + i] += window[i] * window[i];
        }
    }

    (0..spec.signal_len)
        .map(|i| {
            let idx = i + pad;
            if idx < total_len && window_sum[idx] > f32::MIN_POSITIVE {
                y[idx] / window_sum[idx]
            } else {
                0.0
            }
        })
        .collect()
}

/// Forward transform of every channel of a buffer
pub fn forward(
    buffer: &AudioBuffer,
    frame_length: usize,
    hop_length: usize,
) -> TranscriptionResult<Vec<Spectrogram>> {
    buffer
        .channels()
        .iter()
        .map(|channel| stft(channel, frame_length, hop_length, buffer.sample_rate()))
        .collect()
}

/// Inverse transform, one output channel per spectrogram
pub fn inverse(spectrograms: &[Spectrogram]) -> TranscriptionResult<AudioBuffer> {
    let first = spectrograms.first().ok_or_else(|| {
        TranscriptionError::InvalidParameters("no spectrogram to invert".to_string())
    })?;
    let channels = spectrograms.iter().map(istft).collect();
    AudioBuffer::new(channels, first.sample_rate)
}

/// Compute magnitude spectrogram
pub fn magnitude_spectrogram(spec: &Spectrogram) -> Array2<f32> {
    spec.s.map(|c| c.norm())
}

fn median_of(values: &mut [f32]) -> f32 {
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *median
}

/// Median filter each bin along time (horizontal); suppresses transients
pub fn median_filter_time(mag: &Array2<f32>, kernel_size: usize) -> Array2<f32> {
    let (n_freq, n_time) = mag.dim();
    let half_kernel = kernel_size / 2;

    let rows: Vec<Vec<f32>> = (0..n_freq)
        .into_par_iter()
        .map(|f| {
            let row = mag.row(f);
            let mut scratch = Vec::with_capacity(kernel_size);
            (0..n_time)
                .map(|t| {
                    let start = t.saturating_sub(half_kernel);
                    let end = (t + half_kernel + 1).min(n_time);
                    scratch.clear();
                    scratch.extend(row.iter().skip(start).take(end - start));
                    median_of(&mut scratch)
                })
                .collect()
        })
        .collect();

    let mut out = Array2::<f32>::zeros((n_freq, n_time));
    for (f, row) in rows.into_iter().enumerate() {
        for (t, value) in row.into_iter().enumerate() {
            out[[f, t]] = value;
        }
    }
    out
}

/// Median filter each frame along frequency (vertical); suppresses tones
pub fn median_filter_freq(mag: &Array2<f32>, kernel_size: usize) -> Array2<f32> {
    let transposed = mag.t().to_owned();
    let filtered = median_filter_time(&transposed, kernel_size);
    filtered.reversed_axes()
}

/// Total energy per frame
pub fn frame_energy(mag: &Array2<f32>) -> Vec<f32> {
    mag.axis_iter(Axis(1))
        .map(|col| col.iter().map(|&m| m * m).sum())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_frequencies_monotonic() {
        let freqs = bin_frequencies(16000, 2048);
        assert_eq!(freqs.len(), 1025);
        assert_eq!(freqs[0], 0.0);
        assert!((freqs[1024] - 8000.0).abs() < 1e-3);
        assert!(freqs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_window_strictly_positive() {
        let w = stft_window(16, 4);
        assert!(w.iter().all(|&x| x > 0.0));
        assert!((w[7] - w[8]).abs() < 1e-6);
    }

    #[test]
    fn test_window_matches_hann_for_half_hop() {
        let w = stft_window(16, 8);
        for (i, &x) in w.iter().enumerate() {
            let hann =
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * (i as f32 + 0.5) / 16.0).cos());
            assert!((x - hann).abs() < 1e-6, "index {}: {} vs {}", i, x, hann);
        }
    }

    #[test]
    fn test_window_coverage_bounded_below() {
        for &(frame, hop) in &[(16, 4), (16, 8), (16, 12), (16, 15), (16, 16), (15, 10)] {
            let w = stft_window(frame, hop);
            let n_frames = 8;
            let mut coverage = vec![0.0f32; (n_frames - 1) * hop + frame];
            for k in 0..n_frames {
                for (i, &x) in w.iter().enumerate() {
                    coverage[k * hop + i] += x * x;
                }
            }
            // Interior samples, away from the first and last frame edges
            let interior = &coverage[frame / 2..(n_frames - 1) * hop + frame / 2];
            let min = interior.iter().copied().fold(f32::INFINITY, f32::min);
            assert!(min >= 0.25 - 1e-6, "frame {} hop {}: min {}", frame, hop, min);
        }
    }

    #[test]
    fn test_median_filters() {
        let mut mag = Array2::<f32>::zeros((5, 7));
        // One transient frame and one sustained bin
        for f in 0..5 {
            mag[[f, 3]] = 10.0;
        }
        for t in 0..7 {
            mag[[2, t]] = 5.0;
        }

        let time_filtered = median_filter_time(&mag, 3);
        assert_eq!(time_filtered[[0, 3]], 0.0); // transient removed
        assert_eq!(time_filtered[[2, 1]], 5.0); // sustained kept

        let freq_filtered = median_filter_freq(&mag, 3);
        assert_eq!(freq_filtered[[0, 3]], 10.0); // transient kept
        assert_eq!(freq_filtered[[2, 1]], 0.0); // tone removed
    }

    #[test]
    fn test_empty_signal_rejected() {
        assert!(matches!(
            stft(&[], 2048, 512, 16000),
            Err(TranscriptionError::InvalidParameters(_))
        ));
    }
}
