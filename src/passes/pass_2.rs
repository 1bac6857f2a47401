//! Pass 2: Pitch Tracking
//!
//! Probabilistic YIN. Each frame's cumulative mean normalized difference
//! is scanned for troughs; a beta-distributed set of absolute thresholds
//! and a Boltzmann prior over trough order turn those troughs into
//! candidate probabilities. The voicing probability is their total mass.
//!
//! Frames are independent, so they are evaluated in parallel and
//! collected in index order; no reduction crosses frames.

use crate::analysis::{PitchEstimate, PitchTrack};
use crate::audio::{AudioBuffer, AudioState};
use crate::config::{validate_frame_params, Config};
use crate::error::{Result as TranscriptionResult, TranscriptionError};
use log::{debug, info};
use rayon::prelude::*;

const TINY: f64 = 1e-12;

/// Resolved per-run tracker parameters
#[derive(Debug, Clone)]
pub struct YinParams {
    pub sample_rate: u32,
    pub frame_length: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub fmin: f32,
    pub fmax: f32,
    pub min_period: usize,
    pub max_period: usize,
    pub boltzmann_parameter: f32,
    pub no_trough_prob: f32,
    pub voicing_threshold: f32,
    /// Probability mass of each threshold interval
    pub beta_probs: Vec<f32>,
}

impl YinParams {
    /// Resolve periods and threshold weights for a given sample rate.
    ///
    /// The search range is the pitch range intersected with the
    /// instrument range.
    pub fn new(sample_rate: u32, config: &Config) -> TranscriptionResult<Self> {
        let frame_length = config.stft.frame_length;
        let hop_length = config.stft.hop_length;
        validate_frame_params(frame_length, hop_length)?;

        let fmin = config.pitch.fmin.max(config.separation.instrument_range_hz[0]);
        let fmax = config.pitch.fmax.min(config.separation.instrument_range_hz[1]);
        if fmin <= 0.0 || fmin >= fmax {
            return Err(TranscriptionError::InvalidParameters(format!(
                "empty pitch search range [{}, {}] Hz",
                fmin, fmax
            )));
        }

        let win_length = frame_length / 2;
        let min_period = ((sample_rate as f32 / fmax).floor() as usize).max(1);
        let max_period = ((sample_rate as f32 / fmin).ceil() as usize)
            .min(frame_length.saturating_sub(win_length + 1));
        if min_period + 1 >= max_period {
            return Err(TranscriptionError::InvalidParameters(format!(
                "frame_length {} too short for fmin {} Hz at {} Hz",
                frame_length, fmin, sample_rate
            )));
        }

        Ok(Self {
            sample_rate,
            frame_length,
            hop_length,
            win_length,
            fmin,
            fmax,
            min_period,
            max_period,
            boltzmann_parameter: config.pitch.boltzmann_parameter,
            no_trough_prob: config.pitch.no_trough_prob,
            voicing_threshold: config.pitch.voicing_threshold,
            beta_probs: beta_probabilities(
                config.pitch.n_thresholds,
                config.pitch.beta_alpha,
                config.pitch.beta_beta,
            ),
        })
    }
}

/// Regularized incomplete beta function for integer shape parameters
pub fn beta_cdf(x: f64, alpha: u32, beta: u32) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let n = alpha + beta - 1;
    let mut binom = 1.0f64; // C(n, 0)
    let mut total = 0.0;
    for j in 0..=n {
        if j > 0 {
            binom *= (n - j + 1) as f64 / j as f64;
        }
        if j >= alpha {
            total += binom * x.powi(j as i32) * (1.0 - x).powi((n - j) as i32);
        }
    }
    total.clamp(0.0, 1.0)
}

/// Mass of Beta(alpha, beta) on each of `n_thresholds` equal intervals of [0, 1]
pub fn beta_probabilities(n_thresholds: usize, alpha: u32, beta: u32) -> Vec<f32> {
    (0..n_thresholds)
        .map(|j| {
            let lo = j as f64 / n_thresholds as f64;
            let hi = (j + 1) as f64 / n_thresholds as f64;
            (beta_cdf(hi, alpha, beta) - beta_cdf(lo, alpha, beta)) as f32
        })
        .collect()
}

fn boltzmann_pmf(k: usize, lambda: f32, n: usize) -> f32 {
    let lambda = lambda as f64;
    ((1.0 - (-lambda).exp()) * (-lambda * k as f64).exp() / (1.0 - (-lambda * n as f64).exp()))
        as f32
}

/// Cumulative mean normalized difference for lags `0..=max_period`.
///
/// Compares the first `win_length` samples against their lagged copies.
/// A lag whose running sum is still zero (silence) maps to 1.0.
pub fn cumulative_mean_normalized_difference(
    frame: &[f32],
    win_length: usize,
    max_period: usize,
) -> Vec<f32> {
    let mut cmndf = vec![1.0f32; max_period + 1];
    let mut running = 0.0f64;
    for tau in 1..=max_period {
        let d: f64 = (0..win_length)
            .map(|j| {
                let diff = (frame[j] - frame[j + tau]) as f64;
                diff * diff
            })
            .sum();
        running += d;
        cmndf[tau] = if running > TINY {
            (d * tau as f64 / running) as f32
        } else {
            1.0
        };
    }
    cmndf
}

/// Sub-sample offset of a trough from a parabola through its neighbours
fn parabolic_shift(cmndf: &[f32], tau: usize) -> f32 {
    if tau == 0 || tau + 1 >= cmndf.len() {
        return 0.0;
    }
    let a = cmndf[tau + 1] + cmndf[tau - 1] - 2.0 * cmndf[tau];
    let b = (cmndf[tau + 1] - cmndf[tau - 1]) / 2.0;
    if b.abs() < a.abs() {
        -b / a
    } else {
        0.0
    }
}

/// Local minima of `cmndf` inside `[min_period, max_period]`
fn find_troughs(cmndf: &[f32], min_period: usize, max_period: usize) -> Vec<usize> {
    (min_period..=max_period)
        .filter(|&tau| {
            if tau == min_period {
                cmndf[tau] < cmndf[tau + 1]
            } else if tau == max_period {
                cmndf[tau] < cmndf[tau - 1]
            } else {
                cmndf[tau] < cmndf[tau - 1] && cmndf[tau] <= cmndf[tau + 1]
            }
        })
        .collect()
}

/// Most probable fundamental and voicing probability of one frame
pub fn estimate_frame(frame: &[f32], params: &YinParams) -> (Option<f32>, f32) {
    let cmndf = cumulative_mean_normalized_difference(frame, params.win_length, params.max_period);
    let troughs = find_troughs(&cmndf, params.min_period, params.max_period);
    if troughs.is_empty() {
        return (None, 0.0);
    }

    let n_thresholds = params.beta_probs.len();
    let heights: Vec<f32> = troughs.iter().map(|&tau| cmndf[tau]).collect();
    let mut probs = vec![0.0f32; troughs.len()];

    for (j, &beta_prob) in params.beta_probs.iter().enumerate() {
        let threshold = (j + 1) as f32 / n_thresholds as f32;
        let n_below = heights.iter().filter(|&&h| h < threshold).count();
        let mut rank = 0;
        for (k, &h) in heights.iter().enumerate() {
            if h < threshold {
                probs[k] += boltzmann_pmf(rank, params.boltzmann_parameter, n_below) * beta_prob;
                rank += 1;
            }
        }
    }

    // Thresholds below even the deepest trough still give it a small share
    let global_min = heights
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, _)| k)
        .unwrap_or(0);
    let unreached: f32 = params
        .beta_probs
        .iter()
        .enumerate()
        .filter(|(j, _)| heights[global_min] >= (j + 1) as f32 / n_thresholds as f32)
        .map(|(_, &p)| p)
        .sum();
    probs[global_min] += params.no_trough_prob * unreached;

    let voiced_prob = probs.iter().sum::<f32>().clamp(0.0, 1.0);
    let best = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(k, _)| k)
        .unwrap_or(global_min);

    let tau = troughs[best];
    let period = tau as f32 + parabolic_shift(&cmndf, tau);
    let frequency = params.sample_rate as f32 / period;

    if voiced_prob >= params.voicing_threshold
        && frequency >= params.fmin
        && frequency <= params.fmax
    {
        (Some(frequency), voiced_prob)
    } else {
        (None, voiced_prob)
    }
}

/// One estimate per centered frame of a mono buffer
pub fn track_pitch(buffer: &AudioBuffer, config: &Config) -> TranscriptionResult<PitchTrack> {
    if buffer.n_channels() != 1 {
        return Err(TranscriptionError::InvalidParameters(format!(
            "pitch tracking expects mono audio, got {} channels",
            buffer.n_channels()
        )));
    }
    let params = YinParams::new(buffer.sample_rate(), config)?;
    let hop_sec = params.hop_length as f32 / params.sample_rate as f32;

    let y = buffer.channel(0);
    if y.is_empty() {
        return Ok(PitchTrack {
            estimates: Vec::new(),
            hop_sec,
        });
    }

    let pad = params.frame_length / 2;
    let mut padded = vec![0.0f32; y.len() + 2 * pad + params.frame_length];
    padded[pad..pad + y.len()].copy_from_slice(y);
    let n_frames = 1 + y.len() / params.hop_length;

    debug!(
        "  YIN periods {}..={} samples ({:.1}-{:.1} Hz), {} frames",
        params.min_period, params.max_period, params.fmin, params.fmax, n_frames
    );

    let estimates: Vec<PitchEstimate> = (0..n_frames)
        .into_par_iter()
        .map(|t| {
            let start = t * params.hop_length;
            let frame = &padded[start..start + params.frame_length];
            let time_sec = t as f32 * hop_sec;
            match estimate_frame(frame, &params) {
                (Some(f0), prob) => PitchEstimate::voiced(time_sec, f0, prob),
                (None, prob) => PitchEstimate {
                    voiced_prob: prob,
                    ..PitchEstimate::unvoiced(time_sec)
                },
            }
        })
        .collect();

    Ok(PitchTrack { estimates, hop_sec })
}

pub fn run(state: &mut AudioState, config: &Config) -> TranscriptionResult<()> {
    info!("Pass 2: Pitch Tracking");

    let isolated = state.isolated.as_ref().ok_or_else(|| {
        TranscriptionError::InvalidParameters("Pass 1 must run before Pass 2".to_string())
    })?;

    let track = track_pitch(isolated, config)?;
    info!(
        "  {} of {} frames voiced",
        track.voiced_count(),
        track.estimates.len()
    );
    state.pitch_track = Some(track);

    info!("  ✓ Pass 2 complete");
    Ok(())
}
