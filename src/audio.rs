//! Audio buffers, WAV I/O and basic time-domain processing

use crate::analysis::{EventTrack, NoteEvent, PitchTrack};
use crate::config::Config;
use crate::error::{Result as TranscriptionResult, TranscriptionError};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, warn};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::Path;

/// Multi-channel floating-point audio.
///
/// Sample rate is positive, there are one or two channels and every
/// channel has the same length. Passes never mutate a buffer they were
/// handed; they build a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer, checking the channel and sample-rate invariants
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> TranscriptionResult<Self> {
        if sample_rate == 0 {
            return Err(TranscriptionError::InvalidParameters(
                "sample rate must be positive".to_string(),
            ));
        }
        if channels.is_empty() || channels.len() > 2 {
            return Err(TranscriptionError::InvalidAudioFormat(format!(
                "expected 1 or 2 channels, got {}",
                channels.len()
            )));
        }
        if channels.iter().any(|c| c.len() != channels[0].len()) {
            return Err(TranscriptionError::InvalidAudioFormat(
                "channels have unequal lengths".to_string(),
            ));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Single-channel buffer
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> TranscriptionResult<Self> {
        Self::new(vec![samples], sample_rate)
    }

    /// Two-channel buffer
    pub fn stereo(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> TranscriptionResult<Self> {
        Self::new(vec![left, right], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, idx: usize) -> &[f32] {
        &self.channels[idx]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get audio duration in seconds
    pub fn duration_sec(&self) -> f32 {
        self.len() as f32 / self.sample_rate as f32
    }

    /// Largest absolute sample over all channels
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |acc, &x| acc.max(x.abs()))
    }

    pub fn is_silent(&self) -> bool {
        self.peak() == 0.0
    }
}

/// Pipeline state: the input buffer plus each pass's output.
///
/// Every field is written by exactly one pass and only read afterwards.
#[derive(Debug, Clone)]
pub struct AudioState {
    /// Decoded input, untouched
    pub input: AudioBuffer,

    // Pass 0: Preflight
    /// Trimmed and resampled input
    pub prepared: Option<AudioBuffer>,

    // Pass 1: Source separation
    /// Mono, peak-normalized instrument estimate
    pub isolated: Option<AudioBuffer>,

    // Pass 2: Pitch tracking
    pub pitch_track: Option<PitchTrack>,

    // Pass 3: Note segmentation
    pub notes: Vec<NoteEvent>,

    // Pass 4: Event encoding
    pub event_track: Option<EventTrack>,
}

impl AudioState {
    /// Load audio file and create initial state
    pub fn load<P: AsRef<Path>>(path: P) -> TranscriptionResult<Self> {
        Ok(Self::from_buffer(load_audio_file(path)?))
    }

    /// Create a state around an already decoded buffer
    pub fn from_buffer(input: AudioBuffer) -> Self {
        AudioState {
            input,
            prepared: None,
            isolated: None,
            pitch_track: None,
            notes: Vec::new(),
            event_track: None,
        }
    }

    /// Create a test AudioState with synthetic mono audio data
    pub fn from_samples(samples: Vec<f32>, sr: u32) -> TranscriptionResult<Self> {
        Ok(Self::from_buffer(AudioBuffer::mono(samples, sr)?))
    }

    /// Get input duration in seconds
    pub fn duration_sec(&self) -> f32 {
        self.input.duration_sec()
    }
}

/// Load audio file; only WAV is decoded here
pub fn load_audio_file<P: AsRef<Path>>(path: P) -> TranscriptionResult<AudioBuffer> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "wav" | "wave" => load_wav_file(path),
        _ => Err(TranscriptionError::InvalidAudioFormat(format!(
            "Unsupported audio format: {}",
            extension
        ))),
    }
}

/// Check that a file exists and carries a readable WAV header
pub fn validate_audio_file<P: AsRef<Path>>(path: P) -> TranscriptionResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TranscriptionError::AudioFileError(format!(
            "File not found: {}",
            path.display()
        )));
    }
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.channels > 2 {
        return Err(TranscriptionError::InvalidAudioFormat(format!(
            "{}-channel audio not supported",
            spec.channels
        )));
    }
    if reader.len() == 0 {
        return Err(TranscriptionError::EmptyInput(format!(
            "{} has no samples",
            path.display()
        )));
    }
    Ok(())
}

/// Load WAV file, keeping up to two channels de-interleaved
fn load_wav_file<P: AsRef<Path>>(path: P) -> TranscriptionResult<AudioBuffer> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.channels > 2 {
        return Err(TranscriptionError::InvalidAudioFormat(format!(
            "{}-channel audio not supported",
            spec.channels
        )));
    }

    if spec.bits_per_sample > 32 {
        return Err(TranscriptionError::InvalidAudioFormat(format!(
            "Unsupported bit depth: {}",
            spec.bits_per_sample
        )));
    }

    let mut interleaved: Vec<f32> = Vec::with_capacity(reader.len() as usize);
    match spec.sample_format {
        SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for sample in reader.samples::<i32>() {
                interleaved.push(sample? as f32 / max_value);
            }
        }
        SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                interleaved.push(sample?);
            }
        }
    }

    let n_channels = spec.channels as usize;
    let mut channels = vec![Vec::with_capacity(interleaved.len() / n_channels); n_channels];
    for frame in interleaved.chunks_exact(n_channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            channels[ch].push(sample);
        }
    }

    debug!(
        "Loaded {} channel(s), {} samples at {} Hz",
        n_channels,
        channels[0].len(),
        spec.sample_rate
    );
    AudioBuffer::new(channels, spec.sample_rate)
}

/// Write a buffer as 32-bit float WAV
pub fn save_wav_file<P: AsRef<Path>>(buffer: &AudioBuffer, path: P) -> TranscriptionResult<()> {
    let spec = WavSpec {
        channels: buffer.n_channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for i in 0..buffer.len() {
        for channel in buffer.channels() {
            writer.write_sample(channel[i])?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Keep only the first `max_duration_sec` seconds; 0 keeps everything
pub fn trim_to_duration(buffer: &AudioBuffer, max_duration_sec: f32) -> AudioBuffer {
    if max_duration_sec <= 0.0 {
        return buffer.clone();
    }
    let max_samples = (max_duration_sec * buffer.sample_rate() as f32).round() as usize;
    if buffer.len() <= max_samples {
        return buffer.clone();
    }
    AudioBuffer {
        channels: buffer
            .channels()
            .iter()
            .map(|c| c[..max_samples].to_vec())
            .collect(),
        sample_rate: buffer.sample_rate(),
    }
}

/// Resample every channel to `target_sr` with a windowed-sinc resampler
pub fn resample(buffer: &AudioBuffer, target_sr: u32) -> TranscriptionResult<AudioBuffer> {
    if target_sr == 0 {
        return Err(TranscriptionError::InvalidParameters(
            "target sample rate must be positive".to_string(),
        ));
    }
    if buffer.sample_rate() == target_sr || buffer.is_empty() {
        return Ok(AudioBuffer {
            channels: buffer.channels.clone(),
            sample_rate: if buffer.is_empty() {
                target_sr
            } else {
                buffer.sample_rate()
            },
        });
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_sr as f64 / buffer.sample_rate() as f64;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0,
        params,
        buffer.len(),
        buffer.n_channels(),
    )
    .map_err(|e| TranscriptionError::ResampleError(e.to_string()))?;

    let mut resampled = resampler
        .process(buffer.channels(), None)
        .map_err(|e| TranscriptionError::ResampleError(e.to_string()))?;
    // Flush the filter so the tail is not lost to its delay
    let flushed = resampler
        .process_partial(None::<&[Vec<f32>]>, None)
        .map_err(|e| TranscriptionError::ResampleError(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected_len = (buffer.len() as f64 * ratio).round() as usize;
    for (channel, tail) in resampled.iter_mut().zip(flushed) {
        channel.extend(tail);
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected_len, 0.0);
    }

    debug!(
        "Resampled {} Hz -> {} Hz ({} -> {} samples)",
        buffer.sample_rate(),
        target_sr,
        buffer.len(),
        expected_len
    );
    AudioBuffer::new(resampled, target_sr)
}

/// Divide by the peak absolute sample. A silent signal is returned unchanged.
pub fn peak_normalize(samples: &[f32]) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
    if peak > 0.0 {
        samples.iter().map(|&x| x / peak).collect()
    } else {
        warn!("Peak normalization skipped: signal is silent");
        samples.to_vec()
    }
}

/// Centered moving average ("same"-length box convolution)
pub fn moving_average(samples: &[f32], window: usize) -> Vec<f32> {
    if window <= 1 || samples.is_empty() {
        return samples.to_vec();
    }

    // Same alignment as a full convolution cropped to the input length
    let offset = (window - 1) / 2;
    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0f64);
    for &x in samples {
        let last = *prefix.last().unwrap_or(&0.0);
        prefix.push(last + x as f64);
    }

    let n = samples.len() as isize;
    (0..n)
        .map(|i| {
            let hi = (i + offset as isize).min(n - 1);
            let lo = (i + offset as isize - window as isize + 1).max(0);
            if hi < lo {
                return 0.0;
            }
            ((prefix[hi as usize + 1] - prefix[lo as usize]) / window as f64) as f32
        })
        .collect()
}

/// Compute correlation coefficient between two signals
pub fn corrcoef(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let n = a.len() as f32;
    let sum_a = a.iter().sum::<f32>();
    let sum_b = b.iter().sum::<f32>();
    let sum_ab = a.iter().zip(b).map(|(&x, &y)| x * y).sum::<f32>();
    let sum_a2 = a.iter().map(|&x| x * x).sum::<f32>();
    let sum_b2 = b.iter().map(|&x| x * x).sum::<f32>();

    let numerator = n * sum_ab - sum_a * sum_b;
    let denominator = ((n * sum_a2 - sum_a * sum_a) * (n * sum_b2 - sum_b * sum_b)).sqrt();

    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Prepare the decoded input for separation: trim, then resample
pub fn prepare_input(buffer: &AudioBuffer, config: &Config) -> TranscriptionResult<AudioBuffer> {
    let trimmed = trim_to_duration(buffer, config.audio.max_duration_sec);
    resample(&trimmed, config.audio.sample_rate_hint)
}
