//! Configuration system for the piano-to-MIDI processor

use crate::error::{Result as TranscriptionResult, TranscriptionError};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub audio: AudioConfig,
    pub stft: StftConfig,
    pub hpss: HpssConfig,
    pub separation: SeparationConfig,
    pub pitch: PitchConfig,
    pub segmentation: SegmentationConfig,
    pub quantize: QuantizeConfig,
    pub export: ExportConfig,
    pub validation: ValidationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            audio: AudioConfig::default(),
            stft: StftConfig::default(),
            hpss: HpssConfig::default(),
            separation: SeparationConfig::default(),
            pitch: PitchConfig::default(),
            segmentation: SegmentationConfig::default(),
            quantize: QuantizeConfig::default(),
            export: ExportConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Input preparation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Resample target before processing
    pub sample_rate_hint: u32,
    /// Trim input to this many seconds; 0 keeps the full input
    pub max_duration_sec: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hint: 16000,
            max_duration_sec: 60.0,
        }
    }
}

/// STFT configuration for spectral masking and pitch tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StftConfig {
    pub frame_length: usize,
    pub hop_length: usize,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            frame_length: 2048,
            hop_length: 1024,
        }
    }
}

/// HPSS (Harmonic/Percussive Source Separation) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HpssConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    /// Median kernel along time, in frames
    pub harmonic_kernel: usize,
    /// Median kernel along frequency, in bins
    pub percussive_kernel: usize,
    pub margin: f32,
    pub power: f32,
}

impl Default for HpssConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            harmonic_kernel: 31,
            percussive_kernel: 31,
            margin: 8.0,
            power: 2.0,
        }
    }
}

/// Source separation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    pub difference_weight: f32,
    pub sum_weight: f32,
    pub instrument_range_hz: [f32; 2],
    pub suppression_band_hz: [f32; 2],
    pub suppression_gain: f32,
    pub out_of_range_gain: f32,
    /// Energy of a 2nd-4th multiple relative to the bin's own energy
    pub harmonic_ratio_threshold: f32,
    pub harmonic_gain: f32,
    pub smoothing_ms: f32,
    pub smoothing_mix: f32,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            difference_weight: 0.8,
            sum_weight: 0.2,
            instrument_range_hz: [27.5, 4186.0], // A0 - C8
            suppression_band_hz: [80.0, 300.0],
            suppression_gain: 0.05,
            out_of_range_gain: 0.1,
            harmonic_ratio_threshold: 0.3,
            harmonic_gain: 1.2,
            smoothing_ms: 10.0,
            smoothing_mix: 0.2,
        }
    }
}

/// Probabilistic YIN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    pub fmin: f32,
    pub fmax: f32,
    pub n_thresholds: usize,
    pub beta_alpha: u32,
    pub beta_beta: u32,
    pub boltzmann_parameter: f32,
    pub no_trough_prob: f32,
    pub voicing_threshold: f32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            fmin: 60.0,
            fmax: 2000.0,
            n_thresholds: 50,
            beta_alpha: 2,
            beta_beta: 18,
            boltzmann_parameter: 2.0,
            no_trough_prob: 0.01,
            voicing_threshold: 0.5,
        }
    }
}

/// Note segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub min_note_duration_sec: f32,
    /// Inclusive: a frame exactly this far from the active note continues it
    pub continuation_cents: f32,
    pub min_octave: i32,
    pub max_octave: i32,
    pub duplicate_gap_sec: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_note_duration_sec: 0.1,
            continuation_cents: 50.0,
            min_octave: 1,
            max_octave: 7,
            duplicate_gap_sec: 0.05,
        }
    }
}

/// Duration quantization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizeConfig {
    pub enabled: bool,
    pub grid_beats: Vec<f32>,
    /// Largest accepted shortening, as a fraction of the raw duration
    pub max_shortening: f32,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grid_beats: vec![4.0, 2.0, 1.0, 0.5, 0.25],
            max_shortening: 0.3,
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub tempo_bpm: f32,
    pub note_range: [u8; 2],
    pub duration_beats_range: [f32; 2],
    pub ppq: u16,
    pub velocity: u8,
    pub channel: u8,
    pub program: u8,
    pub write_isolated_audio: bool,
    pub write_analysis: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            note_range: [24, 108], // C1 - C8
            duration_beats_range: [0.125, 16.0],
            ppq: 960,
            velocity: 100,
            channel: 0,
            program: 0, // Acoustic Grand Piano
            write_isolated_audio: true,
            write_analysis: true,
        }
    }
}

/// Validation ranges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub tempo_range: [f32; 2],
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tempo_range: [60.0, 180.0],
        }
    }
}

fn invalid(msg: impl Into<String>) -> TranscriptionError {
    TranscriptionError::InvalidParameters(msg.into())
}

/// Check that a frame/hop pair is usable by the spectral transform
pub fn validate_frame_params(frame_length: usize, hop_length: usize) -> TranscriptionResult<()> {
    if frame_length == 0 || hop_length == 0 {
        return Err(invalid(format!(
            "frame_length ({}) and hop_length ({}) must be positive",
            frame_length, hop_length
        )));
    }
    if frame_length < hop_length {
        return Err(invalid(format!(
            "frame_length ({}) must be >= hop_length ({})",
            frame_length, hop_length
        )));
    }
    Ok(())
}

/// Check that a tempo lies inside the configured tempo range
pub fn validate_tempo(tempo_bpm: f32, config: &Config) -> TranscriptionResult<()> {
    let [lo, hi] = config.validation.tempo_range;
    if !tempo_bpm.is_finite() || tempo_bpm < lo || tempo_bpm > hi {
        return Err(invalid(format!(
            "tempo {} BPM outside [{}, {}]",
            tempo_bpm, lo, hi
        )));
    }
    Ok(())
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> TranscriptionResult<()> {
    validate_frame_params(config.stft.frame_length, config.stft.hop_length)?;
    validate_frame_params(config.hpss.n_fft, config.hpss.hop_length)?;

    if config.validation.tempo_range[0] >= config.validation.tempo_range[1] {
        return Err(invalid("tempo_range min must be < max"));
    }
    validate_tempo(config.export.tempo_bpm, config)?;

    if config.audio.sample_rate_hint == 0 {
        return Err(invalid("sample_rate_hint must be positive"));
    }
    if config.audio.max_duration_sec < 0.0 {
        return Err(invalid("max_duration_sec must be >= 0"));
    }

    if config.hpss.harmonic_kernel == 0 || config.hpss.percussive_kernel == 0 {
        return Err(invalid("HPSS kernel sizes must be positive"));
    }
    if config.hpss.margin < 1.0 {
        return Err(invalid("HPSS margin must be >= 1.0"));
    }

    let [lo, hi] = config.separation.instrument_range_hz;
    if lo <= 0.0 || lo >= hi {
        return Err(invalid(format!(
            "instrument_range_hz [{}, {}] is empty",
            lo, hi
        )));
    }
    let [lo, hi] = config.separation.suppression_band_hz;
    if lo < 0.0 || lo > hi {
        return Err(invalid(format!(
            "suppression_band_hz [{}, {}] is inverted",
            lo, hi
        )));
    }

    if config.pitch.fmin <= 0.0 || config.pitch.fmin >= config.pitch.fmax {
        return Err(invalid("pitch fmin must be positive and < fmax"));
    }
    if config.pitch.n_thresholds == 0 {
        return Err(invalid("pitch n_thresholds must be positive"));
    }
    if config.pitch.beta_alpha == 0 || config.pitch.beta_beta == 0 {
        return Err(invalid("beta distribution parameters must be positive"));
    }
    if !(0.0..=1.0).contains(&config.pitch.voicing_threshold) {
        return Err(invalid("voicing_threshold must lie in [0, 1]"));
    }

    if config.segmentation.min_octave > config.segmentation.max_octave {
        return Err(invalid("min_octave must be <= max_octave"));
    }

    if config.quantize.enabled && config.quantize.grid_beats.iter().all(|&b| b <= 0.0) {
        return Err(invalid("quantize grid_beats needs at least one positive value"));
    }

    let [lo, hi] = config.export.note_range;
    if lo > hi || hi > 127 {
        return Err(invalid(format!("note_range [{}, {}] is invalid", lo, hi)));
    }
    let [lo, hi] = config.export.duration_beats_range;
    if lo <= 0.0 || lo > hi {
        return Err(invalid(format!(
            "duration_beats_range [{}, {}] is invalid",
            lo, hi
        )));
    }
    if config.export.ppq == 0 || config.export.ppq > 0x7FFF {
        return Err(invalid("ppq must lie in [1, 32767]"));
    }
    if config.export.velocity > 127 || config.export.channel > 15 || config.export.program > 127 {
        return Err(invalid("velocity/program must be <= 127 and channel <= 15"));
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> TranscriptionResult<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> TranscriptionResult<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
