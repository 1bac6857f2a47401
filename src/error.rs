//! Error types for the piano-to-MIDI system

use thiserror::Error;

/// Custom error type for piano-to-MIDI processing
#[derive(Debug, Clone, Error)]
pub enum TranscriptionError {
    /// E001: Malformed configuration or call parameters
    #[error("E001: Invalid parameters - {0}")]
    InvalidParameters(String),
    /// E002: Zero-length input buffer
    #[error("E002: Empty input - {0}")]
    EmptyInput(String),
    /// E003: Invalid audio format (e.g., more than two channels)
    #[error("E003: Invalid audio format - {0}")]
    InvalidAudioFormat(String),
    /// E004: Audio file I/O error
    #[error("E004: Audio file I/O error - {0}")]
    AudioFileError(String),
    /// E005: Resampler construction or processing failed
    #[error("E005: Resampling error - {0}")]
    ResampleError(String),
    /// E006: MIDI export error
    #[error("E006: MIDI export error - {0}")]
    MidiExportError(String),
    /// E007: Analysis export error
    #[error("E007: Analysis export error - {0}")]
    AnalysisExportError(String),
}

impl From<std::io::Error> for TranscriptionError {
    fn from(err: std::io::Error) -> Self {
        TranscriptionError::AudioFileError(format!("File I/O error: {}", err))
    }
}

impl From<serde_json::Error> for TranscriptionError {
    fn from(err: serde_json::Error) -> Self {
        TranscriptionError::AnalysisExportError(format!("JSON serialization error: {}", err))
    }
}

impl From<hound::Error> for TranscriptionError {
    fn from(err: hound::Error) -> Self {
        TranscriptionError::AudioFileError(err.to_string())
    }
}

/// A single analysis frame whose pitch could not be placed in the valid
/// octave range, even after subharmonic correction.
///
/// Never surfaces to callers: the segmenter treats the frame as unvoiced.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("invalid pitch frame at {frequency_hz:.2} Hz")]
pub struct InvalidPitchFrame {
    pub frequency_hz: f32,
}

/// Result type alias for piano-to-MIDI operations
pub type Result<T> = std::result::Result<T, TranscriptionError>;
