//! Piano-to-MIDI Transcription System
//!
//! A deterministic, non-ML pipeline that isolates a piano-like source
//! from a recording, tracks its fundamental frequency, segments the
//! track into notes and encodes them as a tempo-relative event track.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod passes;
pub mod spectral;

pub use analysis::{EventTrack, NoteEvent, TrackNote};
pub use audio::{AudioBuffer, AudioState};
pub use config::Config;
pub use error::{Result as TranscriptionResult, TranscriptionError};

use log::info;
use std::path::Path;

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct Transcription {
    pub notes: Vec<NoteEvent>,
    pub event_track: EventTrack,
    /// Separated instrument signal, for inspection
    pub isolated: AudioBuffer,
}

/// Main processing pipeline for piano-to-MIDI conversion
pub struct PianoToMidi {
    config: Config,
}

impl PianoToMidi {
    /// Create a new processor with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every pass on a decoded buffer.
    ///
    /// Configuration errors surface before any audio is touched.
    pub fn transcribe(&self, buffer: AudioBuffer) -> TranscriptionResult<Transcription> {
        let mut state = AudioState::from_buffer(buffer);
        self.run_pipeline(&mut state)?;
        into_transcription(state)
    }

    /// Process an audio file and write MIDI plus analysis output
    pub fn process<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_dir: Q,
    ) -> TranscriptionResult<Transcription> {
        let mut state = AudioState::load(input_path)?;
        self.run_pipeline(&mut state)?;
        self.export_results(&state, output_dir.as_ref())?;
        into_transcription(state)
    }

    /// Execute the complete multi-pass pipeline
    fn run_pipeline(&self, state: &mut AudioState) -> TranscriptionResult<()> {
        config::validate_config(&self.config)?;

        // Pass 0: Preflight (trim, resample)
        passes::pass_0::run(state, &self.config)?;

        // Pass 1: Source Separation
        passes::pass_1::run(state, &self.config)?;

        // Pass 2: Pitch Tracking
        passes::pass_2::run(state, &self.config)?;

        // Pass 3: Note Segmentation
        passes::pass_3::run(state, &self.config)?;

        // Pass 4: Event Encoding
        passes::pass_4::run(state, &self.config)?;

        Ok(())
    }

    /// Export MIDI, analysis and isolated audio
    fn export_results(&self, state: &AudioState, output_dir: &Path) -> TranscriptionResult<()> {
        midi::export_midi(state, output_dir, &self.config)?;

        if self.config.export.write_analysis {
            analysis::export_analysis(state, output_dir)?;
        }

        if self.config.export.write_isolated_audio {
            if let Some(isolated) = &state.isolated {
                let path = output_dir.join("isolated.wav");
                audio::save_wav_file(isolated, &path)?;
                info!("Wrote isolated audio to {}", path.display());
            }
        }
        Ok(())
    }
}

fn into_transcription(state: AudioState) -> TranscriptionResult<Transcription> {
    let missing = |what: &str| {
        TranscriptionError::InvalidParameters(format!("pipeline produced no {}", what))
    };
    Ok(Transcription {
        event_track: state.event_track.ok_or_else(|| missing("event track"))?,
        isolated: state.isolated.ok_or_else(|| missing("isolated audio"))?,
        notes: state.notes,
    })
}

/// Validate configuration and input files
pub fn validate_input<P: AsRef<Path>>(input_path: P, config: &Config) -> TranscriptionResult<()> {
    audio::validate_audio_file(input_path)?;
    config::validate_config(config)?;
    Ok(())
}
