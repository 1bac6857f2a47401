//! Pitch and note data model, and analysis export

use crate::audio::AudioState;
use crate::error::Result as TranscriptionResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Concert pitch reference (A4)
pub const A4_HZ: f32 = 440.0;

/// The twelve chromatic pitch classes, C-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Pitch class for a semitone index, wrapped into 0..12
    pub fn from_index(index: i32) -> Self {
        Self::ALL[index.rem_euclid(12) as usize]
    }

    /// Semitones above C
    pub fn chromatic_offset(&self) -> u8 {
        *self as u8
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named pitch: class plus scientific octave (C4 = middle C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pitch {
    pub class: PitchClass,
    pub octave: i32,
}

impl Pitch {
    /// Nearest equal-tempered pitch, or `None` for non-positive input
    pub fn from_frequency(frequency_hz: f32) -> Option<Self> {
        if !(frequency_hz > 0.0) || !frequency_hz.is_finite() {
            return None;
        }
        let semitones = (12.0 * (frequency_hz / A4_HZ).log2()).round() as i32;
        // A is 9 semitones above C in the same octave
        let from_c4 = semitones + 9;
        Some(Self {
            class: PitchClass::from_index(from_c4),
            octave: 4 + from_c4.div_euclid(12),
        })
    }

    /// Unclamped MIDI note number, (octave + 1) * 12 + offset
    pub fn midi_number(&self) -> i32 {
        (self.octave + 1) * 12 + self.class.chromatic_offset() as i32
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.octave)
    }
}

/// Signed interval from `reference_hz` to `frequency_hz`, in cents
pub fn cents_between(frequency_hz: f32, reference_hz: f32) -> f32 {
    1200.0 * (frequency_hz / reference_hz).log2()
}

/// Per-frame pitch tracker output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Frame center time in seconds
    pub time_sec: f32,
    /// Most probable fundamental, `None` when unvoiced
    pub frequency_hz: Option<f32>,
    pub voiced_prob: f32,
}

impl PitchEstimate {
    pub fn voiced(time_sec: f32, frequency_hz: f32, voiced_prob: f32) -> Self {
        Self {
            time_sec,
            frequency_hz: Some(frequency_hz),
            voiced_prob,
        }
    }

    pub fn unvoiced(time_sec: f32) -> Self {
        Self {
            time_sec,
            frequency_hz: None,
            voiced_prob: 0.0,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency_hz.is_some()
    }
}

/// All frame estimates of one signal, in time order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitchTrack {
    pub estimates: Vec<PitchEstimate>,
    /// Seconds between consecutive frames
    pub hop_sec: f32,
}

impl PitchTrack {
    pub fn voiced_count(&self) -> usize {
        self.estimates.iter().filter(|e| e.is_voiced()).count()
    }
}

/// A discrete note produced by the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub onset_sec: f32,
    pub pitch: Pitch,
    /// Frequency at note onset, informational
    pub frequency_hz: f32,
    pub duration_sec: f32,
}

impl NoteEvent {
    pub fn end_sec(&self) -> f32 {
        self.onset_sec + self.duration_sec
    }

    pub fn name(&self) -> &'static str {
        self.pitch.class.name()
    }

    pub fn octave(&self) -> i32 {
        self.pitch.octave
    }
}

/// One tempo-relative note of the event track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackNote {
    pub note_number: u8,
    pub start_beat: f32,
    pub duration_beat: f32,
}

impl TrackNote {
    pub fn end_beat(&self) -> f32 {
        self.start_beat + self.duration_beat
    }
}

/// Tempo plus ordered notes; the contract handed to serializers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrack {
    pub tempo_bpm: f32,
    pub notes: Vec<TrackNote>,
}

#[derive(Debug, Serialize)]
struct AnalysisReport<'a> {
    duration_sec: f32,
    sample_rate: u32,
    voiced_frames: usize,
    total_frames: usize,
    notes: &'a [NoteEvent],
    event_track: Option<&'a EventTrack>,
}

/// Export note list and event track as `notes.json`
pub fn export_analysis<P: AsRef<Path>>(state: &AudioState, output_dir: P) -> TranscriptionResult<()> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)?;

    let report = AnalysisReport {
        duration_sec: state.duration_sec(),
        sample_rate: state
            .isolated
            .as_ref()
            .map(|b| b.sample_rate())
            .unwrap_or_else(|| state.input.sample_rate()),
        voiced_frames: state.pitch_track.as_ref().map_or(0, |t| t.voiced_count()),
        total_frames: state.pitch_track.as_ref().map_or(0, |t| t.estimates.len()),
        notes: &state.notes,
        event_track: state.event_track.as_ref(),
    };

    let path = output_dir.join("notes.json");
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    log::info!("Exported analysis to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_pitches() {
        let a4 = Pitch::from_frequency(440.0).unwrap();
        assert_eq!(a4.class, PitchClass::A);
        assert_eq!(a4.octave, 4);

        let c4 = Pitch::from_frequency(261.63).unwrap();
        assert_eq!(c4.class, PitchClass::C);
        assert_eq!(c4.octave, 4);

        let a5 = Pitch::from_frequency(880.0).unwrap();
        assert_eq!(a5.class, PitchClass::A);
        assert_eq!(a5.octave, 5);
    }

    #[test]
    fn test_octave_boundaries() {
        // B3 and C4 sit on either side of the octave boundary
        let b3 = Pitch::from_frequency(246.94).unwrap();
        assert_eq!(b3.to_string(), "B3");
        assert_eq!(b3.midi_number(), 59);

        let c1 = Pitch::from_frequency(32.70).unwrap();
        assert_eq!(c1.to_string(), "C1");
        assert_eq!(c1.midi_number(), 24);

        let low = Pitch::from_frequency(30.0).unwrap();
        assert_eq!(low.octave, 0);
    }

    #[test]
    fn test_non_positive_frequency() {
        assert!(Pitch::from_frequency(0.0).is_none());
        assert!(Pitch::from_frequency(-5.0).is_none());
        assert!(Pitch::from_frequency(f32::NAN).is_none());
    }

    #[test]
    fn test_cents() {
        assert!((cents_between(880.0, 440.0) - 1200.0).abs() < 1e-3);
        let quarter_tone = 440.0 * 2.0f32.powf(50.0 / 1200.0);
        assert!((cents_between(quarter_tone, 440.0) - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_pitch_class_wraps() {
        assert_eq!(PitchClass::from_index(-1), PitchClass::B);
        assert_eq!(PitchClass::from_index(12), PitchClass::C);
        assert_eq!(PitchClass::GSharp.chromatic_offset(), 8);
    }
}
