//! Validation tests for Pass 4: Event Encoding and MIDI export

use piano2midi::analysis::{EventTrack, NoteEvent, Pitch, PitchClass};
use piano2midi::audio::AudioState;
use piano2midi::config::{Config, ExportConfig};
use piano2midi::error::TranscriptionError;
use piano2midi::midi::{event_track_to_smf_bytes, export_midi};
use piano2midi::passes::pass_4::{self, encode};

fn note(class: PitchClass, octave: i32, onset_sec: f32, duration_sec: f32) -> NoteEvent {
    NoteEvent {
        onset_sec,
        pitch: Pitch { class, octave },
        frequency_hz: 0.0,
        duration_sec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_numbers() {
        let config = Config::default();
        let notes = [
            note(PitchClass::C, 4, 0.0, 0.5),
            note(PitchClass::E, 4, 0.5, 0.5),
            note(PitchClass::A, 0, 1.0, 0.5),
            note(PitchClass::A, 4, 1.5, 0.5),
        ];
        let track = encode(&notes, 120.0, &config).unwrap();
        let numbers: Vec<u8> = track.notes.iter().map(|n| n.note_number).collect();
        assert_eq!(numbers, vec![60, 64, 24, 69]);
    }

    #[test]
    fn test_range_clamp_preserves_count() {
        let config = Config::default();
        let notes = [
            note(PitchClass::C, 9, 0.0, 0.5),
            note(PitchClass::B, 9, 0.5, 0.5),
            note(PitchClass::C, 0, 1.0, 0.5),
            note(PitchClass::C, 8, 1.5, 0.5),
        ];
        let track = encode(&notes, 120.0, &config).unwrap();

        assert_eq!(track.notes.len(), notes.len());
        assert_eq!(track.notes[0].note_number, 108);
        assert_eq!(track.notes[1].note_number, 108);
        assert_eq!(track.notes[2].note_number, 24);
        assert_eq!(track.notes[3].note_number, 108);
    }

    #[test]
    fn test_beats_follow_tempo() {
        let config = Config::default();
        let notes = [note(PitchClass::C, 4, 1.5, 0.75)];

        let at_120 = encode(&notes, 120.0, &config).unwrap();
        assert!((at_120.notes[0].start_beat - 3.0).abs() < 1e-6);
        assert!((at_120.notes[0].duration_beat - 1.5).abs() < 1e-6);
        assert_eq!(at_120.tempo_bpm, 120.0);

        let at_60 = encode(&notes, 60.0, &config).unwrap();
        assert!((at_60.notes[0].start_beat - 1.5).abs() < 1e-6);
        assert!((at_60.notes[0].duration_beat - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_duration_range() {
        let config = Config::default();
        let notes = [
            note(PitchClass::C, 4, 0.0, 0.02),
            note(PitchClass::C, 4, 1.0, 12.0),
        ];
        let track = encode(&notes, 180.0, &config).unwrap();
        assert_eq!(track.notes[0].duration_beat, 0.125);
        assert_eq!(track.notes[1].duration_beat, 16.0);
    }

    #[test]
    fn test_tempo_bounds() {
        let config = Config::default();
        let notes = [note(PitchClass::C, 4, 0.0, 0.5)];

        assert!(encode(&notes, 60.0, &config).is_ok());
        assert!(encode(&notes, 180.0, &config).is_ok());
        for bad in [59.9, 180.1, 0.0, -120.0, f32::NAN] {
            assert!(matches!(
                encode(&notes, bad, &config),
                Err(TranscriptionError::InvalidParameters(_))
            ));
        }
    }

    #[test]
    fn test_empty_note_list_is_valid() {
        let config = Config::default();
        let track = encode(&[], 120.0, &config).unwrap();
        assert!(track.notes.is_empty());
        assert_eq!(track.tempo_bpm, 120.0);
    }

    #[test]
    fn test_run_uses_configured_tempo() {
        let mut config = Config::default();
        config.export.tempo_bpm = 90.0;
        let mut state = AudioState::from_samples(vec![0.0; 100], 16000).unwrap();
        state.notes = vec![note(PitchClass::G, 3, 2.0, 1.0)];

        pass_4::run(&mut state, &config).unwrap();
        let track = state.event_track.as_ref().unwrap();
        assert_eq!(track.tempo_bpm, 90.0);
        assert_eq!(track.notes[0].note_number, 55);
        assert!((track.notes[0].start_beat - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_smf_export_writes_file() {
        let config = Config::default();
        let mut state = AudioState::from_samples(vec![0.0; 100], 16000).unwrap();
        state.notes = vec![
            note(PitchClass::C, 4, 0.0, 0.5),
            note(PitchClass::E, 4, 0.5, 0.5),
        ];
        pass_4::run(&mut state, &config).unwrap();

        let dir = tempfile::tempdir().unwrap();
        export_midi(&state, dir.path(), &config).unwrap();

        let bytes = std::fs::read(dir.path().join("transcription.mid")).unwrap();
        let smf = midly::Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 1);

        let keys: Vec<u8> = smf.tracks[0]
            .iter()
            .filter_map(|e| match e.kind {
                midly::TrackEventKind::Midi {
                    message: midly::MidiMessage::NoteOn { key, .. },
                    ..
                } => Some(key.as_int()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec![60, 64]);
    }

    #[test]
    fn test_smf_rejects_bad_channel() {
        let track = EventTrack {
            tempo_bpm: 120.0,
            notes: Vec::new(),
        };
        let config = ExportConfig {
            channel: 16,
            ..ExportConfig::default()
        };
        assert!(matches!(
            event_track_to_smf_bytes(&track, &config),
            Err(TranscriptionError::MidiExportError(_))
        ));
    }
}
