//! Pass 4: Event Encoding
//!
//! Converts seconds-based notes to a tempo-relative event track with
//! note numbers and durations clamped into the export range.

use crate::analysis::{EventTrack, NoteEvent, TrackNote};
use crate::audio::AudioState;
use crate::config::{validate_tempo, Config};
use crate::error::Result as TranscriptionResult;
use log::{debug, info};

/// Note number for a note, clamped into `[lo, hi]`
pub fn note_number(note: &NoteEvent, range: [u8; 2]) -> u8 {
    let raw = note.pitch.midi_number();
    let clamped = raw.clamp(range[0] as i32, range[1] as i32);
    if clamped != raw {
        debug!("  Note {} ({}) clamped to {}", note.pitch, raw, clamped);
    }
    clamped as u8
}

pub fn seconds_to_beats(seconds: f32, tempo_bpm: f32) -> f32 {
    seconds * tempo_bpm / 60.0
}

/// Encode notes at a single tempo. Fails only on an out-of-range tempo.
pub fn encode(notes: &[NoteEvent], tempo_bpm: f32, config: &Config) -> TranscriptionResult<EventTrack> {
    validate_tempo(tempo_bpm, config)?;
    let [min_beats, max_beats] = config.export.duration_beats_range;

    let notes = notes
        .iter()
        .map(|note| TrackNote {
            note_number: note_number(note, config.export.note_range),
            start_beat: seconds_to_beats(note.onset_sec, tempo_bpm).max(0.0),
            duration_beat: seconds_to_beats(note.duration_sec, tempo_bpm)
                .clamp(min_beats, max_beats),
        })
        .collect();

    Ok(EventTrack { tempo_bpm, notes })
}

pub fn run(state: &mut AudioState, config: &Config) -> TranscriptionResult<()> {
    info!("Pass 4: Event Encoding");

    let track = encode(&state.notes, config.export.tempo_bpm, config)?;
    info!(
        "  {} event(s) at {:.1} BPM",
        track.notes.len(),
        track.tempo_bpm
    );
    state.event_track = Some(track);

    info!("  ✓ Pass 4 complete");
    Ok(())
}
