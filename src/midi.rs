//! Standard MIDI File export of an event track

use crate::analysis::EventTrack;
use crate::audio::AudioState;
use crate::config::{Config, ExportConfig};
use crate::error::{Result as TranscriptionResult, TranscriptionError};
use log::{info, warn};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Microseconds per quarter note
fn tempo_to_uspq(tempo_bpm: f32) -> u32 {
    (60_000_000.0 / tempo_bpm).round() as u32
}

fn beats_to_ticks(beats: f32, ppq: u16) -> u32 {
    (beats * ppq as f32).round().max(0.0) as u32
}

/// Serialize an event track as a single-track SMF.
///
/// Note-offs sort ahead of note-ons on the same tick so back-to-back
/// notes of one key never cut each other off.
pub fn event_track_to_smf_bytes(
    track: &EventTrack,
    config: &ExportConfig,
) -> TranscriptionResult<Vec<u8>> {
    if config.ppq == 0 || config.ppq > 0x7FFF {
        return Err(TranscriptionError::MidiExportError(format!(
            "ppq {} not representable",
            config.ppq
        )));
    }
    if config.channel > 15 || config.velocity > 127 || config.program > 127 {
        return Err(TranscriptionError::MidiExportError(
            "channel, velocity or program out of MIDI range".to_string(),
        ));
    }
    let channel = u4::from(config.channel);

    // (absolute tick, note-on?, key)
    let mut timeline: Vec<(u32, bool, u8)> = Vec::with_capacity(track.notes.len() * 2);
    for note in &track.notes {
        let start = beats_to_ticks(note.start_beat, config.ppq);
        let end = beats_to_ticks(note.end_beat(), config.ppq).max(start + 1);
        let key = note.note_number.min(127);
        timeline.push((start, true, key));
        timeline.push((end, false, key));
    }
    timeline.sort_by_key(|&(tick, is_on, key)| (tick, is_on, key));

    let mut events = vec![
        TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(tempo_to_uspq(
                track.tempo_bpm,
            )))),
        },
        TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::from(config.program),
                },
            },
        },
    ];

    let mut current_tick = 0u32;
    for (tick, is_on, key) in timeline {
        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::from(key),
                vel: u7::from(config.velocity),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::from(key),
                vel: u7::from(0),
            }
        };
        events.push(TrackEvent {
            delta: u28::from(tick - current_tick),
            kind: TrackEventKind::Midi { channel, message },
        });
        current_tick = tick;
    }

    events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(u15::from(config.ppq)),
        },
        tracks: vec![events],
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| TranscriptionError::MidiExportError(format!("{:?}", e)))?;
    Ok(bytes)
}

/// Write `transcription.mid` for the state's event track
pub fn export_midi(state: &AudioState, output_dir: &Path, config: &Config) -> TranscriptionResult<()> {
    let Some(track) = state.event_track.as_ref() else {
        warn!("No event track to export");
        return Ok(());
    };
    if track.notes.is_empty() {
        warn!("Event track is empty; writing a tempo-only MIDI file");
    }

    std::fs::create_dir_all(output_dir)?;
    let midi_path = output_dir.join("transcription.mid");
    let bytes = event_track_to_smf_bytes(track, &config.export)?;

    let mut file = File::create(&midi_path)?;
    file.write_all(&bytes)?;

    info!(
        "Exported {} notes to {}",
        track.notes.len(),
        midi_path.display()
    );
    Ok(())
}
