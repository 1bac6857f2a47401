//! Pass 3: Note Segmentation
//!
//! Frame estimates are folded into notes by a two-state machine, then
//! adjacent duplicates are merged and durations snapped to a beat grid.

use crate::analysis::{cents_between, NoteEvent, Pitch, PitchEstimate, PitchTrack};
use crate::audio::AudioState;
use crate::config::{Config, QuantizeConfig, SegmentationConfig};
use crate::error::{InvalidPitchFrame, Result as TranscriptionResult, TranscriptionError};
use log::{debug, info};

/// Convert a frame frequency to a pitch inside the octave bounds.
///
/// A frequency below the lowest octave is doubled once and re-checked.
/// Anything still out of bounds is rejected.
pub fn correct_subharmonic(
    frequency_hz: f32,
    config: &SegmentationConfig,
) -> Result<(Pitch, f32), InvalidPitchFrame> {
    let invalid = InvalidPitchFrame { frequency_hz };
    let in_range = |p: &Pitch| p.octave >= config.min_octave && p.octave <= config.max_octave;

    let pitch = Pitch::from_frequency(frequency_hz).ok_or(invalid)?;
    if in_range(&pitch) {
        return Ok((pitch, frequency_hz));
    }
    if pitch.octave > config.max_octave {
        return Err(invalid);
    }

    let doubled = frequency_hz * 2.0;
    match Pitch::from_frequency(doubled) {
        Some(corrected) if in_range(&corrected) => Ok((corrected, doubled)),
        _ => Err(invalid),
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveNote {
    pitch: Pitch,
    onset_sec: f32,
    onset_hz: f32,
    last_hz: f32,
}

#[derive(Debug, Clone, Copy)]
enum SegmenterState {
    Idle,
    Active(ActiveNote),
}

/// Frame-by-frame note builder
#[derive(Debug)]
pub struct NoteSegmenter<'a> {
    config: &'a SegmentationConfig,
    state: SegmenterState,
    notes: Vec<NoteEvent>,
    rejected_frames: usize,
    discarded_notes: usize,
}

impl<'a> NoteSegmenter<'a> {
    pub fn new(config: &'a SegmentationConfig) -> Self {
        Self {
            config,
            state: SegmenterState::Idle,
            notes: Vec::new(),
            rejected_frames: 0,
            discarded_notes: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SegmenterState::Active(_))
    }

    /// Feed the next estimate; estimates must arrive in time order
    pub fn push(&mut self, estimate: &PitchEstimate) {
        let now = estimate.time_sec;
        let frame = match estimate.frequency_hz {
            Some(f) => match correct_subharmonic(f, self.config) {
                Ok(valid) => Some(valid),
                Err(err) => {
                    debug!("  {} at {:.3}s", err, now);
                    self.rejected_frames += 1;
                    None
                }
            },
            None => None,
        };

        self.state = match (self.state, frame) {
            (SegmenterState::Idle, None) => SegmenterState::Idle,
            (SegmenterState::Idle, Some((pitch, f))) => open(pitch, f, now),
            (SegmenterState::Active(active), None) => {
                self.close(&active, now);
                SegmenterState::Idle
            }
            (SegmenterState::Active(active), Some((pitch, f))) => {
                let cents = cents_between(f, active.last_hz).abs();
                if pitch == active.pitch && cents <= self.config.continuation_cents {
                    SegmenterState::Active(ActiveNote {
                        last_hz: f,
                        ..active
                    })
                } else {
                    self.close(&active, now);
                    open(pitch, f, now)
                }
            }
        };
    }

    /// Close any active note at `end_sec` and return the notes in order
    pub fn finish(mut self, end_sec: f32) -> Vec<NoteEvent> {
        if let SegmenterState::Active(active) = self.state {
            self.close(&active, end_sec);
            self.state = SegmenterState::Idle;
        }
        if self.rejected_frames > 0 || self.discarded_notes > 0 {
            debug!(
                "  {} frame(s) failed octave correction, {} note(s) under minimum duration",
                self.rejected_frames, self.discarded_notes
            );
        }
        self.notes
    }

    fn close(&mut self, active: &ActiveNote, end_sec: f32) {
        let duration_sec = end_sec - active.onset_sec;
        if duration_sec >= self.config.min_note_duration_sec {
            self.notes.push(NoteEvent {
                onset_sec: active.onset_sec,
                pitch: active.pitch,
                frequency_hz: active.onset_hz,
                duration_sec,
            });
        } else {
            self.discarded_notes += 1;
        }
    }
}

fn open(pitch: Pitch, frequency_hz: f32, now: f32) -> SegmenterState {
    SegmenterState::Active(ActiveNote {
        pitch,
        onset_sec: now,
        onset_hz: frequency_hz,
        last_hz: frequency_hz,
    })
}

/// Run the state machine over a whole track.
///
/// A note still sounding at the last frame ends one hop after it.
pub fn segment(track: &PitchTrack, config: &SegmentationConfig) -> Vec<NoteEvent> {
    let mut segmenter = NoteSegmenter::new(config);
    for estimate in &track.estimates {
        segmenter.push(estimate);
    }
    let end_sec = track
        .estimates
        .last()
        .map_or(0.0, |e| e.time_sec + track.hop_sec);
    segmenter.finish(end_sec)
}

/// Merge consecutive same-pitch notes separated by less than the gap limit
pub fn suppress_duplicates(notes: Vec<NoteEvent>, config: &SegmentationConfig) -> Vec<NoteEvent> {
    let mut merged: Vec<NoteEvent> = Vec::with_capacity(notes.len());
    for note in notes {
        if let Some(prev) = merged.last_mut() {
            let gap = note.onset_sec - prev.end_sec();
            if prev.pitch == note.pitch && gap < config.duplicate_gap_sec {
                prev.duration_sec = note.end_sec() - prev.onset_sec;
                continue;
            }
        }
        merged.push(note);
    }
    merged
}

/// Nearest grid value; the earlier entry wins a tie
pub fn nearest_grid_value(beats: f32, grid: &[f32]) -> Option<f32> {
    grid.iter()
        .copied()
        .min_by(|a, b| (a - beats).abs().total_cmp(&(b - beats).abs()))
}

/// Snap each duration to the beat grid unless that would shorten it too
/// much or run it into the next onset.
pub fn quantize_durations(
    mut notes: Vec<NoteEvent>,
    tempo_bpm: f32,
    config: &QuantizeConfig,
) -> Vec<NoteEvent> {
    if !config.enabled || config.grid_beats.is_empty() {
        return notes;
    }
    let sec_per_beat = 60.0 / tempo_bpm;
    let next_onsets: Vec<Option<f32>> = (0..notes.len())
        .map(|i| notes.get(i + 1).map(|n| n.onset_sec))
        .collect();

    for (note, next_onset) in notes.iter_mut().zip(next_onsets) {
        let raw = note.duration_sec;
        let Some(snapped_beats) = nearest_grid_value(raw / sec_per_beat, &config.grid_beats) else {
            continue;
        };
        let snapped = snapped_beats * sec_per_beat;

        let shortening_ok = snapped >= (1.0 - config.max_shortening) * raw;
        let overlap_ok = next_onset.map_or(true, |next| note.onset_sec + snapped <= next);
        if shortening_ok && overlap_ok {
            note.duration_sec = snapped;
        }
    }
    notes
}

/// Full segmentation: state machine, duplicate merge, quantization
pub fn segment_notes(track: &PitchTrack, tempo_bpm: f32, config: &Config) -> Vec<NoteEvent> {
    let raw = segment(track, &config.segmentation);
    let raw_count = raw.len();
    let merged = suppress_duplicates(raw, &config.segmentation);
    debug!("  {} raw note(s), {} after merging", raw_count, merged.len());
    quantize_durations(merged, tempo_bpm, &config.quantize)
}

pub fn run(state: &mut AudioState, config: &Config) -> TranscriptionResult<()> {
    info!("Pass 3: Note Segmentation");

    let track = state.pitch_track.as_ref().ok_or_else(|| {
        TranscriptionError::InvalidParameters("Pass 2 must run before Pass 3".to_string())
    })?;

    let notes = segment_notes(track, config.export.tempo_bpm, config);
    info!("  {} note(s)", notes.len());
    for note in &notes {
        debug!(
            "    {} at {:.3}s for {:.3}s",
            note.pitch, note.onset_sec, note.duration_sec
        );
    }
    state.notes = notes;

    info!("  ✓ Pass 3 complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PitchClass;

    #[test]
    fn test_subharmonic_correction() {
        let config = SegmentationConfig::default();

        let (pitch, f) = correct_subharmonic(30.0, &config).unwrap();
        assert_eq!(pitch.octave, 1);
        assert_eq!(f, 60.0);

        let (a4, f) = correct_subharmonic(440.0, &config).unwrap();
        assert_eq!(a4.class, PitchClass::A);
        assert_eq!(f, 440.0);

        // Too low even after doubling
        assert!(correct_subharmonic(10.0, &config).is_err());
        // Above the top octave is never corrected
        assert!(correct_subharmonic(5000.0, &config).is_err());
    }

    #[test]
    fn test_nearest_grid_tie_takes_first() {
        let grid = [4.0, 2.0, 1.0, 0.5, 0.25];
        assert_eq!(nearest_grid_value(0.45, &grid), Some(0.5));
        assert_eq!(nearest_grid_value(1.5, &grid), Some(2.0));
        assert_eq!(nearest_grid_value(100.0, &grid), Some(4.0));
        assert_eq!(nearest_grid_value(1.0, &[]), None);
    }

    #[test]
    fn test_segmenter_empty_track() {
        let config = SegmentationConfig::default();
        let track = PitchTrack {
            estimates: Vec::new(),
            hop_sec: 0.01,
        };
        assert!(segment(&track, &config).is_empty());
    }

    #[test]
    fn test_segmenter_state_transitions() {
        let config = SegmentationConfig::default();
        let mut segmenter = NoteSegmenter::new(&config);
        assert!(!segmenter.is_active());

        segmenter.push(&PitchEstimate::voiced(0.0, 440.0, 0.9));
        assert!(segmenter.is_active());
        segmenter.push(&PitchEstimate::unvoiced(0.2));
        assert!(!segmenter.is_active());

        let notes = segmenter.finish(0.3);
        assert_eq!(notes.len(), 1);
        assert!((notes[0].duration_sec - 0.2).abs() < 1e-6);
    }
}
