use tracing::{debug, info};

use crate::RenderError;
use crate::events::{EventKind, NoteEvent, TimedEvent};
use crate::midi::MidiFile;

/// Note-on events of one track, in the order the track emits them.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub track_index: usize,
    pub notes: Vec<NoteEvent>,
    /// Events that were not note-ons. Diagnostic only.
    pub skipped: usize,
}

/// Negative indices count from the end, so `-1` is the last track.
pub fn resolve_track_index(index: i32, track_count: usize) -> Result<usize, RenderError> {
    let resolved = if index >= 0 {
        index as i64
    } else {
        track_count as i64 + index as i64
    };

    if resolved < 0 || resolved >= track_count as i64 {
        return Err(RenderError::InvalidTrackIndex { index, track_count });
    }
    Ok(resolved as usize)
}

pub fn extract_note_events(midi: &MidiFile, index: i32) -> Result<Extraction, RenderError> {
    let track_index = resolve_track_index(index, midi.track_count())?;
    let events = midi
        .track(track_index)
        .ok_or(RenderError::InvalidTrackIndex {
            index,
            track_count: midi.track_count(),
        })?;

    info!(track = track_index, "selected track");
    let extraction = collect_notes(track_index, events);
    info!(
        notes = extraction.notes.len(),
        skipped = extraction.skipped,
        "skipped events that are not note-on messages"
    );
    Ok(extraction)
}

fn collect_notes(track_index: usize, events: &[TimedEvent]) -> Extraction {
    let mut notes = Vec::new();
    for event in events {
        if let EventKind::NoteOn { pitch, velocity } = event.kind {
            debug!(pitch, velocity, start = event.seconds, "note on");
            notes.push(NoteEvent {
                pitch,
                velocity,
                onset_seconds: event.seconds,
            });
        }
    }

    Extraction {
        track_index,
        skipped: events.len() - notes.len(),
        notes,
    }
}
