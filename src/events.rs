/// A MIDI track event placed on the absolute time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub seconds: f64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
    Tempo { micros_per_quarter: u32 },
    Other,
}

impl TimedEvent {
    pub fn is_note_on(&self) -> bool {
        matches!(self.kind, EventKind::NoteOn { .. })
    }
}

/// A note-on reduced to what the timeline needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub onset_seconds: f64,
}
