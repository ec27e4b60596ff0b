mod extract;

pub use extract::{Extraction, extract_note_events, resolve_track_index};
