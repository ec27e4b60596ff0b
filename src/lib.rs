pub mod audio;
mod config;
mod engine;
mod events;
pub mod midi;
pub mod timing;
pub mod tools;

use std::path::PathBuf;

pub use config::{ConfigError, RenderConfig};
pub use engine::{ArtifactSet, CleanupFailure, RenderReport, Session, render};
pub use events::{EventKind, NoteEvent, TimedEvent};
pub use midi::MidiFile;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("track index {index} is out of range for a file with {track_count} track(s)")]
    InvalidTrackIndex { index: i32, track_count: usize },

    #[error(
        "{} would be overwritten or removed as temporary file {}",
        .protected.display(),
        .artifact.display()
    )]
    ArtifactCollision { protected: PathBuf, artifact: PathBuf },

    #[error("unusable MIDI timing: {0}")]
    InvalidTiming(String),

    #[error("{tool} failed: {reason}")]
    ExternalToolFailed { tool: String, reason: String },

    #[error("rendered variant for pitch {pitch} is missing: {}", .path.display())]
    MissingRenderedVariant { pitch: u8, path: PathBuf },

    #[error("failed to remove temporary artifact {}: {reason}", .path.display())]
    ArtifactCleanupFailed { path: PathBuf, reason: String },

    #[error("no sample registered for pitch {0}")]
    UnmappedPitch(u8),

    #[error("MIDI error: {0}")]
    Midi(#[from] midly::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RenderError {
    /// Errors raised before any temporary artifact exists.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RenderError::InputNotFound(_)
                | RenderError::InvalidTrackIndex { .. }
                | RenderError::ArtifactCollision { .. }
                | RenderError::InvalidTiming(_)
                | RenderError::Midi(_)
                | RenderError::Config(_)
        )
    }
}
