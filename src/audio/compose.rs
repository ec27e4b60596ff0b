use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::SampleVariants;
use crate::RenderError;
use crate::events::NoteEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct CompositionEntry {
    pub sample_path: PathBuf,
    pub onset_seconds: f64,
    pub velocity: u8,
}

impl fmt::Display for CompositionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.6} {}",
            self.sample_path.display(),
            self.onset_seconds,
            self.velocity
        )
    }
}

/// What the mixer plays, in playback order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub entries: Vec<CompositionEntry>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{entry}\n"))
            .collect()
    }

    /// Truncates any manifest left over from an earlier run.
    pub fn write_to(&self, path: &Path) -> Result<(), RenderError> {
        let mut out = BufWriter::new(File::create(path)?);
        for entry in &self.entries {
            writeln!(out, "{entry}")?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Pairs every note with its sample. The variants must already cover every
/// pitch in `notes`.
pub fn compose(notes: &[NoteEvent], variants: &SampleVariants) -> Result<Manifest, RenderError> {
    let entries = notes
        .iter()
        .map(|note| {
            let sample_path = variants
                .get(note.pitch)
                .ok_or(RenderError::UnmappedPitch(note.pitch))?;
            let entry = CompositionEntry {
                sample_path: sample_path.to_path_buf(),
                onset_seconds: note.onset_seconds,
                velocity: note.velocity,
            };
            debug!("{entry}");
            Ok(entry)
        })
        .collect::<Result<Vec<_>, RenderError>>()?;

    Ok(Manifest { entries })
}
