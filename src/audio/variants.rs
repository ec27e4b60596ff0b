use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::semitone_delta;
use crate::RenderError;
use crate::events::NoteEvent;
use crate::tools::PitchShifter;

pub type PitchSet = BTreeSet<u8>;

pub fn pitch_set(notes: &[NoteEvent]) -> PitchSet {
    notes.iter().map(|note| note.pitch).collect()
}

/// Which sample file sounds each pitch.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleVariants {
    base_pitch: u8,
    paths: BTreeMap<u8, PathBuf>,
}

impl SampleVariants {
    pub fn new(base_pitch: u8, reference: PathBuf) -> Self {
        let mut paths = BTreeMap::new();
        paths.insert(base_pitch, reference);
        Self { base_pitch, paths }
    }

    pub(crate) fn insert(&mut self, pitch: u8, path: PathBuf) {
        self.paths.insert(pitch, path);
    }

    pub fn get(&self, pitch: u8) -> Option<&Path> {
        self.paths.get(&pitch).map(PathBuf::as_path)
    }

    pub fn contains(&self, pitch: u8) -> bool {
        self.paths.contains_key(&pitch)
    }

    pub fn pitches(&self) -> PitchSet {
        self.paths.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &Path)> {
        self.paths.iter().map(|(pitch, path)| (*pitch, path.as_path()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Variants other than the reference whose file is not on disk.
    pub fn missing(&self) -> Vec<RenderError> {
        self.iter()
            .filter(|&(pitch, path)| pitch != self.base_pitch && !path.exists())
            .map(|(pitch, path)| RenderError::MissingRenderedVariant {
                pitch,
                path: path.to_path_buf(),
            })
            .collect()
    }
}

/// Deterministic file names for shifted variants: `<dir>/<stem>Shifted<delta>.wav`.
#[derive(Debug, Clone)]
pub struct VariantNaming {
    pub dir: PathBuf,
    pub stem: String,
}

impl VariantNaming {
    /// Names variants after the file stem of the operator's reference wave.
    pub fn for_reference(dir: impl Into<PathBuf>, reference: &Path) -> Self {
        let stem = reference
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sample".to_string());
        Self {
            dir: dir.into(),
            stem,
        }
    }

    pub fn path_for(&self, semitones: i32) -> PathBuf {
        self.dir.join(format!("{}Shifted{}.wav", self.stem, semitones))
    }
}

#[derive(Debug)]
pub struct ShiftFailure {
    pub pitch: u8,
    pub semitones: i32,
    pub path: PathBuf,
    pub error: RenderError,
}

#[derive(Debug)]
pub struct Resolution {
    pub variants: SampleVariants,
    /// Every shifted output that was requested, successful or not.
    pub requested: Vec<PathBuf>,
    pub failures: Vec<ShiftFailure>,
}

struct ShiftJob {
    pitch: u8,
    semitones: i32,
    path: PathBuf,
}

pub struct VariantResolver<'a> {
    pub base_pitch: u8,
    /// Working copy of the reference wave; the input of every shift.
    pub reference: &'a Path,
    pub naming: &'a VariantNaming,
    pub shifter: &'a dyn PitchShifter,
    pub parallel: bool,
}

impl VariantResolver<'_> {
    pub fn resolve(&self, pitches: &PitchSet) -> Resolution {
        let mut variants = SampleVariants::new(self.base_pitch, self.reference.to_path_buf());
        let mut planned: BTreeMap<i32, PathBuf> = BTreeMap::new();
        let mut jobs = Vec::new();

        for &pitch in pitches {
            if variants.contains(pitch) {
                continue;
            }
            let semitones = semitone_delta(pitch, self.base_pitch);
            if semitones == 0 {
                continue;
            }
            let path = planned
                .entry(semitones)
                .or_insert_with(|| {
                    let path = self.naming.path_for(semitones);
                    jobs.push(ShiftJob {
                        pitch,
                        semitones,
                        path: path.clone(),
                    });
                    path
                })
                .clone();
            debug!(pitch, semitones, path = %path.display(), "registered variant");
            variants.insert(pitch, path);
        }

        info!(
            shifts = jobs.len(),
            parallel = self.parallel,
            "generating pitch-shifted variants"
        );
        let results = if self.parallel && jobs.len() > 1 {
            self.run_parallel(&jobs)
        } else {
            jobs.iter().map(|job| self.run(job)).collect()
        };

        let mut failures = Vec::new();
        for (job, result) in jobs.iter().zip(results) {
            if let Err(error) = result {
                warn!(pitch = job.pitch, semitones = job.semitones, %error, "pitch shift failed");
                failures.push(ShiftFailure {
                    pitch: job.pitch,
                    semitones: job.semitones,
                    path: job.path.clone(),
                    error,
                });
            }
        }

        Resolution {
            variants,
            requested: jobs.into_iter().map(|job| job.path).collect(),
            failures,
        }
    }

    fn run(&self, job: &ShiftJob) -> Result<(), RenderError> {
        self.shifter.shift(self.reference, &job.path, job.semitones)
    }

    fn run_parallel(&self, jobs: &[ShiftJob]) -> Vec<Result<(), RenderError>> {
        let joined = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|job| s.spawn(move |_| self.run(job)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|_| Err(panicked())))
                .collect::<Vec<_>>()
        });
        joined.unwrap_or_else(|_| jobs.iter().map(|_| Err(panicked())).collect())
    }
}

fn panicked() -> RenderError {
    RenderError::ExternalToolFailed {
        tool: "pitch shifter".to_string(),
        reason: "worker thread panicked".to_string(),
    }
}
