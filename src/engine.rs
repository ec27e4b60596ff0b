use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::audio::{
    Manifest, PitchSet, SampleVariants, ShiftFailure, VariantNaming, VariantResolver, compose,
    pitch_set, semitone_delta,
};
use crate::midi::MidiFile;
use crate::timing::{Extraction, extract_note_events};
use crate::tools::{Mixer, PitchShifter, force_delete, wav_path};
use crate::{RenderConfig, RenderError, Result};

#[derive(Debug)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: RenderError,
}

/// Files created for one run. Removal is exhaustive and best-effort.
#[derive(Debug)]
pub struct ArtifactSet {
    paths: Vec<PathBuf>,
    fallback_timeout: Duration,
}

impl ArtifactSet {
    pub fn new(fallback_timeout: Duration) -> Self {
        Self {
            paths: Vec::new(),
            fallback_timeout,
        }
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Tries every artifact even after a failure. Removed paths are forgotten;
    /// failed ones stay tracked so a later call retries them.
    pub fn cleanup(&mut self) -> Vec<CleanupFailure> {
        info!(artifacts = self.paths.len(), "cleaning up");
        let mut failures = Vec::new();
        let timeout = self.fallback_timeout;

        self.paths.retain(|path| match remove_artifact(path, timeout) {
            Ok(()) => false,
            Err(error) => {
                error!(path = %path.display(), %error, "failed to delete file");
                failures.push(CleanupFailure {
                    path: path.clone(),
                    error,
                });
                true
            }
        });

        failures
    }
}

fn remove_artifact(path: &Path, timeout: Duration) -> Result<()> {
    let direct = match fs::remove_file(path) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => e,
    };
    warn!(path = %path.display(), error = %direct, "direct removal failed, forcing");

    let forced = force_delete(path, timeout);
    if !path.exists() {
        return Ok(());
    }
    let reason = match forced {
        Ok(()) => direct.to_string(),
        Err(e) => format!("{direct}; {e}"),
    };
    Err(RenderError::ArtifactCleanupFailed {
        path: path.to_path_buf(),
        reason,
    })
}

#[derive(Debug)]
pub struct RenderReport {
    pub track_index: usize,
    pub note_count: usize,
    pub skipped_events: usize,
    pub variants: SampleVariants,
    pub shift_failures: Vec<ShiftFailure>,
    pub missing_variants: Vec<RenderError>,
    pub manifest: Manifest,
    /// `<output>.wav` as handed to the mixer.
    pub output: PathBuf,
    pub mix_error: Option<RenderError>,
    pub cleanup_failures: Vec<CleanupFailure>,
}

impl RenderReport {
    pub fn is_clean(&self) -> bool {
        self.shift_failures.is_empty()
            && self.missing_variants.is_empty()
            && self.mix_error.is_none()
            && self.cleanup_failures.is_empty()
    }
}

/// Owns the temporary artifacts of one run and removes them when done, or
/// when dropped before that.
pub struct Session<'a> {
    config: &'a RenderConfig,
    artifacts: ArtifactSet,
    cleaned: bool,
}

impl<'a> Session<'a> {
    pub fn begin(config: &'a RenderConfig) -> Self {
        Self {
            config,
            artifacts: ArtifactSet::new(config.tool_timeout()),
            cleaned: false,
        }
    }

    pub fn run(
        &mut self,
        extraction: &Extraction,
        shifter: &dyn PitchShifter,
        mixer: &dyn Mixer,
    ) -> Result<RenderReport> {
        let config = self.config;
        let reference = self.materialize_reference()?;

        let naming = variant_naming(config);
        let resolution = VariantResolver {
            base_pitch: config.base_note,
            reference: &reference,
            naming: &naming,
            shifter,
            parallel: config.parallel_shifts,
        }
        .resolve(&pitch_set(&extraction.notes));
        for path in &resolution.requested {
            self.artifacts.track(path);
        }

        let mut missing_variants = resolution.variants.missing();
        for missing in &missing_variants {
            warn!(%missing, "continuing without rendered variant");
        }
        if config.strict_variants && !missing_variants.is_empty() {
            return Err(missing_variants.swap_remove(0));
        }

        self.finish(
            extraction,
            resolution.variants,
            resolution.failures,
            missing_variants,
            mixer,
        )
    }

    fn finish(
        &mut self,
        extraction: &Extraction,
        variants: SampleVariants,
        shift_failures: Vec<ShiftFailure>,
        missing_variants: Vec<RenderError>,
        mixer: &dyn Mixer,
    ) -> Result<RenderReport> {
        let config = self.config;
        let manifest = compose(&extraction.notes, &variants)?;

        let manifest_path = config.manifest_path();
        self.artifacts.track(&manifest_path);
        manifest.write_to(&manifest_path)?;
        info!(entries = manifest.len(), path = %manifest_path.display(), "wrote manifest");

        let mix_error = mixer
            .render(&manifest_path, config.sample_rate, &config.output)
            .err();
        if let Some(error) = &mix_error {
            error!(%error, "mixing failed");
        }

        Ok(RenderReport {
            track_index: extraction.track_index,
            note_count: extraction.notes.len(),
            skipped_events: extraction.skipped,
            variants,
            shift_failures,
            missing_variants,
            manifest,
            output: wav_path(&config.output),
            mix_error,
            cleanup_failures: Vec::new(),
        })
    }

    /// Shifts read from this copy so the operator's file is never an input
    /// to an external tool.
    fn materialize_reference(&mut self) -> Result<PathBuf> {
        let copy = self.config.reference_copy_path();
        self.artifacts.track(&copy);
        fs::copy(&self.config.wavfile, &copy)?;
        Ok(copy)
    }

    pub fn cleanup(&mut self) -> Vec<CleanupFailure> {
        self.cleaned = true;
        self.artifacts.cleanup()
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.cleaned {
            self.cleanup();
        }
    }
}

/// Checks that every input exists before anything is written.
fn check_inputs(config: &RenderConfig) -> Result<()> {
    config.validate()?;
    for path in [&config.input, &config.wavfile] {
        if !path.is_file() {
            return Err(RenderError::InputNotFound(path.clone()));
        }
    }
    if !config.work_dir.is_dir() {
        return Err(RenderError::InputNotFound(config.work_dir.clone()));
    }
    Ok(())
}

fn variant_naming(config: &RenderConfig) -> VariantNaming {
    VariantNaming::for_reference(&config.work_dir, &config.wavfile)
}

/// Every temporary file a run over `pitches` may create.
fn planned_artifacts(config: &RenderConfig, pitches: &PitchSet) -> Vec<PathBuf> {
    let naming = variant_naming(config);
    let mut paths = vec![config.reference_copy_path(), config.manifest_path()];
    paths.extend(
        pitches
            .iter()
            .map(|&pitch| semitone_delta(pitch, config.base_note))
            .filter(|&semitones| semitones != 0)
            .map(|semitones| naming.path_for(semitones)),
    );
    paths
}

/// Absolute form of a path whose file may not exist yet.
fn resolved(path: &Path) -> PathBuf {
    if let Ok(path) = path.canonicalize() {
        return path;
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

/// The operator's inputs and the rendered output must never be one of the
/// files cleanup removes.
fn check_collisions(config: &RenderConfig, pitches: &PitchSet) -> Result<()> {
    let artifacts: Vec<(PathBuf, PathBuf)> = planned_artifacts(config, pitches)
        .into_iter()
        .map(|path| (resolved(&path), path))
        .collect();

    for protected in [
        config.input.clone(),
        config.wavfile.clone(),
        wav_path(&config.output),
    ] {
        let target = resolved(&protected);
        if let Some((_, artifact)) = artifacts.iter().find(|(path, _)| *path == target) {
            return Err(RenderError::ArtifactCollision {
                protected,
                artifact: artifact.clone(),
            });
        }
    }
    Ok(())
}

/// Full pipeline. Configuration errors return before any file is written;
/// after that, cleanup runs whatever happens.
pub fn render(
    config: &RenderConfig,
    shifter: &dyn PitchShifter,
    mixer: &dyn Mixer,
) -> Result<RenderReport> {
    check_inputs(config)?;

    let midi = MidiFile::open(&config.input)?;
    if let Some(tpq) = midi.ticks_per_quarter() {
        info!("Ticks per Quarter Note: {}", tpq);
    }
    if midi.track_count() > 1 {
        info!("TRACKS: {}", midi.track_count());
    }
    let extraction = extract_note_events(&midi, config.midi_track)?;
    check_collisions(config, &pitch_set(&extraction.notes))?;

    let mut session = Session::begin(config);
    let outcome = session.run(&extraction, shifter, mixer);
    let cleanup_failures = session.cleanup();

    let mut report = outcome?;
    report.cleanup_failures = cleanup_failures;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::tests::{end_of_track, note_off, note_on, smf_bytes};
    use crate::tools::fakes::{RecordingMixer, RecordingShifter};

    struct Workspace {
        root: PathBuf,
    }

    impl Workspace {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!("wavable-{}-{}", name, std::process::id()));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(root.join("work")).unwrap();
            Self { root }
        }

        fn work_files(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.root.join("work"))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        /// One melody track after an empty conductor track, plus a third
        /// track so negative indexing has something to skip.
        fn config(&self) -> RenderConfig {
            let midi = smf_bytes(vec![
                vec![end_of_track()],
                vec![note_on(0, 40, 10), end_of_track()],
                vec![
                    note_on(0, 60, 100),
                    note_off(480, 60),
                    note_on(0, 64, 90),
                    note_off(480, 64),
                    note_on(0, 60, 80),
                    note_off(480, 60),
                    end_of_track(),
                ],
            ]);
            fs::write(self.root.join("song.mid"), midi).unwrap();
            fs::write(self.root.join("voice.wav"), b"RIFF....WAVE").unwrap();

            RenderConfig {
                input: self.root.join("song.mid"),
                wavfile: self.root.join("voice.wav"),
                output: self.root.join("out"),
                work_dir: self.root.join("work"),
                tool_timeout_secs: 5,
                ..RenderConfig::default()
            }
        }
    }

    impl Drop for Workspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn renders_melody_and_cleans_up() {
        let ws = Workspace::new("melody");
        let config = ws.config();
        let shifter = RecordingShifter::default();
        let mixer = RecordingMixer::default();

        let report = render(&config, &shifter, &mixer).unwrap();

        assert_eq!(report.track_index, 2);
        assert_eq!(report.note_count, 3);
        assert_eq!(report.skipped_events, 4);
        assert_eq!(shifter.deltas(), vec![4]);
        assert_eq!(report.variants.len(), 2);
        assert!(report.is_clean());

        let work = config.work_dir.clone();
        let manifests = mixer.manifests.lock().unwrap();
        assert_eq!(manifests.len(), 1);
        let expected = format!(
            "{} 0.000000 100\n{} 0.500000 90\n{} 1.000000 80\n",
            work.join("Shift0.wav").display(),
            work.join("voiceShifted4.wav").display(),
            work.join("Shift0.wav").display(),
        );
        assert_eq!(manifests[0], expected);

        let outputs = mixer.outputs.lock().unwrap();
        assert_eq!(outputs[0], (44100, config.output.clone()));
        assert_eq!(report.output, ws.root.join("out.wav"));

        assert!(ws.work_files().is_empty());
        assert!(config.wavfile.exists());
    }

    #[test]
    fn shifts_read_the_working_copy() {
        let ws = Workspace::new("working-copy");
        let config = ws.config();
        let shifter = RecordingShifter::default();

        render(&config, &shifter, &RecordingMixer::default()).unwrap();

        let calls = shifter.calls.lock().unwrap();
        assert_eq!(calls[0].0, config.work_dir.join("Shift0.wav"));
    }

    #[test]
    fn missing_reference_writes_nothing() {
        let ws = Workspace::new("missing-ref");
        let config = RenderConfig {
            wavfile: ws.root.join("nope.wav"),
            ..ws.config()
        };
        let shifter = RecordingShifter::default();
        let mixer = RecordingMixer::default();

        let err = render(&config, &shifter, &mixer).unwrap_err();

        assert!(matches!(err, RenderError::InputNotFound(ref p) if p == &config.wavfile));
        assert!(err.is_configuration_error());
        assert!(ws.work_files().is_empty());
        assert!(shifter.calls.lock().unwrap().is_empty());
        assert!(mixer.manifests.lock().unwrap().is_empty());
    }

    #[test]
    fn bad_track_index_writes_nothing() {
        let ws = Workspace::new("bad-track");
        let config = RenderConfig {
            midi_track: -4,
            ..ws.config()
        };

        let err = render(&config, &RecordingShifter::default(), &RecordingMixer::default())
            .unwrap_err();

        assert!(matches!(err, RenderError::InvalidTrackIndex { index: -4, track_count: 3 }));
        assert!(ws.work_files().is_empty());
    }

    #[test]
    fn failed_shift_still_mixes_and_cleans() {
        let ws = Workspace::new("failed-shift");
        let config = ws.config();
        let shifter = RecordingShifter::failing_on(&[4]);
        let mixer = RecordingMixer::default();

        let report = render(&config, &shifter, &mixer).unwrap();

        assert_eq!(report.shift_failures.len(), 1);
        assert_eq!(report.shift_failures[0].semitones, 4);
        assert!(matches!(
            report.missing_variants[..],
            [RenderError::MissingRenderedVariant { pitch: 64, .. }]
        ));
        let manifests = mixer.manifests.lock().unwrap();
        assert!(manifests[0].contains("voiceShifted4.wav 0.500000 90"));
        assert!(ws.work_files().is_empty());
    }

    #[test]
    fn strict_mode_stops_before_mixing() {
        let ws = Workspace::new("strict");
        let config = RenderConfig {
            strict_variants: true,
            ..ws.config()
        };
        let mixer = RecordingMixer::default();

        let err = render(&config, &RecordingShifter::failing_on(&[4]), &mixer).unwrap_err();

        assert!(matches!(err, RenderError::MissingRenderedVariant { pitch: 64, .. }));
        assert!(mixer.manifests.lock().unwrap().is_empty());
        assert!(ws.work_files().is_empty());
    }

    #[test]
    fn mixer_failure_is_reported_not_fatal() {
        let ws = Workspace::new("mix-fail");
        let config = ws.config();
        let mixer = RecordingMixer {
            fail: true,
            ..RecordingMixer::default()
        };

        let report = render(&config, &RecordingShifter::default(), &mixer).unwrap();

        assert!(matches!(report.mix_error, Some(RenderError::ExternalToolFailed { .. })));
        assert!(ws.work_files().is_empty());
    }

    #[test]
    fn dropped_session_cleans_up() {
        let ws = Workspace::new("drop");
        let config = ws.config();
        {
            let mut session = Session::begin(&config);
            session.materialize_reference().unwrap();
            assert_eq!(ws.work_files(), vec!["Shift0.wav".to_string()]);
        }
        assert!(ws.work_files().is_empty());
    }

    #[test]
    fn cleanup_twice_is_a_no_op() {
        let ws = Workspace::new("cleanup-twice");
        let work = ws.root.join("work");
        let mut artifacts = ArtifactSet::new(Duration::from_secs(5));
        for name in ["a.wav", "b.wav", "w.txt"] {
            fs::write(work.join(name), b"x").unwrap();
            artifacts.track(work.join(name));
        }
        artifacts.track(work.join("never-created.wav"));

        assert!(artifacts.cleanup().is_empty());
        assert!(artifacts.is_empty());
        assert!(ws.work_files().is_empty());

        for name in ["a.wav", "b.wav"] {
            artifacts.track(work.join(name));
        }
        assert!(artifacts.cleanup().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn cleanup_continues_past_failures() {
        let ws = Workspace::new("cleanup-partial");
        let work = ws.root.join("work");
        // a non-empty directory survives both removal attempts
        let stubborn = work.join("stubborn");
        fs::create_dir_all(stubborn.join("inner")).unwrap();
        fs::write(work.join("after.wav"), b"x").unwrap();

        let mut artifacts = ArtifactSet::new(Duration::from_secs(5));
        artifacts.track(&stubborn);
        artifacts.track(work.join("after.wav"));

        let failures = artifacts.cleanup();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, stubborn);
        assert!(matches!(failures[0].error, RenderError::ArtifactCleanupFailed { .. }));
        assert!(!work.join("after.wav").exists());
        assert_eq!(artifacts.paths(), &[stubborn]);
    }

    #[test]
    fn reference_inside_work_dir_is_rejected() {
        let ws = Workspace::new("reference-in-work");
        let base = ws.config();
        let reference = base.work_dir.join("Shift0.wav");
        fs::write(&reference, b"operator sample").unwrap();
        let config = RenderConfig {
            // same file reached through a detour
            wavfile: base.work_dir.join("..").join("work").join("Shift0.wav"),
            ..base
        };
        let shifter = RecordingShifter::default();
        let mixer = RecordingMixer::default();

        let err = render(&config, &shifter, &mixer).unwrap_err();

        assert!(matches!(err, RenderError::ArtifactCollision { .. }));
        assert!(err.is_configuration_error());
        assert_eq!(fs::read(&reference).unwrap(), b"operator sample");
        assert!(shifter.calls.lock().unwrap().is_empty());
        assert!(mixer.manifests.lock().unwrap().is_empty());
    }

    #[test]
    fn output_named_like_an_artifact_is_rejected() {
        let ws = Workspace::new("output-collision");
        let base = ws.config();

        for name in ["Shift0", "voiceShifted4"] {
            let config = RenderConfig {
                output: base.work_dir.join(name),
                ..base.clone()
            };
            let shifter = RecordingShifter::default();

            let err = render(&config, &shifter, &RecordingMixer::default()).unwrap_err();

            match err {
                RenderError::ArtifactCollision { protected, .. } => {
                    assert_eq!(protected, wav_path(&config.output))
                }
                other => panic!("unexpected error {other:?}"),
            }
            assert!(shifter.calls.lock().unwrap().is_empty());
            assert!(ws.work_files().is_empty());
        }
    }

    #[test]
    fn unused_variant_names_do_not_collide() {
        let ws = Workspace::new("unused-variant");
        let base = ws.config();
        // the melody never needs a shift of -5
        let config = RenderConfig {
            output: base.work_dir.join("voiceShifted-5"),
            ..base
        };

        assert!(render(&config, &RecordingShifter::default(), &RecordingMixer::default()).is_ok());
    }
}
