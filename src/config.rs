use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("could not serialize config: {0}")]
    Serialize(#[from] ron::Error),

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("sample rate must be positive")]
    InvalidSampleRate,

    #[error("base note {0} is not a MIDI pitch")]
    InvalidBaseNote(u8),
}

/// Everything one render needs. Paths are relative to the process working
/// directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub input: PathBuf,
    pub wavfile: PathBuf,
    /// Rendered file, without the `.wav` extension.
    pub output: PathBuf,
    /// Negative counts from the last track.
    pub midi_track: i32,
    pub sample_rate: u32,
    pub base_note: u8,
    /// Where the working copy, shifted variants and manifest are written.
    pub work_dir: PathBuf,
    pub manifest_name: String,
    pub shift_program: String,
    pub mix_program: String,
    pub tool_timeout_secs: u64,
    pub parallel_shifts: bool,
    /// Abort before mixing when a shifted variant was not produced.
    pub strict_variants: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            wavfile: PathBuf::new(),
            output: PathBuf::new(),
            midi_track: -1,
            sample_rate: 44100,
            base_note: 60,
            work_dir: PathBuf::from("."),
            manifest_name: "w.txt".to_string(),
            shift_program: "pitch".to_string(),
            mix_program: "wavCompositorExtended".to_string(),
            tool_timeout_secs: 300,
            parallel_shifts: false,
            strict_variants: false,
        }
    }
}

impl RenderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let config: RenderConfig = ron::from_str(&ron_string)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.as_os_str().is_empty() {
            return Err(ConfigError::Missing("input MIDI file"));
        }
        if self.wavfile.as_os_str().is_empty() {
            return Err(ConfigError::Missing("reference wav file"));
        }
        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::Missing("output path"));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if self.base_note > 127 {
            return Err(ConfigError::InvalidBaseNote(self.base_note));
        }
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join(&self.manifest_name)
    }

    pub fn reference_copy_path(&self) -> PathBuf {
        self.work_dir.join("Shift0.wav")
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
