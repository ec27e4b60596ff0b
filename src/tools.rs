use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::RenderError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub trait PitchShifter: Sync {
    /// Writes `input` transposed by `semitones` to `output`.
    fn shift(&self, input: &Path, output: &Path, semitones: i32) -> Result<(), RenderError>;
}

pub trait Mixer {
    /// Mixes the manifest into `<output>.wav`. `output` carries no extension.
    fn render(&self, manifest: &Path, sample_rate: u32, output: &Path) -> Result<(), RenderError>;
}

#[derive(Debug, Clone)]
pub struct CommandPitchShifter {
    pub program: String,
    pub timeout: Duration,
}

impl CommandPitchShifter {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl PitchShifter for CommandPitchShifter {
    fn shift(&self, input: &Path, output: &Path, semitones: i32) -> Result<(), RenderError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-a")
            .arg(semitones.to_string());
        run_bounded(&self.program, cmd, self.timeout)
    }
}

#[derive(Debug, Clone)]
pub struct CommandMixer {
    pub program: String,
    pub timeout: Duration,
}

impl CommandMixer {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Mixer for CommandMixer {
    fn render(&self, manifest: &Path, sample_rate: u32, output: &Path) -> Result<(), RenderError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(manifest)
            .arg("-s")
            .arg(sample_rate.to_string())
            .arg("-o")
            .arg(wav_path(output));
        run_bounded(&self.program, cmd, self.timeout)
    }
}

/// Appends `.wav` without touching any dot already in the file name.
pub fn wav_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".wav");
    PathBuf::from(name)
}

/// Shell fallback for files the direct removal could not delete.
pub fn force_delete(path: &Path, timeout: Duration) -> Result<(), RenderError> {
    let cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg("del").arg("/f").arg(path);
        cmd
    } else {
        let mut cmd = Command::new("rm");
        cmd.arg("-f").arg(path);
        cmd
    };
    run_bounded("force delete", cmd, timeout)
}

fn run_bounded(tool: &str, mut cmd: Command, timeout: Duration) -> Result<(), RenderError> {
    info!("{:?}", cmd);
    let child = cmd
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| tool_failed(tool, format!("could not start: {e}")))?;

    let status = wait_bounded(child, timeout).map_err(|e| tool_failed(tool, e))?;
    if status.success() {
        Ok(())
    } else {
        warn!(tool, %status, "external tool exited unsuccessfully");
        Err(tool_failed(tool, format!("exited with {status}")))
    }
}

fn wait_bounded(mut child: Child, timeout: Duration) -> Result<ExitStatus, String> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("timed out after {:?}", timeout));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(e.to_string()),
        }
    }
}

fn tool_failed(tool: &str, reason: String) -> RenderError {
    RenderError::ExternalToolFailed {
        tool: tool.to_string(),
        reason,
    }
}
