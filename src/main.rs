use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wavable::tools::{CommandMixer, CommandPitchShifter};
use wavable::{RenderConfig, render};

/// Render a MIDI melody by pitch-shifting one reference wav per note.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input MIDI file
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Wav file used as the reference sample
    #[arg(short = 'w', long = "wavfile")]
    wavfile: Option<PathBuf>,

    /// Output file, without the .wav extension
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Track number to render (-1 means the last track)
    #[arg(short = 't', long = "midiTrack", allow_negative_numbers = true)]
    midi_track: Option<i32>,

    /// Sample rate of the rendered file
    #[arg(short = 's', long = "sampleRate")]
    sample_rate: Option<u32>,

    /// Pitch the reference sample is tuned to (60 -> C4)
    #[arg(short = 'B', long = "baseNote")]
    base_note: Option<u8>,

    /// RON file with defaults for every option
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Run pitch shifts for different intervals concurrently
    #[arg(long)]
    parallel: bool,

    /// Fail instead of mixing when a shifted sample is missing
    #[arg(long)]
    strict: bool,
}

impl Args {
    fn into_config(self) -> Result<RenderConfig, wavable::ConfigError> {
        let mut config = match &self.config {
            Some(path) => RenderConfig::load(path)?,
            None => RenderConfig::default(),
        };
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(wavfile) = self.wavfile {
            config.wavfile = wavfile;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(track) = self.midi_track {
            config.midi_track = track;
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(note) = self.base_note {
            config.base_note = note;
        }
        config.parallel_shifts |= self.parallel;
        config.strict_variants |= self.strict;
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        input = %config.input.display(),
        wavfile = %config.wavfile.display(),
        output = %config.output.display(),
        track = config.midi_track,
        sample_rate = config.sample_rate,
        base_note = config.base_note,
        "configuration"
    );

    let shifter = CommandPitchShifter::new(&config.shift_program, config.tool_timeout());
    let mixer = CommandMixer::new(&config.mix_program, config.tool_timeout());

    match render(&config, &shifter, &mixer) {
        Ok(report) => {
            if report.is_clean() {
                info!(notes = report.note_count, output = %report.output.display(), "render finished");
            } else {
                warn!(
                    notes = report.note_count,
                    shift_failures = report.shift_failures.len(),
                    missing_variants = report.missing_variants.len(),
                    mix_failed = report.mix_error.is_some(),
                    cleanup_failures = report.cleanup_failures.len(),
                    "render finished with problems"
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
