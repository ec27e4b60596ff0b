use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use crate::RenderError;
use crate::events::{EventKind, TimedEvent};

const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

#[derive(Debug, Clone)]
pub struct MidiFile {
    ticks_per_quarter: Option<u16>,
    tracks: Vec<Vec<TimedEvent>>,
}

impl MidiFile {
    pub fn open(path: &Path) -> crate::Result<Self> {
        let data = fs::read(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        let smf = Smf::parse(data)?;
        Self::from_smf(&smf)
    }

    pub fn from_smf(smf: &Smf) -> crate::Result<Self> {
        let ticked: Vec<Vec<(u64, EventKind)>> = smf
            .tracks
            .iter()
            .map(|track| {
                let mut tick: u64 = 0;
                track
                    .iter()
                    .map(|event| {
                        tick += event.delta.as_int() as u64;
                        (tick, classify(&event.kind))
                    })
                    .collect()
            })
            .collect();

        let (clock, ticks_per_quarter) = match smf.header.timing {
            Timing::Metrical(tpq) => (
                Clock::Metrical(TempoMap::collect(&ticked, tpq.as_int())),
                Some(tpq.as_int()),
            ),
            Timing::Timecode(fps, subframes) => {
                let ticks_per_second = fps.as_f32() as f64 * subframes as f64;
                if ticks_per_second <= 0.0 {
                    return Err(RenderError::InvalidTiming(format!(
                        "timecode with {} subframes per frame",
                        subframes
                    )));
                }
                (Clock::Timecode(ticks_per_second), None)
            }
        };

        let tracks = ticked
            .into_iter()
            .map(|events| {
                events
                    .into_iter()
                    .map(|(tick, kind)| TimedEvent {
                        seconds: clock.seconds_at(tick),
                        kind,
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            ticks_per_quarter,
            tracks,
        })
    }

    /// `None` for SMPTE timecode files.
    pub fn ticks_per_quarter(&self) -> Option<u16> {
        self.ticks_per_quarter
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&[TimedEvent]> {
        self.tracks.get(index).map(Vec::as_slice)
    }
}

fn classify(kind: &TrackEventKind) -> EventKind {
    match kind {
        TrackEventKind::Midi { message, .. } => match *message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => EventKind::NoteOn {
                pitch: key.as_int(),
                velocity: vel.as_int(),
            },
            // velocity 0 is a note-off
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                EventKind::NoteOff {
                    pitch: key.as_int(),
                }
            }
            _ => EventKind::Other,
        },
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => EventKind::Tempo {
            micros_per_quarter: tempo.as_int(),
        },
        _ => EventKind::Other,
    }
}

enum Clock {
    Metrical(TempoMap),
    /// Ticks per second.
    Timecode(f64),
}

impl Clock {
    fn seconds_at(&self, tick: u64) -> f64 {
        match self {
            Clock::Metrical(map) => map.seconds_at(tick),
            Clock::Timecode(ticks_per_second) => tick as f64 / ticks_per_second,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TempoSegment {
    start_tick: u64,
    start_seconds: f64,
    micros_per_quarter: u32,
}

/// Piecewise-linear tick to seconds mapping built from the tempo events of
/// every track.
struct TempoMap {
    ticks_per_quarter: f64,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    fn collect(tracks: &[Vec<(u64, EventKind)>], ticks_per_quarter: u16) -> Self {
        let mut changes: Vec<(u64, u32)> = tracks
            .iter()
            .flatten()
            .filter_map(|(tick, kind)| match kind {
                EventKind::Tempo { micros_per_quarter } => Some((*tick, *micros_per_quarter)),
                _ => None,
            })
            .collect();
        changes.sort_by_key(|&(tick, _)| tick);
        debug!(tempo_changes = changes.len(), "built tempo map");

        Self::from_changes(ticks_per_quarter.max(1) as f64, &changes)
    }

    fn from_changes(ticks_per_quarter: f64, changes: &[(u64, u32)]) -> Self {
        let mut segments = vec![TempoSegment {
            start_tick: 0,
            start_seconds: 0.0,
            micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
        }];

        for &(tick, micros_per_quarter) in changes {
            let Some(last) = segments.last().copied() else {
                break;
            };
            let start_seconds = last.start_seconds
                + seconds_for_ticks(tick - last.start_tick, last.micros_per_quarter, ticks_per_quarter);
            if tick == last.start_tick {
                segments.pop();
            }
            segments.push(TempoSegment {
                start_tick: tick,
                start_seconds,
                micros_per_quarter,
            });
        }

        Self {
            ticks_per_quarter,
            segments,
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        let idx = self
            .segments
            .partition_point(|segment| segment.start_tick <= tick)
            .saturating_sub(1);
        let segment = self.segments[idx];
        segment.start_seconds
            + seconds_for_ticks(
                tick - segment.start_tick,
                segment.micros_per_quarter,
                self.ticks_per_quarter,
            )
    }
}

fn seconds_for_ticks(ticks: u64, micros_per_quarter: u32, ticks_per_quarter: f64) -> f64 {
    ticks as f64 / ticks_per_quarter * micros_per_quarter as f64 / 1_000_000.0
}
