mod compose;
mod variants;

pub use compose::{CompositionEntry, Manifest, compose};
pub use variants::{
    PitchSet, Resolution, SampleVariants, ShiftFailure, VariantNaming, VariantResolver, pitch_set,
};

pub fn semitone_delta(pitch: u8, base_pitch: u8) -> i32 {
    pitch as i32 - base_pitch as i32
}
