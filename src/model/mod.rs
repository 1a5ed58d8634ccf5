pub mod song;
pub mod step;
pub mod tempo;
pub mod voice;

/// Number of step slots in a sequence.
pub const STEPS_COUNT: usize = 16;
