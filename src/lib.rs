//! A 16-step melodic sequencer: a drift-free lookahead scheduler, a small
//! synth voice, melody generation, and YAML/share-code persistence.

pub mod audio;
pub mod console;
pub mod engine;
pub mod melody;
pub mod model;
pub mod repl;
pub mod storage;
