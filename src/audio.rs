use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

use rodio::{OutputStream, Source};
use thiserror::Error;

use crate::engine::{Clock, OutputGain};
use crate::model::voice::Waveform;

pub mod synth;
pub mod timing;

use synth::Voice;

/// A single note request: absolute MIDI pitch, start time on the shared
/// clock and length, both in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub midi: i32,
    pub start: f64,
    pub duration: f64,
    pub waveform: Waveform,
}

/// Anything that can turn note requests into sound. Calls are
/// fire-and-forget and must not block.
pub trait ToneGenerator: Send {
    fn play(&mut self, note: Note);
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("opening audio output: {0}")]
    NoDevice(String),
    #[error("spawning audio thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("audio thread exited during startup")]
    ThreadGone,
}

/// Plays notes on the default output device.
///
/// The rodio stream is not `Send`, so it lives on its own thread; notes are
/// handed over a channel and delayed on the mixer until their start time.
pub struct RodioToneGenerator {
    notes: Sender<Note>,
}

impl RodioToneGenerator {
    pub fn start(clock: Arc<dyn Clock>, gain: OutputGain) -> Result<Self, AudioError> {
        let (notes, inbox) = mpsc::channel::<Note>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();

        std::thread::Builder::new()
            .name("tonestep-audio".into())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::NoDevice(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Ends when the generator (the only sender) is dropped.
                for note in inbox {
                    let wait = (note.start - clock.now()).max(0.0);
                    let voice = Voice::new(note, gain.clone())
                        .delay(Duration::from_secs_f64(wait));
                    if let Err(e) = handle.play_raw(voice) {
                        crate::console::error(format!("audio error: {}", e));
                    }
                }
            })?;

        ready_rx.recv().map_err(|_| AudioError::ThreadGone)??;
        Ok(Self { notes })
    }
}

impl ToneGenerator for RodioToneGenerator {
    fn play(&mut self, note: Note) {
        if self.notes.send(note).is_err() {
            crate::console::error("audio thread is gone; note dropped");
        }
    }
}
