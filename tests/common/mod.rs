use std::sync::{Arc, Mutex};

use tonestep::audio::{Note, ToneGenerator};
use tonestep::engine::{Clock, Engine, EngineConfig, ManualClock};

/// Captures every note the engine hands to the audio side.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Note>>>);

impl Recorder {
    pub fn notes(&self) -> Vec<Note> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl ToneGenerator for Recorder {
    fn play(&mut self, note: Note) {
        self.0.lock().unwrap().push(note);
    }
}

pub fn engine() -> (Engine, Arc<ManualClock>, Recorder) {
    let clock = Arc::new(ManualClock::new(0.0));
    let rec = Recorder::default();
    let engine = Engine::new(
        EngineConfig::default(),
        clock.clone(),
        Some(Box::new(rec.clone())),
    );
    (engine, clock, rec)
}

/// Advances the clock in lookahead-sized hops, ticking after each one.
pub fn run_until(engine: &mut Engine, clock: &ManualClock, until: f64) {
    while clock.now() < until {
        clock.advance(0.025);
        engine.tick();
    }
}
