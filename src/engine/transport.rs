use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{Engine, EngineError};
use crate::model::step::Step;

/// Shared handle to the engine. Every scheduler pass and every edit goes
/// through this one mutex, so a stop can never interleave with a pass.
pub type SharedEngine = Arc<Mutex<Engine>>;

pub fn lock(engine: &SharedEngine) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The coarse timer for one playback session.
struct Ticker {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn(engine: SharedEngine, session: u64, period: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || loop {
            if !lock(&engine).tick_session(session) {
                break;
            }
            match cancelled.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self { cancel, handle }
    }

    fn armed(&self) -> bool {
        !self.handle.is_finished()
    }

    fn cancel(self) {
        let _ = self.cancel.send(());
        if self.handle.join().is_err() {
            crate::console::error("scheduler thread panicked");
        }
    }
}

/// Drives an [`Engine`] in real time: owns the engine handle and a ticker
/// thread per playback session.
pub struct Transport {
    engine: SharedEngine,
    ticker: Option<Ticker>,
}

impl Transport {
    pub fn new(engine: Engine) -> Self {
        Self { engine: Arc::new(Mutex::new(engine)), ticker: None }
    }

    pub fn engine(&self) -> SharedEngine {
        Arc::clone(&self.engine)
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        f(&mut lock(&self.engine))
    }

    pub fn has_ticker(&self) -> bool {
        self.ticker.as_ref().is_some_and(Ticker::armed)
    }

    pub fn play_main(&mut self) -> Result<(), EngineError> {
        let started = {
            let mut engine = lock(&self.engine);
            let before = engine.session();
            let session = engine.start_main()?;
            (session != before).then_some(session)
        };
        if let Some(session) = started {
            self.arm(session);
        }
        Ok(())
    }

    pub fn play_preview(&mut self, melody: Vec<Step>) -> Result<(), EngineError> {
        let session = lock(&self.engine).start_preview(melody)?;
        self.arm(session);
        Ok(())
    }

    /// Returns whether playback is running afterwards.
    pub fn toggle(&mut self) -> Result<bool, EngineError> {
        let started = lock(&self.engine).toggle()?;
        match started {
            Some(session) => {
                self.arm(session);
                Ok(true)
            }
            None => {
                self.disarm();
                Ok(false)
            }
        }
    }

    pub fn stop(&mut self) {
        lock(&self.engine).stop();
        self.disarm();
    }

    pub fn apply_preview(&mut self) -> bool {
        let applied = lock(&self.engine).apply_preview();
        if applied {
            self.disarm();
        }
        applied
    }

    pub fn close_preview(&mut self) -> bool {
        let (closed, playing) = {
            let mut engine = lock(&self.engine);
            (engine.close_preview(), engine.is_playing())
        };
        if !playing {
            self.disarm();
        }
        closed
    }

    fn arm(&mut self, session: u64) {
        self.disarm();
        let period = lock(&self.engine).config().lookahead;
        self.ticker = Some(Ticker::spawn(Arc::clone(&self.engine), session, period));
    }

    // Must not be called with the engine locked: the ticker may be waiting
    // on it and the join would never return.
    fn disarm(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}
