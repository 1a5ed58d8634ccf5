use std::sync::{Arc, Mutex, PoisonError};

/// Time to fade the shared output to silence when playback stops.
pub const FADE_OUT_SECS: f64 = 0.05;
/// Time to bring the output back to unity afterwards.
pub const FADE_IN_SECS: f64 = 0.05;

/// The single gain stage every voice passes through.
///
/// Cloning shares the stage. Only the engine's stop path moves it; voices
/// sample it while rendering.
#[derive(Debug, Clone, Default)]
pub struct OutputGain {
    dip_at: Arc<Mutex<Option<f64>>>,
}

impl OutputGain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a dip to silence starting at `at`, followed by a ramp back
    /// to unity. A new dip replaces the previous one.
    pub fn dip(&self, at: f64) {
        *self.dip_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn value_at(&self, t: f64) -> f32 {
        let dip_at = *self.dip_at.lock().unwrap_or_else(PoisonError::into_inner);
        match dip_at {
            Some(start) => ramp(start, t),
            None => 1.0,
        }
    }
}

fn ramp(start: f64, t: f64) -> f32 {
    let dt = t - start;
    let value = if dt < 0.0 {
        1.0
    } else if dt < FADE_OUT_SECS {
        1.0 - dt / FADE_OUT_SECS
    } else if dt < FADE_OUT_SECS + FADE_IN_SECS {
        (dt - FADE_OUT_SECS) / FADE_IN_SECS
    } else {
        1.0
    };
    value as f32
}
