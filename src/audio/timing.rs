// --- Pitch and envelope helpers (pure, testable) ---

/// Seconds from note start to the sustain level.
pub const ATTACK_SECS: f64 = 0.01;
/// Seconds from sustain to silence at the end of a note.
pub const RELEASE_SECS: f64 = 0.05;
/// Per-voice level after the attack.
pub const SUSTAIN_LEVEL: f32 = 0.4;
/// Notes never get shorter than this, however small the step.
pub const MIN_NOTE_SECS: f64 = 0.01;

pub fn midi_to_freq(midi: i32) -> f32 {
    440.0 * 2f32.powf((midi - 69) as f32 / 12.0)
}

/// Playable length of a note that fills one step.
pub fn note_duration(step_duration: f64, release_margin: f64) -> f64 {
    (step_duration - release_margin).max(MIN_NOTE_SECS)
}

/// Envelope level `t` seconds into a note lasting `duration` seconds.
///
/// Linear attack to `SUSTAIN_LEVEL`, hold, then a linear release that ends
/// exactly at `duration`. Short notes squeeze the attack and release so
/// they still fit.
pub fn envelope(t: f64, duration: f64) -> f32 {
    if t < 0.0 || t >= duration {
        return 0.0;
    }
    let attack = ATTACK_SECS.min(duration / 4.0);
    let release = RELEASE_SECS.min(duration / 2.0);
    let level = if t < attack {
        t / attack
    } else if t > duration - release {
        (duration - t) / release
    } else {
        1.0
    };
    level as f32 * SUSTAIN_LEVEL
}
