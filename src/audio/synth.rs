use std::f32::consts::TAU;
use std::time::Duration;

use rodio::Source;

use super::timing::{envelope, midi_to_freq};
use super::Note;
use crate::engine::OutputGain;
use crate::model::voice::Waveform;

pub const SAMPLE_RATE: u32 = 44_100;

// The shared gain sits behind a mutex; re-read it every few samples only.
const GAIN_REFRESH: u64 = 64;

/// One oscillator with its own envelope, fed through the shared output gain.
pub struct Voice {
    waveform: Waveform,
    phase: f32,
    phase_step: f32,
    start: f64,
    duration: f64,
    sample: u64,
    total_samples: u64,
    gain: OutputGain,
    gain_now: f32,
}

impl Voice {
    pub fn new(note: Note, gain: OutputGain) -> Self {
        let duration = note.duration.max(0.0);
        Self {
            waveform: note.waveform,
            phase: 0.0,
            phase_step: midi_to_freq(note.midi) / SAMPLE_RATE as f32,
            start: note.start,
            duration,
            sample: 0,
            total_samples: (duration * SAMPLE_RATE as f64).round() as u64,
            gain,
            gain_now: 1.0,
        }
    }

    fn oscillator(&self) -> f32 {
        let p = self.phase;
        match self.waveform {
            Waveform::Sine => (p * TAU).sin(),
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * p - 1.0,
            Waveform::Triangle => 4.0 * (p - 0.5).abs() - 1.0,
        }
    }
}

impl Iterator for Voice {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.sample >= self.total_samples {
            return None;
        }
        let t = self.sample as f64 / SAMPLE_RATE as f64;
        if self.sample % GAIN_REFRESH == 0 {
            self.gain_now = self.gain.value_at(self.start + t);
        }
        let out = self.oscillator() * envelope(t, self.duration) * self.gain_now;
        self.phase = (self.phase + self.phase_step).fract();
        self.sample += 1;
        Some(out)
    }
}

impl Source for Voice {
    fn current_frame_len(&self) -> Option<usize> {
        Some((self.total_samples - self.sample) as usize)
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(self.duration))
    }
}
