use serde::{Deserialize, Serialize};

use super::step::{format_transpose, Step};
use super::tempo::{clamp_bpm, Rate};
use super::voice::{NoteName, Waveform, OCTAVE_MAX, OCTAVE_MIN};
use super::STEPS_COUNT;

/// Everything that gets saved to disk or packed into a share code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub bpm: u32,
    #[serde(default)]
    pub rate: Rate,
    #[serde(default)]
    pub base_note: NoteName,
    #[serde(default = "default_octave")]
    pub base_octave: u8,
    #[serde(default)]
    pub waveform: Waveform,
    pub seq_max: usize,
    pub steps: Vec<Step>,
}

fn default_octave() -> u8 {
    4
}

impl Default for Song {
    fn default() -> Self {
        Self {
            bpm: 120,
            rate: Rate::Sixteenth,
            base_note: NoteName::C,
            base_octave: default_octave(),
            waveform: Waveform::Sawtooth,
            seq_max: STEPS_COUNT,
            steps: vec![Step::default(); STEPS_COUNT],
        }
    }
}

impl Song {
    /// Clamps every field into the range the engine accepts and pads or
    /// truncates the step list to exactly `STEPS_COUNT` entries.
    pub fn normalized(mut self) -> Self {
        self.bpm = clamp_bpm(self.bpm);
        self.base_octave = self.base_octave.clamp(OCTAVE_MIN, OCTAVE_MAX);
        self.seq_max = self.seq_max.clamp(1, STEPS_COUNT);
        self.steps.truncate(STEPS_COUNT);
        self.steps.resize(STEPS_COUNT, Step::default());
        for step in &mut self.steps {
            *step = Step::new(step.transpose, step.enabled);
        }
        self
    }

    pub fn list(&self) -> String {
        let mut out = format!(
            "bpm {}  rate {}  base {}{}  wave {}  len {}\n",
            self.bpm,
            self.rate.label(),
            self.base_note.as_str(),
            self.base_octave,
            self.waveform.as_str(),
            self.seq_max,
        );
        for (i, step) in self.steps.iter().enumerate() {
            let marker = if i < self.seq_max { ' ' } else { '~' };
            out.push_str(&format!(
                "{:>2}{} {:>3} {}\n",
                i + 1,
                marker,
                format_transpose(step.transpose),
                if step.enabled { "on" } else { "off" },
            ));
        }
        out
    }
}
