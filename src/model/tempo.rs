use serde::{Deserialize, Serialize};

pub const BPM_MIN: u32 = 40;
pub const BPM_MAX: u32 = 280;

/// Subdivisions of a beat the sequencer can step at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rate {
    #[default]
    Sixteenth,
    EighthTriplet,
    Eighth,
    QuarterTriplet,
    Quarter,
    Half,
    Whole,
}

impl Rate {
    /// All rates, ordered by their share-code index.
    pub const ALL: [Rate; 7] = [
        Rate::Sixteenth,
        Rate::EighthTriplet,
        Rate::Eighth,
        Rate::QuarterTriplet,
        Rate::Quarter,
        Rate::Half,
        Rate::Whole,
    ];

    pub fn notes_per_beat(self) -> f64 {
        match self {
            Rate::Sixteenth => 4.0,
            Rate::EighthTriplet => 3.0,
            Rate::Eighth => 2.0,
            Rate::QuarterTriplet => 1.5,
            Rate::Quarter => 1.0,
            Rate::Half => 0.5,
            Rate::Whole => 0.25,
        }
    }

    pub fn index(self) -> usize {
        Rate::ALL.iter().position(|r| *r == self).unwrap_or(0)
    }

    pub fn from_index(index: usize) -> Option<Rate> {
        Rate::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Rate::Sixteenth => "1/16",
            Rate::EighthTriplet => "1/8t",
            Rate::Eighth => "1/8",
            Rate::QuarterTriplet => "1/4t",
            Rate::Quarter => "1/4",
            Rate::Half => "1/2",
            Rate::Whole => "1/1",
        }
    }

    pub fn parse(raw: &str) -> Option<Rate> {
        let raw = raw.trim();
        Rate::ALL.iter().copied().find(|r| {
            r.label() == raw || r.notes_per_beat().to_string() == raw
        })
    }
}

/// Musical time: beats per minute and steps per beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: u32,
    rate: Rate,
}

impl Tempo {
    pub fn new(bpm: u32, rate: Rate) -> Self {
        Self { bpm: clamp_bpm(bpm), rate }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn set_bpm(&mut self, bpm: u32) {
        self.bpm = clamp_bpm(bpm);
    }

    pub fn adjust_bpm(&mut self, delta: i32) {
        let bpm = (self.bpm as i64 + delta as i64).clamp(BPM_MIN as i64, BPM_MAX as i64);
        self.bpm = bpm as u32;
    }

    pub fn set_rate(&mut self, rate: Rate) {
        self.rate = rate;
    }

    /// Length of one step in seconds.
    pub fn step_duration(&self) -> f64 {
        (60.0 / self.bpm as f64) / self.rate.notes_per_beat()
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(120, Rate::Sixteenth)
    }
}

pub fn clamp_bpm(bpm: u32) -> u32 {
    bpm.clamp(BPM_MIN, BPM_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteenths_at_120_are_125ms() {
        let t = Tempo::new(120, Rate::Sixteenth);
        assert!((t.step_duration() - 0.125).abs() < 1e-12);
    }

    #[test]
    fn triplets_fit_three_per_beat() {
        let t = Tempo::new(60, Rate::EighthTriplet);
        assert!((t.step_duration() * 3.0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bpm_is_clamped() {
        assert_eq!(Tempo::new(10, Rate::Quarter).bpm(), BPM_MIN);
        assert_eq!(Tempo::new(999, Rate::Quarter).bpm(), BPM_MAX);
        let mut t = Tempo::default();
        t.adjust_bpm(-500);
        assert_eq!(t.bpm(), BPM_MIN);
        t.adjust_bpm(10);
        assert_eq!(t.bpm(), BPM_MIN + 10);
    }

    #[test]
    fn rate_index_roundtrips() {
        for (i, rate) in Rate::ALL.iter().enumerate() {
            assert_eq!(rate.index(), i);
            assert_eq!(Rate::from_index(i), Some(*rate));
        }
        assert_eq!(Rate::from_index(7), None);
    }

    #[test]
    fn rate_parses_labels_and_numbers() {
        assert_eq!(Rate::parse("1/8"), Some(Rate::Eighth));
        assert_eq!(Rate::parse("1.5"), Some(Rate::QuarterTriplet));
        assert_eq!(Rate::parse("4"), Some(Rate::Sixteenth));
        assert_eq!(Rate::parse("0.25"), Some(Rate::Whole));
        assert_eq!(Rate::parse("7"), None);
    }
}
