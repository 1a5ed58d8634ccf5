use serde::{Deserialize, Serialize};

pub const OCTAVE_MIN: u8 = 1;
pub const OCTAVE_MAX: u8 = 7;

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Pitch class of the base note, spelled with sharps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoteName {
    #[default]
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

impl NoteName {
    pub const ALL: [NoteName; 12] = [
        NoteName::C,
        NoteName::CSharp,
        NoteName::D,
        NoteName::DSharp,
        NoteName::E,
        NoteName::F,
        NoteName::FSharp,
        NoteName::G,
        NoteName::GSharp,
        NoteName::A,
        NoteName::ASharp,
        NoteName::B,
    ];

    pub fn index(self) -> u8 {
        NoteName::ALL.iter().position(|n| *n == self).unwrap_or(0) as u8
    }

    pub fn from_index(index: usize) -> Option<NoteName> {
        NoteName::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        NOTE_NAMES[self.index() as usize]
    }

    /// Accepts sharp spellings case-insensitively (`c#`, `A`).
    pub fn parse(raw: &str) -> Option<NoteName> {
        let raw = raw.trim();
        NOTE_NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(raw))
            .and_then(NoteName::from_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    #[default]
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Sawtooth,
        Waveform::Triangle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Triangle => "triangle",
        }
    }

    pub fn parse(raw: &str) -> Option<Waveform> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sine" | "sin" => Some(Waveform::Sine),
            "square" | "sq" => Some(Waveform::Square),
            "sawtooth" | "saw" => Some(Waveform::Sawtooth),
            "triangle" | "tri" => Some(Waveform::Triangle),
            _ => None,
        }
    }
}

/// Base pitch and timbre every step is played relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceSettings {
    pub base_note: NoteName,
    base_octave: u8,
    pub waveform: Waveform,
}

impl VoiceSettings {
    pub fn new(base_note: NoteName, base_octave: u8, waveform: Waveform) -> Self {
        Self {
            base_note,
            base_octave: base_octave.clamp(OCTAVE_MIN, OCTAVE_MAX),
            waveform,
        }
    }

    pub fn base_octave(&self) -> u8 {
        self.base_octave
    }

    pub fn set_base_octave(&mut self, octave: u8) {
        self.base_octave = octave.clamp(OCTAVE_MIN, OCTAVE_MAX);
    }

    /// MIDI note number of the base pitch (C4 = 60).
    pub fn base_midi(&self) -> i32 {
        note_to_midi(self.base_note, self.base_octave)
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self::new(NoteName::C, 4, Waveform::Sawtooth)
    }
}

pub fn note_to_midi(note: NoteName, octave: u8) -> i32 {
    note.index() as i32 + (octave as i32 + 1) * 12
}

pub fn midi_note_name(midi: i32) -> String {
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[midi.rem_euclid(12) as usize], octave)
}
