//! Compact, URL-safe share codes.
//!
//! Layout of a `v5` code, all fields fixed width except the trailing steps:
//!
//! ```text
//! v5 BB R N O W L EEEE SSSSSSSSSSSSSSSS
//!    |  | | | | | |    `- per step: transpose + 12, base 36
//!    |  | | | | | `- enabled bitmask (bit i = step i), base 36
//!    |  | | | | `- active length, base 36
//!    |  | | | `- waveform: s(ine) q(square) w(saw) t(riangle)
//!    |  | | `- base octave, decimal
//!    |  | `- base note index, base 36
//!    |  `- rate index, decimal
//!    `- bpm, base 36
//! ```

use thiserror::Error;

use crate::model::song::Song;
use crate::model::step::Step;
use crate::model::tempo::{Rate, BPM_MAX, BPM_MIN};
use crate::model::voice::{NoteName, Waveform, OCTAVE_MAX, OCTAVE_MIN};
use crate::model::STEPS_COUNT;

pub const VERSION: &str = "v5";
const HEADER_LEN: usize = 13;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShareError {
    #[error("unsupported share code version {0:?} (expected v5)")]
    UnsupportedVersion(String),
    #[error("share code is too short: {found} characters, need at least 13")]
    Truncated { found: usize },
    #[error("share code may only contain ASCII letters and digits")]
    NotAscii,
    #[error("bad {field} {raw:?}")]
    InvalidDigit { field: &'static str, raw: String },
    #[error("{field} {value} is out of range")]
    OutOfRange { field: &'static str, value: u32 },
}

fn waveform_char(waveform: Waveform) -> char {
    match waveform {
        Waveform::Sine => 's',
        Waveform::Square => 'q',
        Waveform::Sawtooth => 'w',
        Waveform::Triangle => 't',
    }
}

fn waveform_from_char(c: &str) -> Waveform {
    match c {
        "s" => Waveform::Sine,
        "q" => Waveform::Square,
        "t" => Waveform::Triangle,
        _ => Waveform::Sawtooth,
    }
}

fn to_base36(mut value: u32, width: usize) -> String {
    let mut digits = Vec::new();
    loop {
        digits.push(std::char::from_digit(value % 36, 36).unwrap_or('0'));
        value /= 36;
        if value == 0 {
            break;
        }
    }
    while digits.len() < width {
        digits.push('0');
    }
    digits.iter().rev().collect()
}

fn parse_digits(raw: &str, radix: u32, field: &'static str) -> Result<u32, ShareError> {
    let invalid = || ShareError::InvalidDigit { field, raw: raw.to_string() };
    if raw.is_empty() {
        return Err(invalid());
    }
    raw.chars().try_fold(0u32, |acc, c| {
        let digit = c.to_digit(radix).ok_or_else(invalid)?;
        acc.checked_mul(radix)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(invalid)
    })
}

fn in_range(value: u32, lo: u32, hi: u32, field: &'static str) -> Result<u32, ShareError> {
    if (lo..=hi).contains(&value) {
        Ok(value)
    } else {
        Err(ShareError::OutOfRange { field, value })
    }
}

pub fn encode(song: &Song) -> String {
    let song = song.clone().normalized();
    let enabled = song
        .steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.enabled)
        .fold(0u32, |mask, (i, _)| mask | (1 << i));

    let mut out = String::with_capacity(HEADER_LEN + STEPS_COUNT);
    out.push_str(VERSION);
    out.push_str(&to_base36(song.bpm, 2));
    out.push_str(&song.rate.index().to_string());
    out.push_str(&to_base36(u32::from(song.base_note.index()), 1));
    out.push_str(&song.base_octave.to_string());
    out.push(waveform_char(song.waveform));
    out.push_str(&to_base36(song.seq_max as u32, 1));
    out.push_str(&to_base36(enabled, 4));
    for step in &song.steps {
        let shifted = (step.transpose - Step::MIN_TRANSPOSE) as u32;
        out.push_str(&to_base36(shifted, 1));
    }
    out
}

/// Parses a share code. Steps missing from the end keep their defaults;
/// anything past `STEPS_COUNT` is ignored.
pub fn decode(code: &str) -> Result<Song, ShareError> {
    let code = code.trim();
    if !code.is_ascii() {
        return Err(ShareError::NotAscii);
    }
    let version = code.get(..2).unwrap_or(code);
    if version != VERSION {
        return Err(ShareError::UnsupportedVersion(version.to_string()));
    }
    if code.len() < HEADER_LEN {
        return Err(ShareError::Truncated { found: code.len() });
    }

    let bpm = in_range(parse_digits(&code[2..4], 36, "bpm")?, BPM_MIN, BPM_MAX, "bpm")?;
    let rate_index = parse_digits(&code[4..5], 10, "rate")?;
    let rate = Rate::from_index(rate_index as usize)
        .ok_or(ShareError::OutOfRange { field: "rate", value: rate_index })?;
    let note_index = parse_digits(&code[5..6], 36, "note")?;
    let base_note = NoteName::from_index(note_index as usize)
        .ok_or(ShareError::OutOfRange { field: "note", value: note_index })?;
    let base_octave = in_range(
        parse_digits(&code[6..7], 10, "octave")?,
        u32::from(OCTAVE_MIN),
        u32::from(OCTAVE_MAX),
        "octave",
    )? as u8;
    let waveform = waveform_from_char(&code[7..8]);
    let seq_max = in_range(parse_digits(&code[8..9], 36, "length")?, 1, STEPS_COUNT as u32, "length")?;
    let enabled = parse_digits(&code[9..13], 36, "enabled mask")?;

    let mut steps = vec![Step::default(); STEPS_COUNT];
    for (i, step) in steps.iter_mut().enumerate() {
        step.enabled = enabled & (1 << i) != 0;
    }
    let span = (Step::MAX_TRANSPOSE - Step::MIN_TRANSPOSE) as u32;
    for (step, c) in steps.iter_mut().zip(code[HEADER_LEN..].chars()) {
        let shifted = c
            .to_digit(36)
            .ok_or_else(|| ShareError::InvalidDigit { field: "step", raw: c.to_string() })?;
        let shifted = in_range(shifted, 0, span, "step")?;
        step.transpose = shifted as i32 + Step::MIN_TRANSPOSE;
    }

    Ok(Song {
        bpm,
        rate,
        base_note,
        base_octave,
        waveform,
        seq_max: seq_max as usize,
        steps,
    })
}
