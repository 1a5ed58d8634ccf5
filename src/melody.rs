//! Random melody generation for the preview sequence.
//!
//! A melody is a walk over a pool of scale tones expressed as transposes
//! relative to the current base pitch, so applying it never needs the base
//! pitch to change.

use rand::Rng;

use crate::model::step::Step;
use crate::model::voice::NoteName;
use crate::model::STEPS_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scale {
    #[default]
    Major,
    Minor,
    HarmonicMinor,
    Dorian,
    Mixolydian,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
}

impl Scale {
    pub const ALL: [Scale; 8] = [
        Scale::Major,
        Scale::Minor,
        Scale::HarmonicMinor,
        Scale::Dorian,
        Scale::Mixolydian,
        Scale::MajorPentatonic,
        Scale::MinorPentatonic,
        Scale::Blues,
    ];

    pub fn intervals(self) -> &'static [i32] {
        match self {
            Scale::Major => &[0, 2, 4, 5, 7, 9, 11],
            Scale::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Scale::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Scale::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Scale::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Scale::MajorPentatonic => &[0, 2, 4, 7, 9],
            Scale::MinorPentatonic => &[0, 3, 5, 7, 10],
            Scale::Blues => &[0, 3, 5, 6, 7, 10],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Scale::Major => "major",
            Scale::Minor => "minor",
            Scale::HarmonicMinor => "harmonic-minor",
            Scale::Dorian => "dorian",
            Scale::Mixolydian => "mixolydian",
            Scale::MajorPentatonic => "major-pentatonic",
            Scale::MinorPentatonic => "minor-pentatonic",
            Scale::Blues => "blues",
        }
    }

    pub fn parse(raw: &str) -> Option<Scale> {
        let wanted = raw.trim().to_ascii_lowercase().replace('_', "-");
        Scale::ALL.into_iter().find(|s| s.name() == wanted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Small steps up or down with the occasional repeat.
    #[default]
    SimpleWalk,
    /// Wider pool, half the moves are leaps of two to five scale tones.
    LeapsAndRests,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::SimpleWalk, Algorithm::LeapsAndRests];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::SimpleWalk => "walk",
            Algorithm::LeapsAndRests => "leaps",
        }
    }

    pub fn parse(raw: &str) -> Option<Algorithm> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "walk" | "simple-walk" => Some(Algorithm::SimpleWalk),
            "leaps" | "leaps-and-rests" => Some(Algorithm::LeapsAndRests),
            _ => None,
        }
    }

    fn octave_range(self) -> i32 {
        match self {
            Algorithm::SimpleWalk => 1,
            Algorithm::LeapsAndRests => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MelodyParams {
    pub algorithm: Algorithm,
    pub scale: Scale,
    pub key: NoteName,
    /// Chance, in `[0, 1]`, that a step becomes a rest.
    pub rest_probability: f64,
}

impl Default for MelodyParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::SimpleWalk,
            scale: Scale::Major,
            key: NoteName::C,
            rest_probability: 0.0,
        }
    }
}

/// Scale tones around `base_note` as sorted, distinct transposes that fit
/// the editable step range.
pub fn transpose_pool(params: &MelodyParams, base_note: NoteName) -> Vec<i32> {
    let root = params.key.index() as i32 - base_note.index() as i32;
    let range = params.algorithm.octave_range();
    let mut pool: Vec<i32> = (-range..=range)
        .flat_map(|octave| {
            params
                .scale
                .intervals()
                .iter()
                .map(move |interval| root + octave * 12 + interval)
        })
        .filter(|t| (Step::MIN_TRANSPOSE..=Step::MAX_TRANSPOSE).contains(t))
        .collect();
    pool.sort_unstable();
    pool.dedup();
    pool
}

pub fn generate(params: &MelodyParams, base_note: NoteName, rng: &mut impl Rng) -> Vec<Step> {
    let pool = transpose_pool(params, base_note);
    let last = pool.len().saturating_sub(1);
    let rest_probability = if params.rest_probability.is_nan() {
        0.0
    } else {
        params.rest_probability.clamp(0.0, 1.0)
    };

    // Ties go to the lower transpose.
    let mut at = pool
        .iter()
        .enumerate()
        .min_by_key(|(_, t)| t.abs())
        .map_or(0, |(i, _)| i);

    let mut melody = Vec::with_capacity(STEPS_COUNT);
    for _ in 0..STEPS_COUNT {
        let transpose = pool.get(at).copied().unwrap_or(0);
        if rng.gen_bool(rest_probability) {
            melody.push(Step::rest(transpose));
            continue;
        }
        melody.push(Step::new(transpose, true));
        at = next_index(params.algorithm, at, last, rng);
    }
    melody
}

fn next_index(algorithm: Algorithm, at: usize, last: usize, rng: &mut impl Rng) -> usize {
    let at = at as i64;
    let next = match algorithm {
        Algorithm::SimpleWalk => {
            let roll: f64 = rng.gen();
            if roll < 0.2 {
                at
            } else if roll < 0.6 {
                at + 1
            } else {
                at - 1
            }
        }
        Algorithm::LeapsAndRests => {
            let size = if rng.gen_bool(0.5) { 1 } else { rng.gen_range(2..=5) };
            if rng.gen_bool(0.5) {
                at + size
            } else {
                at - size
            }
        }
    };
    next.clamp(0, last as i64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn major_pool_around_c() {
        let pool = transpose_pool(&MelodyParams::default(), NoteName::C);
        assert_eq!(
            pool,
            vec![-12, -10, -8, -7, -5, -3, -1, 0, 2, 4, 5, 7, 9, 11, 12]
        );
    }

    #[test]
    fn pool_is_relative_to_the_base_note() {
        let params = MelodyParams { key: NoteName::A, scale: Scale::MinorPentatonic, ..MelodyParams::default() };
        let pool = transpose_pool(&params, NoteName::C);
        assert!(pool.contains(&-3));
        assert!(pool.contains(&0));
        assert!(!pool.contains(&1));
        assert!(pool.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn generated_steps_come_from_the_pool() {
        let params = MelodyParams { algorithm: Algorithm::LeapsAndRests, rest_probability: 0.3, ..MelodyParams::default() };
        let pool = transpose_pool(&params, NoteName::D);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let melody = generate(&params, NoteName::D, &mut rng);
            assert_eq!(melody.len(), STEPS_COUNT);
            assert!(melody.iter().all(|s| pool.contains(&s.transpose)));
        }
    }

    #[test]
    fn walk_starts_nearest_the_base_pitch() {
        let mut rng = StdRng::seed_from_u64(1);
        let melody = generate(&MelodyParams::default(), NoteName::C, &mut rng);
        assert_eq!(melody[0], Step::new(0, true));
        for pair in melody.windows(2) {
            let pool = transpose_pool(&MelodyParams::default(), NoteName::C);
            let a = pool.iter().position(|t| *t == pair[0].transpose).unwrap();
            let b = pool.iter().position(|t| *t == pair[1].transpose).unwrap();
            assert!(a.abs_diff(b) <= 1);
        }
    }

    #[test]
    fn rests_hold_the_position() {
        let params = MelodyParams { rest_probability: 1.0, ..MelodyParams::default() };
        let mut rng = StdRng::seed_from_u64(3);
        let melody = generate(&params, NoteName::C, &mut rng);
        assert!(melody.iter().all(|s| !s.enabled && s.transpose == 0));
    }

    #[test]
    fn same_seed_same_melody() {
        let params = MelodyParams::default();
        let a = generate(&params, NoteName::E, &mut StdRng::seed_from_u64(42));
        let b = generate(&params, NoteName::E, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn names_parse_back() {
        for scale in Scale::ALL {
            assert_eq!(Scale::parse(scale.name()), Some(scale));
        }
        for algorithm in Algorithm::ALL {
            assert_eq!(Algorithm::parse(algorithm.name()), Some(algorithm));
        }
        assert_eq!(Scale::parse("harmonic_minor"), Some(Scale::HarmonicMinor));
        assert_eq!(Algorithm::parse("leaps-and-rests"), Some(Algorithm::LeapsAndRests));
    }
}
