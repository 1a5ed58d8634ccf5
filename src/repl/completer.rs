//! Tab completion and usage hints for the tonestep REPL.

use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::borrow::Cow;
use std::path::Path;

use crate::melody::{Algorithm, Scale};
use crate::model::tempo::Rate;
use crate::model::voice::{NoteName, Waveform};

/// REPL helper providing command, value and song file completion.
pub struct StepHelper;

impl StepHelper {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StepHelper {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands available in the REPL, with their argument synopsis.
const COMMANDS: &[(&str, &str)] = &[
    ("play", ""),
    ("stop", ""),
    ("bpm", " <n>|+<n>|-<n>"),
    ("rate", " <1/16|1/8t|1/8|1/4t|1/4|1/2|1/1>"),
    ("note", " <C..B>"),
    ("octave", " <1..7>"),
    ("wave", " <sine|square|sawtooth|triangle>"),
    ("len", " <1..16>"),
    ("step", " <i> <transpose>"),
    ("on", " <i>"),
    ("off", " <i>"),
    ("toggle", " <i>"),
    ("reset", " <i>"),
    ("swap", " <i> <j>"),
    ("audition", " <transpose>"),
    ("gen", " [walk|leaps] [scale] [key] [rest%] [seed]"),
    ("apply", ""),
    ("discard", ""),
    ("share", ""),
    ("load", " <code>"),
    ("save", " <file.yaml>"),
    ("open", " <file.yaml>"),
    ("show", ""),
];

/// Meta commands (prefixed with :).
const META_COMMANDS: &[&str] = &[":help", ":q", ":quit", ":live", ":live on", ":live off"];

fn value_candidates(command: &str) -> Vec<String> {
    match command {
        "rate" => Rate::ALL.iter().map(|r| r.label().to_string()).collect(),
        "note" => NoteName::ALL.iter().map(|n| n.as_str().to_string()).collect(),
        "wave" => Waveform::ALL.iter().map(|w| w.as_str().to_string()).collect(),
        "gen" => Algorithm::ALL
            .iter()
            .map(|a| a.name().to_string())
            .chain(Scale::ALL.iter().map(|s| s.name().to_string()))
            .collect(),
        "save" | "open" => scan_song_files(Path::new(".")),
        _ => Vec::new(),
    }
}

/// YAML files in `dir`, sorted.
fn scan_song_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    let mut files: Vec<String> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| is_song_file(p))
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();
    files.sort();
    files
}

fn is_song_file(path: &Path) -> bool {
    let Some(ext) = path.extension() else { return false };
    let ext = ext.to_string_lossy().to_lowercase();
    matches!(ext.as_str(), "yaml" | "yml")
}

fn pairs<'a>(items: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<Pair> {
    items
        .filter(|c| c.starts_with(prefix))
        .map(|c| Pair { display: c.to_string(), replacement: c.to_string() })
        .collect()
}

impl Completer for StepHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line_to_pos = &line[..pos];

        if line_to_pos.starts_with(':') {
            return Ok((0, pairs(META_COMMANDS.iter().copied(), line_to_pos)));
        }

        let words: Vec<&str> = line_to_pos.split_whitespace().collect();
        if words.is_empty() || (words.len() == 1 && !line_to_pos.ends_with(' ')) {
            let prefix = words.first().copied().unwrap_or("");
            return Ok((0, pairs(COMMANDS.iter().map(|(c, _)| *c), prefix)));
        }

        let (start, prefix) = if line_to_pos.ends_with(' ') {
            (pos, "")
        } else {
            let last = words.last().copied().unwrap_or("");
            (pos - last.len(), last)
        };
        let candidates = value_candidates(words[0]);
        Ok((start, pairs(candidates.iter().map(String::as_str), prefix)))
    }
}

impl Hinter for StepHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<Self::Hint> {
        if pos != line.len() || line.contains(' ') {
            return None;
        }
        COMMANDS
            .iter()
            .find(|(c, _)| *c == line)
            .filter(|(_, usage)| !usage.is_empty())
            .map(|(_, usage)| usage.to_string())
    }
}

impl Highlighter for StepHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        // Dim the hint
        Cow::Owned(format!("\x1b[90m{}\x1b[0m", hint))
    }
}

impl Validator for StepHelper {}

impl Helper for StepHelper {}
