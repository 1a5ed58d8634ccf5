use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustyline::{error::ReadlineError, history::DefaultHistory, Editor, ExternalPrinter};

use crate::console;
use crate::engine::transport::{lock, SharedEngine, Transport};
use crate::engine::{Highlight, LengthChange, PlaybackMode, PlaybackState};
use crate::melody::{self, Algorithm, MelodyParams, Scale};
use crate::model::step::{format_transpose, Role, Step};
use crate::model::tempo::Rate;
use crate::model::voice::{NoteName, Waveform, OCTAVE_MAX, OCTAVE_MIN};
use crate::model::STEPS_COUNT;
use crate::storage::{share, song as song_io};

mod completer;
use completer::StepHelper;

/// Everything a REPL line can act on.
pub struct Session {
    transport: Transport,
    melody: MelodyParams,
    rng: StdRng,
}

impl Session {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            melody: MelodyParams::default(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }
}

pub fn run_repl(session: &mut Session) -> Result<()> {
    let mut rl = Editor::<StepHelper, DefaultHistory>::new()?;
    rl.set_helper(Some(StepHelper::new()));

    // Install external printer so background logs don't break the input line
    if let Ok(pr) = rl.create_external_printer() {
        let printer = StdMutex::new(pr);
        set_external_printer(Some(Box::new(move |s: String| {
            if let Ok(mut g) = printer.lock() {
                let _ = g.print(s);
            }
        })));
    }
    start_log_forwarder();

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str())?;
                match handle_line(session, &line) {
                    Ok(Output::None) => {}
                    Ok(Output::Text(t)) => println!("{}", t),
                    Ok(Output::Quit) => break,
                    Err(e) => eprintln!("error: {:#}", e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("repl error: {}", err);
                break;
            }
        }
    }
    println!("bye");
    set_live_view(false);
    FORWARD_LOGS.store(false, Ordering::SeqCst);
    session.transport_mut().stop();
    // clear external printer on exit
    set_external_printer(None);
    Ok(())
}

#[derive(Debug)]
enum Output {
    None,
    Text(String),
    Quit,
}

fn handle_line(session: &mut Session, line: &str) -> Result<Output> {
    let l = line.trim();
    if let Some(rest) = l.strip_prefix(':') {
        return handle_meta(session, rest);
    }

    let words = shlex::split(l).ok_or_else(|| anyhow!("unbalanced quotes"))?;
    let mut parts = words.into_iter();
    let cmd: String = parts.next().unwrap_or_default();
    let args: Vec<String> = parts.collect();

    match cmd.as_str() {
        "" => Ok(Output::None),
        "play" => {
            session.transport.play_main()?;
            Ok(Output::Text("playing".into()))
        }
        "stop" => {
            session.transport.stop();
            Ok(Output::Text("stopped".into()))
        }
        "bpm" => {
            let raw = arg(&args, 0, "bpm <n> | bpm +<n> | bpm -<n>")?;
            let bpm = if raw.starts_with('+') || raw.starts_with('-') {
                let delta: i32 = raw.parse().with_context(|| format!("bad bpm change {:?}", raw))?;
                session.transport.with_engine(|e| e.adjust_bpm(delta))
            } else {
                let bpm: u32 = raw.parse().with_context(|| format!("bad bpm {:?}", raw))?;
                session.transport.with_engine(|e| e.set_bpm(bpm))
            };
            Ok(Output::Text(format!("bpm {}", bpm)))
        }
        "rate" => {
            let raw = arg(&args, 0, "rate <1/16|1/8t|1/8|1/4t|1/4|1/2|1/1>")?;
            let rate = Rate::parse(raw).ok_or_else(|| anyhow!("unknown rate {:?}", raw))?;
            session.transport.with_engine(|e| e.set_rate(rate));
            Ok(Output::Text(format!("rate {}", rate.label())))
        }
        "note" => {
            let raw = arg(&args, 0, "note <C|C#|D|..|B>")?;
            let note = NoteName::parse(raw).ok_or_else(|| anyhow!("unknown note {:?}", raw))?;
            let octave = session.transport.with_engine(|e| {
                e.set_base_note(note);
                e.voice().base_octave()
            });
            Ok(Output::Text(format!("base note {}{}", note.as_str(), octave)))
        }
        "octave" => {
            let raw = arg(&args, 0, "octave <1..7>")?;
            let octave: u8 = raw.parse().with_context(|| format!("bad octave {:?}", raw))?;
            if !(OCTAVE_MIN..=OCTAVE_MAX).contains(&octave) {
                bail!("octave must be between {} and {}", OCTAVE_MIN, OCTAVE_MAX);
            }
            let note = session.transport.with_engine(|e| {
                e.set_base_octave(octave);
                e.voice().base_note
            });
            Ok(Output::Text(format!("base note {}{}", note.as_str(), octave)))
        }
        "wave" => {
            let raw = arg(&args, 0, "wave <sine|square|sawtooth|triangle>")?;
            let wave = Waveform::parse(raw).ok_or_else(|| anyhow!("unknown waveform {:?}", raw))?;
            session.transport.with_engine(|e| e.set_waveform(wave));
            Ok(Output::Text(format!("wave {}", wave.as_str())))
        }
        "len" => {
            let raw = arg(&args, 0, "len <1..16>")?;
            let len: usize = raw.parse().with_context(|| format!("bad length {:?}", raw))?;
            if !(1..=STEPS_COUNT).contains(&len) {
                bail!("length must be between 1 and {}", STEPS_COUNT);
            }
            let msg = match session.transport.with_engine(|e| e.set_seq_max(len)) {
                LengthChange::Applied(n) => format!("length {}", n),
                LengthChange::Deferred(n) => format!("length {} at the end of the bar", n),
            };
            Ok(Output::Text(msg))
        }
        "step" => {
            let usage = "step <i> <transpose>";
            let i = parse_step_index(arg(&args, 0, usage)?)?;
            let t = parse_transpose(arg(&args, 1, usage)?)?;
            session.transport.with_engine(|e| e.set_step_transpose(i, t));
            Ok(Output::Text(format!("step {} {}", i + 1, format_transpose(t))))
        }
        "on" | "off" | "toggle" => {
            let i = parse_step_index(arg(&args, 0, &format!("{} <i>", cmd))?)?;
            let enabled = session.transport.with_engine(|e| {
                match cmd.as_str() {
                    "on" => e.set_step_enabled(i, true),
                    "off" => e.set_step_enabled(i, false),
                    _ => e.toggle_step(i),
                };
                e.store().get_step(Role::Main, i).map_or(false, |s| s.enabled)
            });
            Ok(Output::Text(format!("step {} {}", i + 1, on_off(enabled))))
        }
        "reset" => {
            let i = parse_step_index(arg(&args, 0, "reset <i>")?)?;
            session.transport.with_engine(|e| e.reset_step(i));
            Ok(Output::Text(format!("step {} reset", i + 1)))
        }
        "swap" => {
            let usage = "swap <i> <j>";
            let i = parse_step_index(arg(&args, 0, usage)?)?;
            let j = parse_step_index(arg(&args, 1, usage)?)?;
            session.transport.with_engine(|e| e.swap_steps(i, j));
            Ok(Output::Text(format!("swapped steps {} and {}", i + 1, j + 1)))
        }
        "audition" => {
            let t = match args.first() {
                Some(raw) => parse_transpose(raw)?,
                None => 0,
            };
            session.transport.with_engine(|e| e.audition(t))?;
            Ok(Output::None)
        }
        "gen" => generate(session, &args),
        "apply" => {
            if !session.transport.apply_preview() {
                bail!("no preview to apply (use gen first)");
            }
            Ok(Output::Text("preview applied".into()))
        }
        "discard" => {
            let msg = if session.transport.close_preview() {
                "preview discarded"
            } else {
                "no preview"
            };
            Ok(Output::Text(msg.into()))
        }
        "share" => {
            let song = session.transport.with_engine(|e| e.song());
            Ok(Output::Text(share::encode(&song)))
        }
        "load" => {
            let code = arg(&args, 0, "load <code>")?;
            let song = share::decode(code)?;
            session.transport.with_engine(|e| e.load_song(&song));
            Ok(Output::Text(format!("loaded {}", summary(&song))))
        }
        "save" => {
            let path = arg(&args, 0, "save <file.yaml>")?;
            let song = session.transport.with_engine(|e| e.song());
            song_io::save(&song, path)?;
            Ok(Output::Text(format!("saved to {}", path)))
        }
        "open" => {
            let path = arg(&args, 0, "open <file.yaml>")?;
            let song = song_io::open(path)?;
            session.transport.with_engine(|e| e.load_song(&song));
            Ok(Output::Text(format!("opened {}: {}", path, summary(&song))))
        }
        "show" => Ok(Output::Text(show(session))),
        other => bail!("unknown command {:?} (try :help)", other),
    }
}

fn generate(session: &mut Session, args: &[String]) -> Result<Output> {
    let (params, seed) = parse_gen_args(session.melody, args)?;
    session.melody = params;
    let base_note = session.transport.with_engine(|e| e.voice().base_note);
    let steps = match seed {
        Some(seed) => melody::generate(&params, base_note, &mut StdRng::seed_from_u64(seed)),
        None => melody::generate(&params, base_note, &mut session.rng),
    };
    let rendered = render_steps(&steps);
    let heading = format!(
        "{} {} in {}, {:.0}% rests",
        params.algorithm.name(),
        params.scale.name(),
        params.key.as_str(),
        params.rest_probability * 100.0
    );
    match session.transport.play_preview(steps) {
        Ok(()) => Ok(Output::Text(format!("previewing {}\n{}", heading, rendered))),
        Err(e) => Ok(Output::Text(format!(
            "generated {} (not played: {})\n{}",
            heading, e, rendered
        ))),
    }
}

/// Arguments may come in any order; each is recognized by its shape.
fn parse_gen_args(mut params: MelodyParams, args: &[String]) -> Result<(MelodyParams, Option<u64>)> {
    let mut seed = None;
    for raw in args {
        if let Some(pct) = raw.strip_suffix('%') {
            let pct: f64 = pct.parse().with_context(|| format!("bad rest chance {:?}", raw))?;
            if !(0.0..=100.0).contains(&pct) {
                bail!("rest chance must be between 0% and 100%");
            }
            params.rest_probability = pct / 100.0;
        } else if let Some(algorithm) = Algorithm::parse(raw) {
            params.algorithm = algorithm;
        } else if let Some(scale) = Scale::parse(raw) {
            params.scale = scale;
        } else if let Some(key) = NoteName::parse(raw) {
            params.key = key;
        } else if let Ok(n) = raw.parse::<u64>() {
            seed = Some(n);
        } else {
            bail!("gen: {:?} is not an algorithm, scale, key, rest% or seed", raw);
        }
    }
    Ok((params, seed))
}

fn arg<'a>(args: &'a [String], i: usize, usage: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("usage: {}", usage))
}

fn parse_step_index(raw: &str) -> Result<usize> {
    let idx: usize = raw.parse().with_context(|| format!("bad step {:?}", raw))?;
    if idx == 0 || idx > STEPS_COUNT {
        bail!("step must be between 1 and {}", STEPS_COUNT);
    }
    Ok(idx - 1)
}

fn parse_transpose(raw: &str) -> Result<i32> {
    let t: i32 = raw.parse().with_context(|| format!("bad transpose {:?}", raw))?;
    if !(Step::MIN_TRANSPOSE..=Step::MAX_TRANSPOSE).contains(&t) {
        bail!(
            "transpose must be between {} and +{}",
            Step::MIN_TRANSPOSE,
            Step::MAX_TRANSPOSE
        );
    }
    Ok(t)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn summary(song: &crate::model::song::Song) -> String {
    format!(
        "{} bpm {}, {}{} {}, length {}",
        song.bpm,
        song.rate.label(),
        song.base_note.as_str(),
        song.base_octave,
        song.waveform.as_str(),
        song.seq_max
    )
}

fn render_steps(steps: &[Step]) -> String {
    steps
        .iter()
        .map(|s| {
            if s.enabled {
                format!("{:>3}", format_transpose(s.transpose))
            } else {
                " --".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn state_label(state: PlaybackState) -> &'static str {
    match state {
        PlaybackState::Stopped => "stopped",
        PlaybackState::Playing(PlaybackMode::Main) => "playing",
        PlaybackState::Playing(PlaybackMode::Preview) => "previewing",
    }
}

fn show(session: &Session) -> String {
    session.transport.with_engine(|e| {
        let mut out = format!("[{}]", state_label(e.state()));
        if !e.audio_available() {
            out.push_str(" (no audio output)");
        }
        if let Some(len) = e.scheduler().pending_seq_max() {
            out.push_str(&format!(" length {} pending", len));
        }
        out.push('\n');
        out.push_str(e.song().list().trim_end());
        if let Some(preview) = e.store().steps(Role::Preview) {
            out.push_str(&format!("\npreview {}", render_steps(preview)));
        }
        out
    })
}

fn handle_meta(session: &mut Session, meta: &str) -> Result<Output> {
    match meta.trim() {
        "help" => Ok(Output::Text(HELP.to_string())),
        "q" | "quit" | "exit" => Ok(Output::Quit),
        "live" => Ok(Output::Text(format!(
            "live view: {}",
            on_off(live_view_enabled())
        ))),
        "live on" => {
            set_live_view(true);
            ensure_live_ticker(session.transport.engine());
            // force first render
            *LAST_LINE.lock().unwrap_or_else(PoisonError::into_inner) = None;
            Ok(Output::Text("live view on".into()))
        }
        "live off" => {
            set_live_view(false);
            *LAST_LINE.lock().unwrap_or_else(PoisonError::into_inner) = None;
            // Clear previously drawn region
            let mut h = LAST_HEIGHT.lock().unwrap_or_else(PoisonError::into_inner);
            if *h > 0 {
                let mut clear = String::new();
                for _ in 0..*h {
                    clear.push_str("\x1b[1F\x1b[2K\r");
                }
                *h = 0;
                drop(h);
                print_external(clear);
            }
            Ok(Output::Text("live view off".into()))
        }
        other => bail!("unknown meta command :{}", other),
    }
}

const HELP: &str = r#"Commands:
  :help                 Show this help
  :q / :quit            Exit
  :live [on|off]        Toggle or show the live step view

Transport:
  play | stop           Start/stop looping the sequence
  bpm <n>               Set tempo (40..280)
  bpm +<n> | -<n>       Nudge tempo
  rate <r>              Steps per beat: 1/16 1/8t 1/8 1/4t 1/4 1/2 1/1
  len <n>               Active length (1..16); while playing, waits for the bar end
                        unless the playhead is already inside the new length

Voice:
  note <name>           Base note (C, C#, .. B)
  octave <n>            Base octave (1..7)
  wave <w>              sine | square | sawtooth | triangle

Steps (numbered 1..16):
  step <i> <t>          Set transpose (-12..+12)
  on | off | toggle <i> Enable, mute or flip a step
  reset <i>             Back to +0, keeps on/off
  swap <i> <j>          Exchange two steps
  audition [t]          Play base note + t once

Melody:
  gen [walk|leaps] [scale] [key] [rest%] [seed]
                        Generate and preview a melody
                        Scales: major minor harmonic-minor dorian mixolydian
                                major-pentatonic minor-pentatonic blues
  apply                 Replace the sequence with the preview
  discard               Drop the preview

Songs:
  show                  Print the sequence
  share                 Print a share code
  load <code>           Load a share code
  save <file.yaml>      Save to YAML
  open <file.yaml>      Load from YAML
"#;

// --- Live step view ---
static LIVE_VIEW: AtomicBool = AtomicBool::new(false);

fn set_live_view(on: bool) {
    LIVE_VIEW.store(on, Ordering::SeqCst);
}

pub(crate) fn live_view_enabled() -> bool {
    LIVE_VIEW.load(Ordering::SeqCst)
}

// ANSI helpers for simple highlighting
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";

fn render_live_line(
    state: PlaybackState,
    steps: &[Step],
    seq_max: usize,
    highlight: Option<Highlight>,
) -> String {
    let preview = highlight.map_or(false, |h| h.preview);
    let cells: Vec<String> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let text = if s.enabled {
                format!("{:>3}", format_transpose(s.transpose))
            } else {
                " --".to_string()
            };
            if highlight.map(|h| h.index) == Some(i) {
                format!("{}{}{}", GREEN, text, RESET)
            } else if !preview && i >= seq_max {
                format!("{}{}{}", DIM, text, RESET)
            } else {
                text
            }
        })
        .collect();
    format!("[live] {:<10}|{}", state_label(state), cells.join(" "))
}

// ---------------- Live ticker -----------------
const FRAME: Duration = Duration::from_millis(16);

static TICKER_STARTED: AtomicBool = AtomicBool::new(false);
static LAST_LINE: Lazy<StdMutex<Option<String>>> = Lazy::new(|| StdMutex::new(None));
static LAST_HEIGHT: Lazy<StdMutex<usize>> = Lazy::new(|| StdMutex::new(0));

type PrinterFn = Box<dyn Fn(String) + Send + Sync + 'static>;
static EXTERNAL_PRINTER: Lazy<StdMutex<Option<PrinterFn>>> = Lazy::new(|| StdMutex::new(None));

fn set_external_printer(p: Option<PrinterFn>) {
    *EXTERNAL_PRINTER.lock().unwrap_or_else(PoisonError::into_inner) = p;
}

fn print_external(s: String) {
    match &*EXTERNAL_PRINTER.lock().unwrap_or_else(PoisonError::into_inner) {
        Some(f) => f(s),
        None => println!("{}", s),
    }
}

/// Polls the engine's event queue once per frame and redraws the step line
/// whenever the highlight or the transport state changes.
fn ensure_live_ticker(engine: SharedEngine) {
    if TICKER_STARTED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }
    thread::spawn(move || loop {
        while live_view_enabled() {
            let line = {
                let mut e = lock(&engine);
                let frame = e.sync_frame();
                let role = match frame.highlight {
                    Some(h) if h.preview => Role::Preview,
                    _ => Role::Main,
                };
                let steps = e.store().steps(role).map(<[Step]>::to_vec).unwrap_or_default();
                render_live_line(e.state(), &steps, e.scheduler().seq_max(), frame.highlight)
            };
            let mut last = LAST_LINE.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() != Some(line.as_str()) {
                *last = Some(line.clone());
                drop(last);
                print_live_region(vec![line]);
            }
            thread::sleep(FRAME);
        }
        if !keep_ticking_after_release() {
            break;
        }
    });
}

/// Releases the ticker slot. A `:live on` that landed after the loop ended
/// but before the release was refused a start, so the view is claimed
/// again here when it is back on.
fn keep_ticking_after_release() -> bool {
    TICKER_STARTED.store(false, Ordering::SeqCst);
    live_view_enabled()
        && TICKER_STARTED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
}

fn print_live_region(lines: Vec<String>) {
    let mut msg = String::new();
    let mut last_h = LAST_HEIGHT.lock().unwrap_or_else(PoisonError::into_inner);
    let prev = *last_h;
    if prev > 0 {
        // Move cursor up prev lines and clear each line
        for _ in 0..prev {
            msg.push_str("\x1b[1F\x1b[2K\r");
        }
    } else {
        msg.push('\n');
    }
    msg.push_str(&lines.join("\n"));
    *last_h = lines.len();
    drop(last_h);
    print_external(msg);
}

// ---------------- Log forwarding -----------------
static FORWARD_LOGS: AtomicBool = AtomicBool::new(false);

/// Routes console messages from background threads through the external
/// printer.
fn start_log_forwarder() {
    if FORWARD_LOGS.swap(true, Ordering::SeqCst) {
        return;
    }
    let sub = console::subscribe();
    thread::spawn(move || {
        while FORWARD_LOGS.load(Ordering::SeqCst) {
            for msg in sub.drain() {
                print_external(msg.to_string());
            }
            thread::sleep(Duration::from_millis(50));
        }
    });
}
