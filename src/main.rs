use anyhow::{bail, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use std::env;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use tonestep::audio::{RodioToneGenerator, ToneGenerator};
use tonestep::console;
use tonestep::engine::transport::{lock, SharedEngine, Transport};
use tonestep::engine::{Clock, Engine, EngineConfig, OutputGain, SystemClock};
use tonestep::model::song::Song;
use tonestep::repl::{self, Session};
use tonestep::storage::{share, song as song_io};

fn cli() -> Command {
    Command::new("tonestep")
        .about("16-step melodic sequencer REPL")
        .arg(
            Arg::new("open")
                .short('o')
                .long("open")
                .value_name("FILE")
                .conflicts_with("share")
                .help("Open a YAML song on start and reload it when it changes"),
        )
        .arg(
            Arg::new("share")
                .short('s')
                .long("share")
                .value_name("CODE")
                .help("Load a share code on start"),
        )
        .arg(
            Arg::new("lookahead-ms")
                .long("lookahead-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64).range(1..=1000))
                .help("How often the scheduler wakes up"),
        )
        .arg(
            Arg::new("schedule-ahead-ms")
                .long("schedule-ahead-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64).range(1..=2000))
                .help("How far ahead notes are committed to the audio thread"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Hide the banner and informational messages"),
        )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let quiet = matches.get_flag("quiet");
    console::set_quiet(quiet);

    let mut config = EngineConfig::default();
    if let Some(ms) = matches.get_one::<u64>("lookahead-ms") {
        config.lookahead = Duration::from_millis(*ms);
    }
    if let Some(ms) = matches.get_one::<u64>("schedule-ahead-ms") {
        config.schedule_ahead = *ms as f64 / 1000.0;
    }

    let song = if let Some(path) = matches.get_one::<String>("open") {
        match song_io::open(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Failed to open {}: {:#}\nStarting new song.", path, e);
                Song::default()
            }
        }
    } else if let Some(code) = matches.get_one::<String>("share") {
        match share::decode(code) {
            Ok(s) => s,
            Err(e) => bail!("cannot load share code: {}", e),
        }
    } else {
        Song::default()
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let gain = OutputGain::new();
    let tone: Option<Box<dyn ToneGenerator>> =
        match RodioToneGenerator::start(Arc::clone(&clock), gain.clone()) {
            Ok(t) => Some(Box::new(t)),
            Err(e) => {
                console::warn(format!("{}; editing only, playback is disabled", e));
                None
            }
        };

    let mut engine = Engine::new(config, clock, tone).with_gain(gain);
    engine.load_song(&song);

    if !quiet {
        println!(
            "TONESTEP: bpm {} rate {} base {}{} wave {} (type :help)",
            song.bpm,
            song.rate.label(),
            song.base_note.as_str(),
            song.base_octave,
            song.waveform.as_str()
        );
    }

    let transport = Transport::new(engine);
    if let Some(path) = matches.get_one::<String>("open") {
        console::info(format!("watching: {}", path));
        start_watcher(PathBuf::from(path), transport.engine());
    }

    let mut session = Session::new(transport);
    repl::run_repl(&mut session)?;

    Ok(())
}

/// Reloads `path` into the engine whenever it changes on disk. Tempo and
/// steps take effect from the next scheduled note.
fn start_watcher(path: PathBuf, engine: SharedEngine) {
    // Watch the parent so editors that save by rename are still seen
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(p) => p.to_path_buf(),
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let file_name = path.file_name().map(|s| s.to_os_string());
    thread::spawn(move || {
        let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
        let mut watcher: RecommendedWatcher = match Watcher::new(tx, notify::Config::default()) {
            Ok(w) => w,
            Err(e) => {
                console::warn(format!("file watch disabled (create watcher failed): {}", e));
                return;
            }
        };
        if let Err(e) = watcher.watch(parent.as_path(), RecursiveMode::NonRecursive) {
            console::warn(format!(
                "file watch disabled (cannot watch '{}'): {}",
                parent.display(),
                e
            ));
            return;
        }
        while let Ok(event) = rx.recv() {
            let Ok(event) = event else { continue };
            let relevant = event.paths.iter().any(|p| match &file_name {
                Some(name) => p.file_name() == Some(name.as_os_str()),
                None => false,
            });
            if !relevant || event.kind.is_access() {
                continue;
            }
            // Debounce: editors often write in several steps
            thread::sleep(Duration::from_millis(50));
            while rx.try_recv().is_ok() {}
            match song_io::open(&path) {
                Ok(song) => {
                    lock(&engine).load_song(&song);
                    console::info(format!("reloaded: {}", path.display()));
                }
                Err(e) => console::warn(format!("reload failed: {:#}", e)),
            }
        }
    });
}
