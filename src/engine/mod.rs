//! The playback engine: sequence store, lookahead scheduler, event queue and
//! the state machine that ties them to a tone generator.
//!
//! `Engine` is fully synchronous. Something else has to call [`Engine::tick`]
//! every `lookahead`; in the application that is the [`transport::Transport`]
//! ticker thread, in tests it is the test itself with a [`ManualClock`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::audio::timing::note_duration;
use crate::audio::{Note, ToneGenerator};
use crate::console;
use crate::model::song::Song;
use crate::model::step::{Role, Step};
use crate::model::tempo::{Rate, Tempo};
use crate::model::voice::{NoteName, VoiceSettings, Waveform};

pub mod clock;
pub mod gain;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gain::OutputGain;
pub use queue::{EventQueue, Highlight, QueuedStep};
pub use scheduler::{LengthChange, Scheduler};
pub use store::SequenceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Loops the main sequence over the active length.
    Main,
    /// Plays the preview sequence once and stops.
    Preview,
}

impl PlaybackMode {
    pub fn role(self) -> Role {
        match self {
            PlaybackMode::Main => Role::Main,
            PlaybackMode::Preview => Role::Preview,
        }
    }

    pub fn looping(self) -> bool {
        matches!(self, PlaybackMode::Main)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing(PlaybackMode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How far past `now` notes are committed on every pass, in seconds.
    pub schedule_ahead: f64,
    /// Period of the coarse timer driving `tick`.
    pub lookahead: Duration,
    /// Delay between pressing play and the first note, in seconds.
    pub start_offset: f64,
    /// Shaved off every note so consecutive notes never overlap.
    pub release_margin: f64,
    pub audition_duration: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedule_ahead: 0.1,
            lookahead: Duration::from_millis(25),
            start_offset: 0.1,
            release_margin: 0.005,
            audition_duration: 0.4,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("audio output is unavailable")]
    AudioUnavailable,
}

/// Result of one UI-sync poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UiFrame {
    /// The newest queue entry that fired since the previous poll.
    pub fired: Option<QueuedStep>,
    /// What should currently be lit.
    pub highlight: Option<Highlight>,
}

type LengthListener = Box<dyn FnMut(usize) + Send>;

pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    tone: Option<Box<dyn ToneGenerator>>,
    gain: OutputGain,
    store: SequenceStore,
    scheduler: Scheduler,
    queue: EventQueue,
    tempo: Tempo,
    voice: VoiceSettings,
    state: PlaybackState,
    session: u64,
    highlighted: Option<Highlight>,
    skip_warned: bool,
    length_listener: Option<LengthListener>,
}

impl Engine {
    /// `tone == None` means no audio device could be opened; the engine still
    /// edits and serializes but refuses to play.
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        tone: Option<Box<dyn ToneGenerator>>,
    ) -> Self {
        Self {
            config,
            clock,
            tone,
            gain: OutputGain::new(),
            store: SequenceStore::new(),
            scheduler: Scheduler::new(crate::model::STEPS_COUNT),
            queue: EventQueue::new(),
            tempo: Tempo::default(),
            voice: VoiceSettings::default(),
            state: PlaybackState::Stopped,
            session: 0,
            highlighted: None,
            skip_warned: false,
            length_listener: None,
        }
    }

    /// Shares `gain` with whatever renders the voices.
    pub fn with_gain(mut self, gain: OutputGain) -> Self {
        self.gain = gain;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gain(&self) -> &OutputGain {
        &self.gain
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state != PlaybackState::Stopped
    }

    pub fn audio_available(&self) -> bool {
        self.tone.is_some()
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &SequenceStore {
        &self.store
    }

    pub fn tempo(&self) -> &Tempo {
        &self.tempo
    }

    pub fn voice(&self) -> &VoiceSettings {
        &self.voice
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn set_length_listener(&mut self, listener: impl FnMut(usize) + Send + 'static) {
        self.length_listener = Some(Box::new(listener));
    }

    // ---- playback state machine ----

    /// Starts looping the main sequence. Already playing main is a no-op;
    /// playing a preview is stopped first.
    pub fn start_main(&mut self) -> Result<u64, EngineError> {
        if self.state == PlaybackState::Playing(PlaybackMode::Main) {
            return Ok(self.session);
        }
        self.start(PlaybackMode::Main)
    }

    /// Replaces the preview sequence with `melody` and plays it once. The
    /// preview is kept even when playback is refused, so it can still be
    /// applied.
    pub fn start_preview(&mut self, melody: Vec<Step>) -> Result<u64, EngineError> {
        self.stop();
        self.store.replace_all(Role::Preview, melody);
        self.start(PlaybackMode::Preview)
    }

    /// Play/stop button semantics for the main sequence. Returns the new
    /// session when playback started.
    pub fn toggle(&mut self) -> Result<Option<u64>, EngineError> {
        if self.state == PlaybackState::Playing(PlaybackMode::Main) {
            self.stop();
            return Ok(None);
        }
        self.start_main().map(Some)
    }

    fn ensure_audio(&self) -> Result<(), EngineError> {
        if self.tone.is_none() {
            console::warn("audio output unavailable; playback refused");
            return Err(EngineError::AudioUnavailable);
        }
        Ok(())
    }

    fn start(&mut self, mode: PlaybackMode) -> Result<u64, EngineError> {
        self.ensure_audio()?;
        self.stop();
        self.session += 1;
        self.skip_warned = false;
        self.scheduler
            .reset(self.clock.now() + self.config.start_offset);
        self.state = PlaybackState::Playing(mode);
        Ok(self.session)
    }

    /// Stops playback. Calling it while stopped changes nothing.
    pub fn stop(&mut self) {
        if self.state == PlaybackState::Stopped {
            return;
        }
        self.state = PlaybackState::Stopped;
        // Invalidates any ticker pass still in flight for the old session.
        self.session += 1;
        if let Some(len) = self.scheduler.flush_pending() {
            self.length_applied(len);
        }
        self.queue.clear();
        self.highlighted = None;
        self.gain.dip(self.clock.now());
        self.scheduler.rewind();
    }

    /// Copies the preview over the main sequence and discards it. Without a
    /// preview nothing changes, playback included.
    pub fn apply_preview(&mut self) -> bool {
        if !self.store.has_preview() {
            return false;
        }
        self.stop();
        match self.store.clear_preview() {
            Some(steps) => {
                self.store.replace_all(Role::Main, steps);
                true
            }
            None => false,
        }
    }

    /// Discards the preview, stopping it first if it is playing.
    pub fn close_preview(&mut self) -> bool {
        if self.state == PlaybackState::Playing(PlaybackMode::Preview) {
            self.stop();
        }
        self.store.clear_preview().is_some()
    }

    // ---- scheduler ----

    /// One lookahead pass for `session`. A pass for a session that has since
    /// been stopped or replaced does nothing.
    pub fn tick_session(&mut self, session: u64) -> bool {
        if session != self.session {
            return false;
        }
        self.tick()
    }

    /// Commits every step due before `now + schedule_ahead`. Returns whether
    /// playback is still running afterwards.
    pub fn tick(&mut self) -> bool {
        let PlaybackState::Playing(mode) = self.state else {
            return false;
        };
        let horizon = self.clock.now() + self.config.schedule_ahead;
        while self.scheduler.next_note_time() < horizon {
            let index = self.scheduler.current_step();
            if !mode.looping() && index >= self.one_shot_len() {
                // Let the last note ring out before the stop fade.
                if self.clock.now() >= self.scheduler.next_note_time() {
                    self.stop();
                    return false;
                }
                break;
            }
            self.commit(mode, index, self.scheduler.next_note_time());
            let step_duration = self.tempo.step_duration();
            if let Some(len) = self.scheduler.advance(step_duration, mode.looping()) {
                self.length_applied(len);
            }
        }
        true
    }

    fn one_shot_len(&self) -> usize {
        self.scheduler
            .seq_max()
            .min(self.store.len(Role::Preview))
    }

    fn commit(&mut self, mode: PlaybackMode, index: usize, time: f64) {
        let role = mode.role();
        let Some(step) = self.store.get_step(role, index) else {
            if !self.skip_warned {
                console::warn(format!(
                    "skipping {} step {}: no such step",
                    role.as_str(),
                    index + 1
                ));
                self.skip_warned = true;
            }
            return;
        };
        self.queue.push(QueuedStep {
            index,
            time,
            preview: mode == PlaybackMode::Preview,
            disabled: !step.enabled,
        });
        if !step.enabled {
            return;
        }
        let note = Note {
            midi: self.voice.base_midi() + step.transpose,
            start: time,
            duration: note_duration(self.tempo.step_duration(), self.config.release_margin),
            waveform: self.voice.waveform,
        };
        if let Some(tone) = self.tone.as_mut() {
            tone.play(note);
        }
    }

    fn length_applied(&mut self, len: usize) {
        console::info(format!("length is now {len}"));
        if let Some(listener) = self.length_listener.as_mut() {
            listener(len);
        }
    }

    /// Drains the event queue against the clock for a single-highlight view.
    pub fn sync_frame(&mut self) -> UiFrame {
        let fired = self.queue.drain_due(self.clock.now());
        if let Some(entry) = fired {
            self.highlighted = entry.highlight(self.scheduler.seq_max());
        }
        UiFrame { fired, highlight: self.highlighted }
    }

    // ---- editing ----

    /// Requests a new active length; see [`Scheduler::request_length`].
    pub fn set_seq_max(&mut self, len: usize) -> LengthChange {
        let change = self.scheduler.request_length(len, self.is_playing());
        if let LengthChange::Deferred(len) = change {
            console::info(format!("length {len} will apply at the end of the bar"));
        }
        change
    }

    pub fn set_step_transpose(&mut self, index: usize, transpose: i32) -> bool {
        self.store
            .update_step(Role::Main, index, |s| s.transpose = transpose)
    }

    pub fn set_step_enabled(&mut self, index: usize, enabled: bool) -> bool {
        self.store
            .update_step(Role::Main, index, |s| s.enabled = enabled)
    }

    pub fn toggle_step(&mut self, index: usize) -> bool {
        self.store
            .update_step(Role::Main, index, |s| s.enabled = !s.enabled)
    }

    /// Back to unison; the mute flag is left alone.
    pub fn reset_step(&mut self, index: usize) -> bool {
        self.store.update_step(Role::Main, index, |s| s.transpose = 0)
    }

    pub fn swap_steps(&mut self, i: usize, j: usize) -> bool {
        self.store.swap(Role::Main, i, j)
    }

    pub fn set_bpm(&mut self, bpm: u32) -> u32 {
        self.tempo.set_bpm(bpm);
        self.tempo.bpm()
    }

    pub fn adjust_bpm(&mut self, delta: i32) -> u32 {
        self.tempo.adjust_bpm(delta);
        self.tempo.bpm()
    }

    pub fn set_rate(&mut self, rate: Rate) {
        self.tempo.set_rate(rate);
    }

    pub fn set_base_note(&mut self, note: NoteName) {
        self.voice.base_note = note;
    }

    pub fn set_base_octave(&mut self, octave: u8) -> u8 {
        self.voice.set_base_octave(octave);
        self.voice.base_octave()
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.voice.waveform = waveform;
    }

    /// Plays base pitch + `transpose` right away, outside any session.
    pub fn audition(&mut self, transpose: i32) -> Result<(), EngineError> {
        self.ensure_audio()?;
        let note = Note {
            midi: self.voice.base_midi() + crate::model::step::clamp_transpose(transpose),
            start: self.clock.now(),
            duration: self.config.audition_duration,
            waveform: self.voice.waveform,
        };
        if let Some(tone) = self.tone.as_mut() {
            tone.play(note);
        }
        Ok(())
    }

    // ---- songs ----

    /// Replaces the main sequence, tempo and voice. The length goes through
    /// the usual deferral rules so a live reload never cuts a bar short.
    pub fn load_song(&mut self, song: &Song) {
        let song = song.clone().normalized();
        self.store.replace_all(Role::Main, song.steps);
        self.tempo = Tempo::new(song.bpm, song.rate);
        self.voice = VoiceSettings::new(song.base_note, song.base_octave, song.waveform);
        self.set_seq_max(song.seq_max);
    }

    /// Snapshot of the persisted fields. A deferred length is reported as the
    /// length the user asked for.
    pub fn song(&self) -> Song {
        Song {
            bpm: self.tempo.bpm(),
            rate: self.tempo.rate(),
            base_note: self.voice.base_note,
            base_octave: self.voice.base_octave(),
            waveform: self.voice.waveform,
            seq_max: self
                .scheduler
                .pending_seq_max()
                .unwrap_or(self.scheduler.seq_max()),
            steps: self
                .store
                .steps(Role::Main)
                .map(<[Step]>::to_vec)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Note>>>);

    impl Recorder {
        fn notes(&self) -> Vec<Note> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ToneGenerator for Recorder {
        fn play(&mut self, note: Note) {
            self.0.lock().unwrap().push(note);
        }
    }

    fn engine() -> (Engine, Arc<ManualClock>, Recorder) {
        let clock = Arc::new(ManualClock::new(0.0));
        let rec = Recorder::default();
        let engine = Engine::new(
            EngineConfig::default(),
            clock.clone(),
            Some(Box::new(rec.clone())),
        );
        (engine, clock, rec)
    }

    fn run_until(engine: &mut Engine, clock: &ManualClock, until: f64) {
        while clock.now() < until {
            clock.advance(0.025);
            engine.tick();
        }
    }

    #[test]
    fn firing_times_do_not_drift() {
        let (mut engine, clock, rec) = engine();
        engine.start_main().unwrap();
        engine.tick();
        run_until(&mut engine, &clock, 30.0);

        let step = engine.tempo().step_duration();
        let notes = rec.notes();
        assert!(notes.len() > 200);
        for (k, note) in notes.iter().enumerate() {
            let expected = 0.1 + k as f64 * step;
            assert!((note.start - expected).abs() < 1e-9, "note {k} drifted");
        }
    }

    #[test]
    fn disabled_steps_are_queued_but_silent() {
        let (mut engine, clock, rec) = engine();
        for i in 0..16 {
            engine.set_step_enabled(i, false);
        }
        engine.start_main().unwrap();
        run_until(&mut engine, &clock, 0.5);
        assert!(engine.queue_len() > 0);
        assert!(rec.notes().is_empty());
    }

    #[test]
    fn stop_twice_matches_stop_once() {
        let (mut engine, clock, _rec) = engine();
        engine.start_main().unwrap();
        run_until(&mut engine, &clock, 1.0);
        engine.stop();
        let session = engine.session();
        let step = engine.scheduler().current_step();
        engine.stop();
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(engine.session(), session);
        assert_eq!(step, 0);
        assert_eq!(engine.scheduler().current_step(), 0);
        assert_eq!(engine.queue_len(), 0);
    }

    #[test]
    fn stop_dips_the_output_gain() {
        let (mut engine, clock, _rec) = engine();
        engine.start_main().unwrap();
        clock.set(2.0);
        engine.stop();
        assert!(engine.gain().value_at(2.05) < 0.01);
        assert_eq!(engine.gain().value_at(2.2), 1.0);
    }

    #[test]
    fn one_shot_stops_after_the_last_step_rings_out() {
        let (mut engine, clock, rec) = engine();
        engine.set_seq_max(4);
        engine.start_preview(vec![Step::default(); 16]).unwrap();

        let mut stopped_at = None;
        while clock.now() < 2.0 {
            clock.advance(0.005);
            if !engine.tick() {
                stopped_at = Some(clock.now());
                break;
            }
        }

        let starts: Vec<f64> = rec.notes().iter().map(|n| n.start).collect();
        assert_eq!(starts.len(), 4);
        for (k, start) in starts.iter().enumerate() {
            assert!((start - (0.1 + k as f64 * 0.125)).abs() < 1e-9);
        }
        let stopped_at = stopped_at.expect("preview should stop on its own");
        assert!(stopped_at >= 0.6 - 1e-9 && stopped_at < 0.61);
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn short_preview_bounds_the_one_shot() {
        let (mut engine, clock, rec) = engine();
        engine.start_preview(vec![Step::new(2, true); 3]).unwrap();
        run_until(&mut engine, &clock, 2.0);
        assert_eq!(rec.notes().len(), 3);
        assert!(!engine.is_playing());
    }

    #[test]
    fn late_pass_for_an_old_session_is_ignored() {
        let (mut engine, _clock, rec) = engine();
        let old = engine.start_main().unwrap();
        engine.stop();
        assert!(!engine.tick_session(old));
        assert!(rec.notes().is_empty());
    }

    #[test]
    fn playback_is_refused_without_audio() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut engine = Engine::new(EngineConfig::default(), clock, None);
        assert_eq!(engine.start_main(), Err(EngineError::AudioUnavailable));
        assert_eq!(
            engine.start_preview(vec![Step::default()]),
            Err(EngineError::AudioUnavailable)
        );
        assert_eq!(engine.audition(0), Err(EngineError::AudioUnavailable));
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn deferred_length_notifies_the_listener() {
        let (mut engine, clock, _rec) = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.set_length_listener(move |len| sink.lock().unwrap().push(len));

        engine.start_main().unwrap();
        // Step 0 fires at 0.1; walk the playhead past step 4.
        run_until(&mut engine, &clock, 0.8);
        assert!(engine.scheduler().current_step() >= 4);
        assert_eq!(engine.set_seq_max(4), LengthChange::Deferred(4));
        run_until(&mut engine, &clock, 3.0);
        assert_eq!(*seen.lock().unwrap(), vec![4]);
        assert_eq!(engine.scheduler().seq_max(), 4);
    }

    #[test]
    fn stop_flushes_a_pending_length() {
        let (mut engine, clock, _rec) = engine();
        engine.start_main().unwrap();
        run_until(&mut engine, &clock, 1.0);
        assert_eq!(engine.set_seq_max(2), LengthChange::Deferred(2));
        engine.stop();
        assert_eq!(engine.scheduler().seq_max(), 2);
        assert_eq!(engine.scheduler().pending_seq_max(), None);
    }

    #[test]
    fn commit_plays_base_pitch_plus_transpose() {
        let (mut engine, clock, rec) = engine();
        engine.set_base_note(NoteName::A);
        engine.set_base_octave(3);
        engine.set_step_transpose(0, 5);
        engine.set_waveform(Waveform::Square);
        engine.start_main().unwrap();
        clock.set(0.05);
        engine.tick();
        let first = rec.notes()[0];
        assert_eq!(first.midi, 57 + 5);
        assert_eq!(first.waveform, Waveform::Square);
        assert!((first.duration - (0.125 - 0.005)).abs() < 1e-9);
    }

    #[test]
    fn sync_frame_lights_the_latest_fired_step() {
        let (mut engine, clock, _rec) = engine();
        engine.set_step_enabled(2, false);
        engine.start_main().unwrap();
        engine.tick();
        clock.set(0.24);
        engine.tick();
        let frame = engine.sync_frame();
        assert_eq!(frame.fired.map(|e| e.index), Some(1));
        assert_eq!(frame.highlight, Some(Highlight { index: 1, preview: false }));

        clock.set(0.36);
        engine.tick();
        let frame = engine.sync_frame();
        assert_eq!(frame.fired.map(|e| e.index), Some(2));
        assert_eq!(frame.highlight, None);

        engine.stop();
        assert_eq!(engine.sync_frame().highlight, None);
    }

    #[test]
    fn song_round_trips_through_the_engine() {
        let (mut engine, _clock, _rec) = engine();
        let mut song = Song {
            bpm: 128,
            rate: Rate::Eighth,
            base_note: NoteName::A,
            base_octave: 3,
            waveform: Waveform::Triangle,
            seq_max: 8,
            ..Song::default()
        };
        song.steps[3] = Step::new(-7, false);
        engine.load_song(&song);
        assert_eq!(engine.song(), song);
    }

    #[test]
    fn apply_preview_replaces_main_and_discards_preview() {
        let (mut engine, _clock, _rec) = engine();
        engine.start_preview(vec![Step::new(4, true); 16]).unwrap();
        assert!(engine.apply_preview());
        assert!(!engine.is_playing());
        assert!(!engine.store().has_preview());
        assert_eq!(engine.store().get_step(Role::Main, 7), Some(Step::new(4, true)));
        assert!(!engine.apply_preview());
    }

    #[test]
    fn apply_without_a_preview_keeps_playing() {
        let (mut engine, clock, _rec) = engine();
        engine.start_main().unwrap();
        run_until(&mut engine, &clock, 0.5);
        let session = engine.session();
        let queued = engine.queue_len();

        assert!(!engine.apply_preview());
        assert_eq!(engine.state(), PlaybackState::Playing(PlaybackMode::Main));
        assert_eq!(engine.session(), session);
        assert_eq!(engine.queue_len(), queued);
        assert_eq!(engine.gain().value_at(clock.now() + 0.02), 1.0);
    }

    #[test]
    fn reset_step_keeps_the_mute_flag() {
        let (mut engine, _clock, _rec) = engine();
        engine.set_step_transpose(5, -7);
        engine.set_step_enabled(5, false);
        assert!(engine.reset_step(5));
        assert_eq!(engine.store().get_step(Role::Main, 5), Some(Step::new(0, false)));
    }

    #[test]
    fn sync_frame_lights_preview_steps() {
        let (mut engine, clock, rec) = engine();
        assert_eq!(engine.set_seq_max(4), LengthChange::Applied(4));
        engine.start_preview(vec![Step::new(2, true); 8]).unwrap();
        clock.set(0.05);
        engine.tick();
        clock.set(0.24);
        engine.tick();

        let frame = engine.sync_frame();
        let fired = frame.fired.expect("a preview step fired");
        assert_eq!(fired.index, 1);
        assert!(fired.preview);
        assert_eq!(frame.highlight, Some(Highlight { index: 1, preview: true }));

        run_until(&mut engine, &clock, 1.0);
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(rec.notes().len(), 4);
    }

    #[test]
    fn sync_frame_hides_main_steps_past_a_new_length() {
        let (mut engine, clock, _rec) = engine();
        engine.start_main().unwrap();
        run_until(&mut engine, &clock, 0.6);
        assert_eq!(engine.set_seq_max(4), LengthChange::Deferred(4));

        // Step 15 is committed at the bar end, where the new length lands.
        run_until(&mut engine, &clock, 1.9);
        assert_eq!(engine.scheduler().seq_max(), 4);
        clock.set(1.98);
        let frame = engine.sync_frame();
        let fired = frame.fired.expect("step 15 fired");
        assert_eq!(fired.index, 15);
        assert!(!fired.preview);
        assert_eq!(frame.highlight, None);
    }
}
