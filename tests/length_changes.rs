mod common;

use std::sync::{Arc, Mutex};

use common::{engine, run_until, Recorder};
use tonestep::engine::{Engine, LengthChange};

/// Step `i` gets transpose `i - 8`, so the index can be read back off the
/// MIDI note (base C4 = 60).
fn numbered(engine: &mut Engine) {
    for i in 0..16 {
        engine.set_step_transpose(i, i as i32 - 8);
    }
}

fn indices(rec: &Recorder) -> Vec<usize> {
    rec.notes().iter().map(|n| (n.midi - 52) as usize).collect()
}

fn listen(engine: &mut Engine) -> Arc<Mutex<Vec<usize>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.set_length_listener(move |len| sink.lock().unwrap().push(len));
    seen
}

#[test]
fn shrink_behind_the_playhead_waits_for_the_bar_end() {
    let (mut engine, clock, rec) = engine();
    numbered(&mut engine);
    let seen = listen(&mut engine);
    engine.start_main().unwrap();
    run_until(&mut engine, &clock, 0.6);
    assert_eq!(engine.scheduler().current_step(), 5);

    assert_eq!(engine.set_seq_max(4), LengthChange::Deferred(4));
    assert_eq!(engine.scheduler().seq_max(), 16);
    assert!(seen.lock().unwrap().is_empty());

    run_until(&mut engine, &clock, 3.2);
    let played = indices(&rec);
    let expected: Vec<usize> = (0..16).chain([0, 1, 2, 3, 0]).collect();
    assert_eq!(&played[..expected.len()], &expected[..]);
    assert_eq!(*seen.lock().unwrap(), vec![4]);
    assert_eq!(engine.scheduler().pending_seq_max(), None);
}

#[test]
fn shrink_ahead_of_the_playhead_applies_at_once() {
    let (mut engine, clock, rec) = engine();
    numbered(&mut engine);
    engine.start_main().unwrap();
    run_until(&mut engine, &clock, 0.6);

    assert_eq!(engine.set_seq_max(8), LengthChange::Applied(8));
    run_until(&mut engine, &clock, 1.6);
    let played = indices(&rec);
    assert_eq!(&played[..11], &[0, 1, 2, 3, 4, 5, 6, 7, 0, 1, 2]);
}

#[test]
fn growth_continues_into_the_new_steps() {
    let (mut engine, clock, rec) = engine();
    numbered(&mut engine);
    assert_eq!(engine.set_seq_max(4), LengthChange::Applied(4));
    engine.start_main().unwrap();
    run_until(&mut engine, &clock, 0.6);
    assert_eq!(engine.scheduler().current_step(), 1);

    assert_eq!(engine.set_seq_max(8), LengthChange::Deferred(8));
    run_until(&mut engine, &clock, 1.8);
    let played = indices(&rec);
    let expected = [0, 1, 2, 3, 0, 1, 2, 3, 4, 5, 6, 7, 0];
    assert_eq!(&played[..expected.len()], &expected[..]);
}

#[test]
fn newest_pending_request_wins() {
    let (mut engine, clock, _rec) = engine();
    let seen = listen(&mut engine);
    engine.start_main().unwrap();
    run_until(&mut engine, &clock, 0.6);

    assert_eq!(engine.set_seq_max(4), LengthChange::Deferred(4));
    assert_eq!(engine.set_seq_max(2), LengthChange::Deferred(2));
    run_until(&mut engine, &clock, 3.0);
    assert_eq!(*seen.lock().unwrap(), vec![2]);
    assert_eq!(engine.scheduler().seq_max(), 2);
}

#[test]
fn requesting_the_current_length_cancels_a_pending_one() {
    let (mut engine, clock, _rec) = engine();
    let seen = listen(&mut engine);
    engine.start_main().unwrap();
    run_until(&mut engine, &clock, 0.6);

    engine.set_seq_max(4);
    assert_eq!(engine.set_seq_max(16), LengthChange::Applied(16));
    assert_eq!(engine.scheduler().pending_seq_max(), None);
    run_until(&mut engine, &clock, 3.0);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn stopping_applies_a_pending_length() {
    let (mut engine, clock, _rec) = engine();
    let seen = listen(&mut engine);
    engine.start_main().unwrap();
    run_until(&mut engine, &clock, 0.6);
    engine.set_seq_max(3);

    engine.stop();
    assert_eq!(engine.scheduler().seq_max(), 3);
    assert_eq!(*seen.lock().unwrap(), vec![3]);
    // Saving right after sees the new length.
    assert_eq!(engine.song().seq_max, 3);
}
