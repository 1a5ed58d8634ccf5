//! Playback position and active-length bookkeeping for the lookahead scheduler.
//!
//! `next_note_time` only ever moves by adding one step duration, never by
//! re-reading the clock, so firing times cannot drift.

use crate::model::STEPS_COUNT;

/// Outcome of a length request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthChange {
    Applied(usize),
    Deferred(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scheduler {
    current_step: usize,
    next_note_time: f64,
    seq_max: usize,
    pending_seq_max: Option<usize>,
}

impl Scheduler {
    pub fn new(seq_max: usize) -> Self {
        Self {
            current_step: 0,
            next_note_time: 0.0,
            seq_max: clamp_len(seq_max),
            pending_seq_max: None,
        }
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn next_note_time(&self) -> f64 {
        self.next_note_time
    }

    pub fn seq_max(&self) -> usize {
        self.seq_max
    }

    pub fn pending_seq_max(&self) -> Option<usize> {
        self.pending_seq_max
    }

    /// Rewinds to the first step with the first note due at `start_time`.
    pub fn reset(&mut self, start_time: f64) {
        self.current_step = 0;
        self.next_note_time = start_time;
    }

    pub fn rewind(&mut self) {
        self.current_step = 0;
    }

    /// Requests a new active length.
    ///
    /// While stopped the change is immediate. While playing it is immediate
    /// only when shrinking to a length the playhead is already strictly
    /// inside; otherwise it waits for the loop boundary. A newer request
    /// replaces an older pending one.
    pub fn request_length(&mut self, len: usize, playing: bool) -> LengthChange {
        let len = clamp_len(len);
        if !playing {
            self.seq_max = len;
            self.pending_seq_max = None;
            return LengthChange::Applied(len);
        }
        if len == self.seq_max {
            self.pending_seq_max = None;
            return LengthChange::Applied(len);
        }
        if len < self.seq_max && self.current_step < len {
            self.seq_max = len;
            self.pending_seq_max = None;
            LengthChange::Applied(len)
        } else {
            self.pending_seq_max = Some(len);
            LengthChange::Deferred(len)
        }
    }

    /// Applies any pending length immediately. Used when playback stops.
    pub fn flush_pending(&mut self) -> Option<usize> {
        let len = self.pending_seq_max.take()?;
        self.seq_max = len;
        Some(len)
    }

    /// Moves to the next step.
    ///
    /// `step_duration` is read fresh on every call so tempo edits land on the
    /// next note. In looping mode a pending length is applied on the last
    /// step of the bar and the wrap is taken against the new length. Returns
    /// the newly applied length, if any.
    pub fn advance(&mut self, step_duration: f64, looping: bool) -> Option<usize> {
        self.next_note_time += step_duration;
        if !looping {
            self.current_step += 1;
            return None;
        }
        let mut applied = None;
        if self.current_step + 1 >= self.seq_max {
            applied = self.flush_pending();
        }
        self.current_step = (self.current_step + 1) % self.seq_max;
        applied
    }
}

fn clamp_len(len: usize) -> usize {
    len.clamp(1, STEPS_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing_at(step: usize, seq_max: usize) -> Scheduler {
        let mut s = Scheduler::new(seq_max);
        s.reset(0.0);
        for _ in 0..step {
            s.advance(0.1, true);
        }
        s
    }

    #[test]
    fn stopped_requests_apply_immediately() {
        let mut s = Scheduler::new(16);
        assert_eq!(s.request_length(4, false), LengthChange::Applied(4));
        assert_eq!(s.seq_max(), 4);
        assert_eq!(s.request_length(0, false), LengthChange::Applied(1));
        assert_eq!(s.request_length(99, false), LengthChange::Applied(16));
    }

    #[test]
    fn shrink_behind_the_playhead_is_deferred() {
        let mut s = playing_at(10, 16);
        assert_eq!(s.request_length(4, true), LengthChange::Deferred(4));
        assert_eq!(s.seq_max(), 16);
        assert_eq!(s.pending_seq_max(), Some(4));

        for _ in 10..15 {
            assert_eq!(s.advance(0.1, true), None);
        }
        assert_eq!(s.current_step(), 15);
        assert_eq!(s.advance(0.1, true), Some(4));
        assert_eq!(s.current_step(), 0);
        assert_eq!(s.seq_max(), 4);
        assert_eq!(s.pending_seq_max(), None);

        for _ in 0..12 {
            s.advance(0.1, true);
            assert!(s.current_step() < 4);
        }
    }

    #[test]
    fn shrink_ahead_of_the_playhead_applies_now() {
        let mut s = playing_at(2, 16);
        assert_eq!(s.request_length(4, true), LengthChange::Applied(4));
        assert_eq!(s.seq_max(), 4);
        assert_eq!(s.pending_seq_max(), None);
    }

    #[test]
    fn shrink_landing_on_the_playhead_is_deferred() {
        let mut s = playing_at(4, 16);
        assert_eq!(s.request_length(4, true), LengthChange::Deferred(4));
        assert_eq!(s.seq_max(), 16);
    }

    #[test]
    fn growth_waits_for_the_bar_end() {
        let mut s = playing_at(1, 4);
        assert_eq!(s.request_length(8, true), LengthChange::Deferred(8));
        assert_eq!(s.advance(0.1, true), None);
        assert_eq!(s.advance(0.1, true), None);
        assert_eq!(s.current_step(), 3);
        assert_eq!(s.seq_max(), 4);
        assert_eq!(s.advance(0.1, true), Some(8));
        assert_eq!(s.current_step(), 4);
    }

    #[test]
    fn newer_request_overwrites_pending() {
        let mut s = playing_at(10, 16);
        s.request_length(4, true);
        s.request_length(6, true);
        assert_eq!(s.pending_seq_max(), Some(6));
        s.request_length(16, true);
        assert_eq!(s.pending_seq_max(), None);
    }

    #[test]
    fn one_shot_advance_never_wraps() {
        let mut s = Scheduler::new(4);
        s.reset(1.0);
        for _ in 0..6 {
            s.advance(0.5, false);
        }
        assert_eq!(s.current_step(), 6);
        assert!((s.next_note_time() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn flush_applies_pending_once() {
        let mut s = playing_at(10, 16);
        s.request_length(4, true);
        assert_eq!(s.flush_pending(), Some(4));
        assert_eq!(s.flush_pending(), None);
        assert_eq!(s.seq_max(), 4);
    }
}
