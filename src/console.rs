//! Minimal, REPL-safe logging.
//!
//! The scheduler and audio threads must never write straight to the
//! terminal while rustyline owns the input line. They publish here instead;
//! the REPL subscribes and prints through its external printer.

use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: Level,
    pub text: String,
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Level::Info => write!(f, "{}", self.text),
            Level::Warn => write!(f, "warning: {}", self.text),
            Level::Error => write!(f, "error: {}", self.text),
        }
    }
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
static QUIET: AtomicBool = AtomicBool::new(false);
static SUBSCRIBERS: Lazy<Mutex<Vec<(usize, Sender<LogMessage>)>>> =
    Lazy::new(|| Mutex::new(Vec::new()));

fn subscribers() -> MutexGuard<'static, Vec<(usize, Sender<LogMessage>)>> {
    SUBSCRIBERS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A subscription to console log messages.
///
/// Dropping this value unsubscribes it.
pub struct Subscription {
    id: usize,
    rx: Receiver<LogMessage>,
}

impl Subscription {
    pub fn drain(&self) -> Vec<LogMessage> {
        self.rx.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        subscribers().retain(|(id, _)| *id != self.id);
    }
}

pub fn subscribe() -> Subscription {
    let (tx, rx) = mpsc::channel();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    subscribers().push((id, tx));
    Subscription { id, rx }
}

/// Drops info messages at the source.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

pub fn info(msg: impl Into<String>) {
    if QUIET.load(Ordering::Relaxed) {
        return;
    }
    publish(Level::Info, msg.into());
}

pub fn warn(msg: impl Into<String>) {
    publish(Level::Warn, msg.into());
}

pub fn error(msg: impl Into<String>) {
    publish(Level::Error, msg.into());
}

fn publish(level: Level, text: String) {
    let message = LogMessage { level, text };

    let mut subs = subscribers();
    if subs.is_empty() {
        // Outside the REPL, warnings/errors should still be visible.
        match message.level {
            Level::Warn | Level::Error => eprintln!("{}", message),
            Level::Info => {}
        }
        return;
    }

    // Broadcast to all subscribers; drop any that have gone away.
    subs.retain(|(_, tx)| tx.send(message.clone()).is_ok());
}
