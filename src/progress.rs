//! Observable state holders for the authentication pipeline.
//!
//! Modeled on state-holder semantics rather than a lossy event stream: the
//! latest value is broadcast through a `watch` channel for live UIs, while
//! the full ordered history stays available for the final result and for
//! assertions.

use std::sync::Mutex;

use tokio::sync::watch;
use tracing::info;

/// Append-only progress trail for one authentication attempt.
///
/// Cleared exactly once per attempt, at the start; never truncated
/// mid-attempt. Subscribers observe the joined text of all lines so far.
pub struct ProgressChannel {
    lines: Mutex<Vec<String>>,
    tx: watch::Sender<String>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(String::new());
        Self {
            lines: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Start a fresh attempt.
    pub fn reset(&self) {
        self.lines.lock().expect("progress lock poisoned").clear();
        self.tx.send_replace(String::new());
    }

    /// Append one line and broadcast the updated trail.
    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{line}");
        let mut lines = self.lines.lock().expect("progress lock poisoned");
        lines.push(line);
        self.tx.send_replace(lines.join("\n"));
    }

    /// Ordered lines of the current attempt.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().expect("progress lock poisoned").clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Current-value holder that also records every transition in order.
pub struct StateChannel<T: Clone> {
    tx: watch::Sender<T>,
    history: Mutex<Vec<T>>,
}

impl<T: Clone> StateChannel<T> {
    pub fn new(initial: T) -> Self {
        let history = Mutex::new(vec![initial.clone()]);
        let (tx, _) = watch::channel(initial);
        Self { tx, history }
    }

    pub fn set(&self, value: T) {
        self.history
            .lock()
            .expect("state lock poisoned")
            .push(value.clone());
        self.tx.send_replace(value);
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// All values ever held, in transition order, starting with the initial.
    pub fn history(&self) -> Vec<T> {
        self.history.lock().expect("state lock poisoned").clone()
    }
}
