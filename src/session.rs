//! Session state shared between the capture thread and the network loop
//!
//! Only the network loop makes transition decisions. The capture worker reads
//! `capturing` and waits on changes, nothing else. Every transition keeps
//! `capturing && playing` false.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

/// Coarse phase derived from the state flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Speaking,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub capturing: bool,
    pub playing: bool,
    pub terminated: bool,
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        if self.terminated {
            Phase::Terminated
        } else if self.playing {
            Phase::Speaking
        } else if self.capturing {
            Phase::Listening
        } else {
            Phase::Idle
        }
    }
}

/// Lock-guarded session record. Share it with `Arc`.
#[derive(Debug, Default)]
pub struct SharedSession {
    state: Mutex<SessionState>,
    changed: Condvar,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, name: &str, f: impl FnOnce(&mut SessionState)) -> SessionState {
        let mut state = self.lock();
        let before = *state;
        if !state.terminated {
            f(&mut state);
        }
        debug_assert!(!(state.capturing && state.playing));
        let after = *state;
        drop(state);

        if before.phase() != after.phase() {
            info!("🔀 {}: {:?} -> {:?}", name, before.phase(), after.phase());
        }
        self.changed.notify_all();
        after
    }

    pub fn snapshot(&self) -> SessionState {
        *self.lock()
    }

    pub fn phase(&self) -> Phase {
        self.snapshot().phase()
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().capturing
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Microphone on, speaker idle
    pub fn start_listening(&self) -> SessionState {
        self.transition("listen", |s| {
            s.playing = false;
            s.capturing = true;
        })
    }

    /// Microphone off ahead of a speaker write
    pub fn pause_capture(&self) -> SessionState {
        self.transition("pause capture", |s| s.capturing = false)
    }

    /// A speaker write went through
    pub fn playback_started(&self) -> SessionState {
        self.transition("speak", |s| {
            s.capturing = false;
            s.playing = true;
        })
    }

    /// A speaker write failed; nothing is in flight
    pub fn playback_failed(&self) -> SessionState {
        self.transition("playback failed", |s| s.playing = false)
    }

    /// Microphone off and nothing playing, session still open
    pub fn go_idle(&self) -> SessionState {
        self.transition("idle", |s| {
            s.capturing = false;
            s.playing = false;
        })
    }

    /// Final transition. Later transitions are ignored.
    pub fn terminate(&self) -> SessionState {
        self.transition("terminate", |s| {
            s.capturing = false;
            s.playing = false;
            s.terminated = true;
        })
    }

    /// Block until capturing is on or the session ended, at most `timeout`.
    ///
    /// Returns the state observed on wake-up.
    pub fn wait_for_capture(&self, timeout: Duration) -> SessionState {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |s| !s.capturing && !s.terminated)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
