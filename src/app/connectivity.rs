//! Shared link/session state cell.
//!
//! The session may only be `Connected` while the link is `Connected`.
//! Both states live behind one lock so that the pair is always read and
//! written together: dropping the link demotes the session in the same
//! critical section, and promoting the session is refused unless the
//! link is up at that instant.  No observer can see the forbidden
//! combination, even transiently.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Wireless link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Retry budget exhausted.  Only `start()` leaves this state.
    Failed,
}

/// Messaging session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Consistent view of both state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub link: LinkState,
    pub session: SessionState,
}

/// Result of a link transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTransition {
    pub previous: LinkState,
    /// Session state that was forced to `Disconnected`, if any.
    pub session_dropped: Option<SessionState>,
}

pub struct ConnectivityCell {
    state: Mutex<Connectivity>,
    changed: Condvar,
}

impl ConnectivityCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Connectivity {
                link: LinkState::Disconnected,
                session: SessionState::Disconnected,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connectivity> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Connectivity {
        *self.lock()
    }

    pub fn link(&self) -> LinkState {
        self.lock().link
    }

    pub fn session(&self) -> SessionState {
        self.lock().session
    }

    /// Move the link to `next`.  Leaving `Connected` demotes any session
    /// that is not already `Disconnected`.
    pub fn set_link(&self, next: LinkState) -> LinkTransition {
        let mut state = self.lock();
        let previous = state.link;
        state.link = next;

        let mut session_dropped = None;
        if next != LinkState::Connected && state.session != SessionState::Disconnected {
            session_dropped = Some(state.session);
            state.session = SessionState::Disconnected;
        }
        drop(state);

        self.changed.notify_all();
        LinkTransition {
            previous,
            session_dropped,
        }
    }

    /// Move the session to `next`.  `Connecting` and `Connected` are
    /// refused unless the link is `Connected`; the previous session state
    /// is returned on success.
    pub fn set_session(&self, next: SessionState) -> Option<SessionState> {
        let mut state = self.lock();
        let needs_link = matches!(next, SessionState::Connecting | SessionState::Connected);
        if needs_link && state.link != LinkState::Connected {
            return None;
        }
        let previous = state.session;
        state.session = next;
        drop(state);

        self.changed.notify_all();
        Some(previous)
    }

    /// Block until `done` holds for the link state or `timeout` elapses.
    /// Returns the last observed link state.
    pub fn wait_link(&self, timeout: Duration, done: impl Fn(LinkState) -> bool) -> LinkState {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if done(state.link) {
                return state.link;
            }
            let now = Instant::now();
            if now >= deadline {
                return state.link;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Default for ConnectivityCell {
    fn default() -> Self {
        Self::new()
    }
}
