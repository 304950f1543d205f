//! Events exchanged between the state machines and their drivers.
//!
//! Two directions:
//!
//! - **Driver → manager**: [`LinkEvent`] and [`SessionEvent`] are posted
//!   by the radio and broker adapters into the owning manager's mailbox.
//! - **Manager → orchestrator**: every state transition is announced as a
//!   [`SystemEvent`] on the shared [`EventBus`].
//!
//! Mailboxes are bounded `embassy-sync` channels.  A full mailbox drops
//! the newest event with a warning rather than blocking the sender, which
//! may be a driver callback running on a system task.
//!
//! ```text
//! ┌──────────┐ LinkEvent    ┌─────────────┐ SystemEvent ┌──────────────┐
//! │  Radio   │─────────────▶│ LinkManager │────────────▶│              │
//! └──────────┘              └─────────────┘             │              │
//! ┌──────────┐ SessionEvent ┌────────────────┐          │ Orchestrator │
//! │  Broker  │─────────────▶│ SessionManager │─────────▶│              │
//! └──────────┘              └────────────────┘          │              │
//!                           ┌─────────────────┐         │              │
//!                           │ RelayController │────────▶│              │
//!                           └─────────────────┘         └──────────────┘
//! ```

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use super::commands::InboundMessage;
use super::connectivity::{LinkState, SessionState};
use super::relay::RelayState;

/// Depth of each driver → manager mailbox.
pub const MAILBOX_DEPTH: usize = 8;

/// Depth of the system event bus.
pub const BUS_DEPTH: usize = 16;

// ── Driver events ─────────────────────────────────────────────

/// Radio-layer notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Station interface is up and ready to associate.
    Started,
    /// Association or authentication attempt failed.
    AssociationFailed,
    /// DHCP lease obtained; the link is usable.
    AddressAcquired,
    /// An established association dropped.
    LinkLost,
}

/// Broker-client notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Broker acknowledged the session.
    Connected,
    /// Session closed (cleanly or not).
    Disconnected,
    /// Transport failure, refused credentials or a malformed response.
    Error,
    /// A message arrived on a subscribed topic.
    Message(InboundMessage),
}

// ── System events ─────────────────────────────────────────────

/// State transitions announced to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    Link(LinkState),
    Session(SessionState),
    Relay(RelayState),
}

// ── Mailbox ───────────────────────────────────────────────────

/// Cloneable handle to a bounded MPMC channel.
pub struct Mailbox<T, const N: usize> {
    name: &'static str,
    channel: Arc<Channel<CriticalSectionRawMutex, T, N>>,
}

impl<T, const N: usize> Mailbox<T, N> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            channel: Arc::new(Channel::new()),
        }
    }

    /// Enqueue without blocking.  Returns `false` if the event was dropped.
    pub fn post(&self, event: T) -> bool {
        if self.channel.try_send(event).is_err() {
            warn!("{}: mailbox full, dropping event", self.name);
            return false;
        }
        true
    }

    pub fn try_next(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    /// Wait for the next event.
    pub async fn next(&self) -> T {
        self.channel.receive().await
    }

    /// Blocking receive for plain worker threads.
    pub fn next_blocking(&self) -> T {
        futures_lite::future::block_on(self.channel.receive())
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

impl<T, const N: usize> Clone for Mailbox<T, N> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            channel: Arc::clone(&self.channel),
        }
    }
}

/// Bus carrying every state transition to the orchestrator.
pub type EventBus = Mailbox<SystemEvent, BUS_DEPTH>;

impl EventBus {
    pub fn system() -> Self {
        Self::new("bus")
    }

    /// Drain everything currently queued.  Used by tests and the
    /// orchestrator's catch-up path.
    pub fn drain(&self) -> Vec<SystemEvent> {
        core::iter::from_fn(|| self.try_next()).collect()
    }
}
