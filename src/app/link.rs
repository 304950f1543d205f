//! Wireless link manager.
//!
//! ```text
//!                start()
//!   Disconnected ────────▶ Connecting ◀──┐ failure, budget left
//!        ▲                  │   │  └─────┘   (fixed backoff)
//!        │ link lost        │   │ failure, budget spent
//!        │ (then retry)     │   ▼
//!        │                  │  Failed ── start() ──▶ Connecting
//!        │  address acquired│
//!        └──── Connected ◀──┘
//! ```
//!
//! Radio outcomes arrive as [`LinkEvent`]s, either through the manager's
//! mailbox (drained by its worker task) or by calling
//! [`LinkManager::handle_event`] directly.  Every transition is written to
//! the shared [`ConnectivityCell`] and announced on the [`EventBus`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::DeviceConfig;
use crate::drivers::task_pin::{self, Core};
use crate::error::LinkError;

use super::connectivity::{ConnectivityCell, LinkState, SessionState};
use super::events::{EventBus, LinkEvent, MAILBOX_DEPTH, Mailbox, SystemEvent};
use super::ports::LinkDriver;

pub type LinkMailbox = Mailbox<LinkEvent, MAILBOX_DEPTH>;

// ── Retry budget ──────────────────────────────────────────────

/// Consecutive-failure counter with a fixed ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    used: u8,
    max: u8,
}

impl RetryBudget {
    pub const fn new(max: u8) -> Self {
        Self { used: 0, max }
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Count one failure.  Returns `true` once the ceiling is reached.
    pub fn record_failure(&mut self) -> bool {
        self.used = self.used.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max
    }

    pub fn used(&self) -> u8 {
        self.used
    }

    pub fn max(&self) -> u8 {
        self.max
    }
}

// ── Policy ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPolicy {
    pub max_retries: u8,
    pub backoff: Duration,
}

impl LinkPolicy {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            max_retries: config.link_max_retries,
            backoff: Duration::from_millis(u64::from(config.link_backoff_ms)),
        }
    }
}

/// Outcome of [`LinkManager::wait_for_connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Connected,
    Failed,
    TimedOut,
}

// ── Manager ───────────────────────────────────────────────────

struct LinkControl {
    driver: Box<dyn LinkDriver>,
    budget: RetryBudget,
    /// Bumped by `start()`/`stop()`; a retry that slept across a bump is stale.
    epoch: u32,
}

pub struct LinkManager {
    control: Mutex<LinkControl>,
    backoff: Duration,
    cell: Arc<ConnectivityCell>,
    bus: EventBus,
    mailbox: LinkMailbox,
}

impl LinkManager {
    pub fn new(
        driver: Box<dyn LinkDriver>,
        policy: LinkPolicy,
        cell: Arc<ConnectivityCell>,
        bus: EventBus,
        mailbox: LinkMailbox,
    ) -> Self {
        Self {
            control: Mutex::new(LinkControl {
                driver,
                budget: RetryBudget::new(policy.max_retries),
                epoch: 0,
            }),
            backoff: policy.backoff,
            cell,
            bus,
            mailbox,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin association.  Non-blocking; also the only way out of `Failed`.
    pub fn start(&self) -> Result<(), LinkError> {
        let mut ctl = self.lock();
        if self.cell.link() == LinkState::Connected {
            info!("Link: start() while connected, ignoring");
            return Ok(());
        }
        ctl.budget.reset();
        ctl.epoch = ctl.epoch.wrapping_add(1);
        self.transition(LinkState::Connecting);

        if let Err(e) = ctl.driver.associate() {
            error!("Link: driver refused association: {}", e);
            // Counts against the budget on the worker, like a reported
            // failure; the caller never sleeps through a backoff.
            self.mailbox.post(LinkEvent::AssociationFailed);
            return Err(e);
        }
        Ok(())
    }

    /// Drop the association and stop retrying.
    pub fn stop(&self) {
        let mut ctl = self.lock();
        ctl.epoch = ctl.epoch.wrapping_add(1);
        ctl.driver.disassociate();
        self.transition(LinkState::Disconnected);
    }

    pub fn current_state(&self) -> LinkState {
        self.cell.link()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state() == LinkState::Connected
    }

    pub fn retry_count(&self) -> u8 {
        self.lock().budget.used()
    }

    /// Block until the link is `Connected` or `Failed`, or `timeout` passes.
    pub fn wait_for_connection(&self, timeout: Duration) -> WaitOutcome {
        let seen = self.cell.wait_link(timeout, |l| {
            matches!(l, LinkState::Connected | LinkState::Failed)
        });
        match seen {
            LinkState::Connected => WaitOutcome::Connected,
            LinkState::Failed => WaitOutcome::Failed,
            _ => WaitOutcome::TimedOut,
        }
    }

    /// Queue a driver event for the worker task.
    pub fn post(&self, event: LinkEvent) -> bool {
        self.mailbox.post(event)
    }

    /// Apply one driver event.  May sleep for the backoff interval.
    pub fn handle_event(&self, event: LinkEvent) {
        let current = self.current_state();
        match event {
            LinkEvent::Started => info!("Link: radio started"),
            LinkEvent::AddressAcquired => {
                if matches!(current, LinkState::Failed | LinkState::Disconnected) {
                    warn!("Link: address acquired in {:?}, ignoring", current);
                    return;
                }
                self.lock().budget.reset();
                self.transition(LinkState::Connected);
            }
            LinkEvent::AssociationFailed => match current {
                LinkState::Connecting => self.retry(),
                // A failure report racing a successful association: treat
                // it as the link going away.
                LinkState::Connected => {
                    self.transition(LinkState::Disconnected);
                    self.retry();
                }
                _ => info!("Link: failure in {:?}, ignoring", current),
            },
            LinkEvent::LinkLost => match current {
                LinkState::Connected => {
                    warn!("Link: connection lost");
                    self.transition(LinkState::Disconnected);
                    self.retry();
                }
                LinkState::Connecting => self.retry(),
                _ => {}
            },
        }
    }

    /// Count a failure and either reattempt after the backoff or give up.
    fn retry(&self) {
        loop {
            let epoch = {
                let mut ctl = self.lock();
                if ctl.budget.record_failure() {
                    warn!(
                        "Link: {} consecutive failures, giving up",
                        ctl.budget.used()
                    );
                    self.transition(LinkState::Failed);
                    return;
                }
                info!(
                    "Link: retrying ({}/{}) in {} ms",
                    ctl.budget.used(),
                    ctl.budget.max(),
                    self.backoff.as_millis()
                );
                self.transition(LinkState::Connecting);
                ctl.epoch
            };

            if !self.backoff.is_zero() {
                std::thread::sleep(self.backoff);
            }

            let mut ctl = self.lock();
            if ctl.epoch != epoch || self.cell.link() != LinkState::Connecting {
                return;
            }
            match ctl.driver.associate() {
                Ok(()) => return,
                Err(e) => warn!("Link: reattempt refused: {}", e),
            }
        }
    }

    fn transition(&self, next: LinkState) {
        let t = self.cell.set_link(next);
        if t.previous != next {
            info!("Link: {:?} -> {:?}", t.previous, next);
            self.bus.post(SystemEvent::Link(next));
        }
        if t.session_dropped.is_some() {
            self.bus.post(SystemEvent::Session(SessionState::Disconnected));
        }
    }

    /// Run the mailbox on a dedicated task.
    pub fn spawn_worker(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        task_pin::spawn_on_core(Core::Pro, 5, 4, "link\0", move || {
            loop {
                let event = this.mailbox.next_blocking();
                this.handle_event(event);
            }
        })
    }
}
