//! Orchestrator: reacts to state transitions and runs the heartbeat.
//!
//! Runs in a dedicated thread using `edge-executor`, with two futures:
//!
//! 1. **Dispatch**: `bus.next().await`, wakes on every posted transition
//! 2. **Heartbeat**: `async-io-mini` timer, republishes presence and the
//!    relay state, then re-derives the indicator from first principles
//!
//! ```text
//!  ┌──────────────────────────────────────────────┐
//!  │  Orchestrator thread                         │
//!  │  ┌────────────────────────────────────────┐  │
//!  │  │  edge_executor::LocalExecutor          │  │
//!  │  │  ┌──────────────┐  ┌────────────────┐  │  │
//!  │  │  │ Dispatch     │  │ Heartbeat      │  │  │
//!  │  │  │ wake-on-post │  │ interval ⏱     │  │  │
//!  │  │  └──────────────┘  └────────────────┘  │  │
//!  │  └────────────────────────────────────────┘  │
//!  └──────────────────────────────────────────────┘
//! ```
//!
//! The orchestrator never decides relay state; it only forwards link
//! transitions to the session and keeps the indicator in step.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::drivers::task_pin::{self, Core};

use super::connectivity::{ConnectivityCell, LinkState, SessionState};
use super::events::{EventBus, SystemEvent};
use super::indicator::IndicatorEngine;
use super::indicator::effects::IndicatorStatus;
use super::link::LinkManager;
use super::relay::RelayController;
use super::session::SessionManager;

pub struct Orchestrator {
    link: Arc<LinkManager>,
    session: Arc<SessionManager>,
    relay: Arc<RelayController>,
    /// `None` when the indicator hardware failed to come up.
    indicator: Option<Arc<IndicatorEngine>>,
    cell: Arc<ConnectivityCell>,
    bus: EventBus,
}

impl Orchestrator {
    pub fn new(
        link: Arc<LinkManager>,
        session: Arc<SessionManager>,
        relay: Arc<RelayController>,
        indicator: Option<Arc<IndicatorEngine>>,
        cell: Arc<ConnectivityCell>,
        bus: EventBus,
    ) -> Self {
        Self {
            link,
            session,
            relay,
            indicator,
            cell,
            bus,
        }
    }

    /// React to one transition.
    pub fn handle_event(&self, event: SystemEvent) {
        debug!("Orchestrator: {:?}", event);
        match event {
            SystemEvent::Link(LinkState::Disconnected) => {
                self.session.on_link_lost();
                self.show(IndicatorStatus::Disconnected);
            }
            SystemEvent::Link(LinkState::Connecting) => self.show(IndicatorStatus::Connecting),
            SystemEvent::Link(LinkState::Connected) => {
                self.show(IndicatorStatus::LinkUp);
                if let Err(e) = self.session.start() {
                    warn!("Orchestrator: session start failed: {}", e);
                }
            }
            SystemEvent::Link(LinkState::Failed) => self.show(IndicatorStatus::Error),

            SystemEvent::Session(SessionState::Connecting) => self.show(IndicatorStatus::LinkUp),
            SystemEvent::Session(SessionState::Connected) => {
                self.show(IndicatorStatus::SessionUp(Some(self.relay.get_state())));
            }
            SystemEvent::Session(SessionState::Disconnected) => {
                if self.link.is_connected() {
                    self.show(IndicatorStatus::LinkUp);
                } else {
                    self.show(IndicatorStatus::Disconnected);
                }
            }
            SystemEvent::Session(SessionState::Error) => self.show(IndicatorStatus::Error),

            SystemEvent::Relay(state) => {
                if self.session.current_state() == SessionState::Connected {
                    self.show(IndicatorStatus::SessionUp(Some(state)));
                }
            }
        }
    }

    /// Handle everything already queued on the bus.  Returns the count.
    pub fn dispatch_pending(&self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.bus.try_next() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Indicator status implied by the current (link, session, relay).
    pub fn derive_status(&self) -> IndicatorStatus {
        let now = self.cell.snapshot();
        match (now.link, now.session) {
            (LinkState::Failed, _) | (LinkState::Connected, SessionState::Error) => {
                IndicatorStatus::Error
            }
            (LinkState::Disconnected, _) => IndicatorStatus::Disconnected,
            (LinkState::Connecting, _) => IndicatorStatus::Connecting,
            (LinkState::Connected, SessionState::Connected) => {
                IndicatorStatus::SessionUp(Some(self.relay.get_state()))
            }
            (LinkState::Connected, _) => IndicatorStatus::LinkUp,
        }
    }

    /// One heartbeat: republish presence and relay state when the session
    /// is up, then bring the indicator back in line.
    pub fn heartbeat(&self) {
        if self.session.current_state() == SessionState::Connected {
            let relay = self.relay.get_state();
            if let Err(e) = self.session.publish_status() {
                warn!("Heartbeat: status publish failed: {}", e);
            }
            if let Err(e) = self.session.publish_relay_state(relay, true) {
                warn!("Heartbeat: relay state publish failed: {}", e);
            }
            info!("Heartbeat: online, relay {}", relay.as_payload());
        }
        self.show(self.derive_status());
    }

    fn show(&self, status: IndicatorStatus) {
        if let Some(indicator) = &self.indicator {
            if let Err(e) = indicator.set_status(status) {
                warn!("Orchestrator: indicator {:?} failed: {}", status, e);
            }
        }
    }

    /// Drive dispatch and heartbeat on this thread.  Never returns.
    pub fn run(self: Arc<Self>, interval: Duration) {
        let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();

        executor.spawn(dispatch_loop(Arc::clone(&self))).detach();
        executor.spawn(heartbeat_loop(self, interval)).detach();

        info!(
            "Orchestrator started (heartbeat every {} s)",
            interval.as_secs()
        );
        futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
    }

    /// Run on a dedicated task.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> std::io::Result<JoinHandle<()>> {
        task_pin::spawn_on_core(Core::Any, 5, 8, "orchestrator\0", move || {
            self.run(interval);
        })
    }
}

async fn dispatch_loop(orchestrator: Arc<Orchestrator>) {
    loop {
        let event = orchestrator.bus.next().await;
        orchestrator.handle_event(event);
    }
}

async fn heartbeat_loop(orchestrator: Arc<Orchestrator>, interval: Duration) {
    loop {
        async_io_mini::Timer::after(interval).await;
        orchestrator.heartbeat();
    }
}
