//! Pub/sub session manager.
//!
//! Owns the broker transport, the session half of the shared
//! [`ConnectivityCell`], and the inbound command path:
//!
//! ```text
//!   {id}/relay/set ──▶ decode ──▶ RelayController::apply ──▶ {id}/relay/state
//! ```
//!
//! The session can only be promoted while the link is up; the cell
//! refuses the transition otherwise, so a late broker acknowledgement
//! racing a link loss is dropped rather than applied.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::drivers::task_pin::{self, Core};
use crate::error::SessionError;

use super::commands::{InboundMessage, MAX_TOPIC_LEN, RelayCommand};
use super::connectivity::{ConnectivityCell, LinkState, SessionState};
use super::events::{EventBus, MAILBOX_DEPTH, Mailbox, SessionEvent, SystemEvent};
use super::identity::DeviceIdentity;
use super::link::RetryBudget;
use super::ports::{LastWill, QoS, SessionOptions, SessionTransport};
use super::relay::{RelayController, RelayState};

pub type SessionMailbox = Mailbox<SessionEvent, MAILBOX_DEPTH>;

/// Largest outbound payload accepted by [`SessionManager::publish`].
pub const MAX_OUTBOUND_PAYLOAD_LEN: usize = 64;

const ONLINE: &str = "online";
const OFFLINE: &str = "offline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: heapless::String<64>,
    pub password: Option<heapless::String<64>>,
}

impl Credentials {
    pub fn from_config(config: &DeviceConfig) -> Option<Self> {
        config.broker_username.as_ref().map(|username| Self {
            username: username.clone(),
            password: config.broker_password.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_retries: u8,
    pub backoff: Duration,
    pub keep_alive_secs: u16,
}

impl SessionPolicy {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            max_retries: config.session_max_retries,
            backoff: Duration::from_millis(u64::from(config.session_backoff_ms)),
            keep_alive_secs: config.keep_alive_secs,
        }
    }
}

/// Copy a raw broker message into the mailbox.  Oversized messages are
/// dropped here, before they reach any buffer the manager owns.
pub fn forward_message(mailbox: &SessionMailbox, topic: &str, payload: &[u8]) -> bool {
    match InboundMessage::bounded(topic, payload) {
        Some(msg) => mailbox.post(SessionEvent::Message(msg)),
        None => {
            debug!(
                "Session: dropping oversized message ({} byte topic, {} byte payload)",
                topic.len(),
                payload.len()
            );
            false
        }
    }
}

// ── Manager ───────────────────────────────────────────────────

struct SessionControl {
    transport: Box<dyn SessionTransport>,
    identity: Option<DeviceIdentity>,
    options: Option<SessionOptions>,
    budget: RetryBudget,
    epoch: u32,
}

pub struct SessionManager {
    control: Mutex<SessionControl>,
    policy: SessionPolicy,
    relay: Arc<RelayController>,
    cell: Arc<ConnectivityCell>,
    bus: EventBus,
    mailbox: SessionMailbox,
}

impl SessionManager {
    pub fn new(
        transport: Box<dyn SessionTransport>,
        policy: SessionPolicy,
        relay: Arc<RelayController>,
        cell: Arc<ConnectivityCell>,
        bus: EventBus,
        mailbox: SessionMailbox,
    ) -> Self {
        Self {
            control: Mutex::new(SessionControl {
                transport,
                identity: None,
                options: None,
                budget: RetryBudget::new(policy.max_retries),
                epoch: 0,
            }),
            policy,
            relay,
            cell,
            bus,
            mailbox,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record identity and broker parameters.  Registers "offline" on
    /// `{id}/status` as the retained last-will.
    pub fn initialize(
        &self,
        identity: DeviceIdentity,
        broker_uri: heapless::String<128>,
        credentials: Option<Credentials>,
    ) {
        let (username, password) = match credentials {
            Some(c) => (Some(c.username), c.password),
            None => (None, None),
        };
        let options = SessionOptions {
            broker_uri,
            client_id: identity.client_id(),
            username,
            password,
            keep_alive_secs: self.policy.keep_alive_secs,
            last_will: LastWill {
                topic: identity.will_topic(),
                payload: OFFLINE,
                qos: QoS::AtLeastOnce,
                retain: true,
            },
        };
        info!(
            "Session: initialised for '{}' at {}",
            identity.id(),
            options.broker_uri
        );

        let mut ctl = self.lock();
        ctl.identity = Some(identity);
        ctl.options = Some(options);
    }

    /// Open the session.  Requires the link to be up at the moment of
    /// the call; a session already opening or open is left alone.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut ctl = self.lock();
        let options = ctl.options.clone().ok_or(SessionError::NotInitialized)?;

        if matches!(
            self.cell.session(),
            SessionState::Connecting | SessionState::Connected
        ) {
            return Ok(());
        }
        if !self.transition(SessionState::Connecting) {
            return Err(SessionError::LinkDown);
        }
        ctl.budget.reset();
        ctl.epoch = ctl.epoch.wrapping_add(1);

        if let Err(e) = ctl.transport.connect(&options) {
            error!("Session: connect request failed: {}", e);
            self.transition(SessionState::Error);
            // Counted and retried by the worker like a reported error, so
            // the caller never sleeps through a backoff.
            self.mailbox.post(SessionEvent::Error);
            return Err(e);
        }
        Ok(())
    }

    /// Graceful shutdown: announce "offline", close the transport.
    pub fn stop(&self) {
        let mut ctl = self.lock();
        let will = ctl.identity.as_ref().map(DeviceIdentity::will_topic);
        if let Some(topic) = will {
            if let Err(e) =
                self.publish_locked(&mut ctl, &topic, OFFLINE.as_bytes(), QoS::AtLeastOnce, true)
            {
                debug!("Session: no offline notice: {}", e);
            }
        }
        self.teardown(&mut ctl);
    }

    /// The link went away underneath the session.  The broker learns
    /// about it through the last-will; no retry is scheduled.
    pub fn on_link_lost(&self) {
        let mut ctl = self.lock();
        info!("Session: link lost, closing transport");
        self.teardown(&mut ctl);
    }

    fn teardown(&self, ctl: &mut SessionControl) {
        ctl.epoch = ctl.epoch.wrapping_add(1);
        ctl.transport.disconnect();
        self.transition(SessionState::Disconnected);
    }

    pub fn current_state(&self) -> SessionState {
        self.cell.session()
    }

    /// Publish on the open session.  Topic and payload are bounded;
    /// nothing is sent unless the session is `Connected`.
    pub fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        let mut ctl = self.lock();
        self.publish_locked(&mut ctl, topic, payload, qos, retain)
    }

    fn publish_locked(
        &self,
        ctl: &mut SessionControl,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        if topic.len() > MAX_TOPIC_LEN {
            return Err(SessionError::TopicTooLong);
        }
        if payload.len() > MAX_OUTBOUND_PAYLOAD_LEN {
            return Err(SessionError::PayloadTooLong);
        }
        if self.cell.session() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        ctl.transport.publish(topic, payload, qos, retain)
    }

    /// "online", retained, at-least-once on `{id}/status`.
    pub fn publish_status(&self) -> Result<(), SessionError> {
        let mut ctl = self.lock();
        let topic = ctl
            .identity
            .as_ref()
            .map(|i| i.will_topic())
            .ok_or(SessionError::NotInitialized)?;
        self.publish_locked(&mut ctl, &topic, ONLINE.as_bytes(), QoS::AtLeastOnce, true)
    }

    /// Current relay state, at-least-once on `{id}/relay/state`.
    pub fn publish_relay_state(&self, state: RelayState, retain: bool) -> Result<(), SessionError> {
        let mut ctl = self.lock();
        let identity = ctl.identity.clone().ok_or(SessionError::NotInitialized)?;
        self.publish_locked(
            &mut ctl,
            identity.state_topic(),
            state.as_payload().as_bytes(),
            QoS::AtLeastOnce,
            retain,
        )
    }

    /// Queue a transport event for the worker task.
    pub fn post(&self, event: SessionEvent) -> bool {
        self.mailbox.post(event)
    }

    /// Apply one transport event.  May sleep for the backoff interval.
    pub fn handle_event(&self, event: SessionEvent) {
        let current = self.current_state();
        match event {
            SessionEvent::Connected => {
                if current != SessionState::Connecting {
                    warn!("Session: acknowledgement in {:?}, ignoring", current);
                    return;
                }
                self.on_connected();
            }
            SessionEvent::Disconnected => match current {
                SessionState::Connecting | SessionState::Connected => {
                    warn!("Session: broker closed the session");
                    self.transition(SessionState::Disconnected);
                    if self.cell.link() == LinkState::Connected {
                        self.retry();
                    }
                }
                // Either our own teardown or the tail of a reported error.
                SessionState::Disconnected | SessionState::Error => {}
            },
            SessionEvent::Error => {
                if current == SessionState::Disconnected {
                    debug!("Session: error after teardown, ignoring");
                    return;
                }
                warn!("Session: transport error in {:?}", current);
                self.transition(SessionState::Error);
                if self.cell.link() == LinkState::Connected {
                    self.retry();
                }
            }
            SessionEvent::Message(msg) => self.on_message(&msg),
        }
    }

    fn on_connected(&self) {
        let mut ctl = self.lock();
        if !self.transition(SessionState::Connected) {
            warn!("Session: acknowledgement after link loss, dropping");
            return;
        }
        ctl.budget.reset();

        let Some(identity) = ctl.identity.clone() else {
            return;
        };
        if let Err(e) = ctl
            .transport
            .subscribe(identity.command_topic(), QoS::AtMostOnce)
        {
            warn!("Session: subscribe to {} failed: {}", identity.command_topic(), e);
        }
        if let Err(e) = self.publish_locked(
            &mut ctl,
            identity.status_topic(),
            ONLINE.as_bytes(),
            QoS::AtLeastOnce,
            true,
        ) {
            warn!("Session: online notice failed: {}", e);
        }
    }

    fn on_message(&self, msg: &InboundMessage) {
        if self.current_state() != SessionState::Connected {
            debug!("Session: message on {} while not connected", msg.topic);
            return;
        }
        let for_us = self
            .lock()
            .identity
            .as_ref()
            .is_some_and(|i| i.command_topic() == msg.topic.as_str());
        if !for_us {
            debug!("Session: ignoring message on {}", msg.topic);
            return;
        }
        let Some(command) = RelayCommand::decode(&msg.payload) else {
            debug!("Session: unrecognised command ({} bytes)", msg.payload.len());
            return;
        };

        let target = command.target();
        match self.relay.apply(target) {
            Ok(true) => {
                if let Err(e) = self.publish_relay_state(target, false) {
                    warn!("Session: state confirmation failed: {}", e);
                }
            }
            Ok(false) => debug!("Session: relay already {}", target.as_payload()),
            Err(e) => error!("Session: relay command failed: {}", e),
        }
    }

    /// Count a failure and either reopen after the backoff or stay in
    /// `Error` until the next `start()`.
    fn retry(&self) {
        loop {
            let epoch = {
                let mut ctl = self.lock();
                if ctl.budget.record_failure() {
                    warn!(
                        "Session: {} consecutive failures, giving up",
                        ctl.budget.used()
                    );
                    self.transition(SessionState::Error);
                    return;
                }
                info!(
                    "Session: reconnecting ({}/{}) in {} ms",
                    ctl.budget.used(),
                    ctl.budget.max(),
                    self.policy.backoff.as_millis()
                );
                ctl.epoch
            };

            if !self.policy.backoff.is_zero() {
                std::thread::sleep(self.policy.backoff);
            }

            let mut ctl = self.lock();
            if ctl.epoch != epoch {
                return;
            }
            let Some(options) = ctl.options.clone() else {
                return;
            };
            ctl.transport.disconnect();
            if !self.transition(SessionState::Connecting) {
                return;
            }
            match ctl.transport.connect(&options) {
                Ok(()) => return,
                Err(e) => {
                    warn!("Session: reconnect request failed: {}", e);
                    self.transition(SessionState::Error);
                }
            }
        }
    }

    /// Returns `false` when the cell refused the move (link not up).
    fn transition(&self, next: SessionState) -> bool {
        let Some(previous) = self.cell.set_session(next) else {
            return false;
        };
        if previous != next {
            info!("Session: {:?} -> {:?}", previous, next);
            self.bus.post(SystemEvent::Session(next));
        }
        true
    }

    /// Run the mailbox on a dedicated task.
    pub fn spawn_worker(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        task_pin::spawn_on_core(Core::Pro, 5, 6, "session\0", move || {
            loop {
                let event = this.mailbox.next_blocking();
                this.handle_event(event);
            }
        })
    }
}
