//! Mock hardware for integration tests.
//!
//! Every mock records the calls it receives behind an `Arc`, so a test
//! keeps a clone for inspection after handing the original to a manager.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};

use relaynode::app::connectivity::ConnectivityCell;
use relaynode::app::events::{EventBus, LinkEvent, SessionEvent};
use relaynode::app::identity::DeviceIdentity;
use relaynode::app::indicator::IndicatorEngine;
use relaynode::app::indicator::effects::{IndicatorStatus, Rgb};
use relaynode::app::link::{LinkMailbox, LinkManager, LinkPolicy};
use relaynode::app::orchestrator::Orchestrator;
use relaynode::app::ports::{LinkDriver, PixelOutput, QoS, SessionOptions, SessionTransport};
use relaynode::app::relay::RelayController;
use relaynode::app::session::{Credentials, SessionMailbox, SessionManager, SessionPolicy};
use relaynode::error::{IndicatorError, LinkError, SessionError};

// ── Link driver ───────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockLinkDriver {
    pub associations: Arc<AtomicUsize>,
    pub disassociations: Arc<AtomicUsize>,
    /// When set, every association immediately reports an address.
    pub auto_connect: Option<LinkMailbox>,
}

impl LinkDriver for MockLinkDriver {
    fn associate(&mut self) -> Result<(), LinkError> {
        self.associations.fetch_add(1, Ordering::SeqCst);
        if let Some(mailbox) = &self.auto_connect {
            mailbox.post(LinkEvent::AddressAcquired);
        }
        Ok(())
    }

    fn disassociate(&mut self) {
        self.disassociations.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Broker transport ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Wire {
    Connect(SessionOptions),
    Disconnect,
    Subscribe(String, QoS),
    Publish {
        topic: String,
        payload: String,
        qos: QoS,
        retain: bool,
    },
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub calls: Arc<Mutex<Vec<Wire>>>,
    pub refuse_connect: Arc<AtomicBool>,
    /// When set, every connect is acknowledged through this mailbox.
    pub auto_ack: Option<SessionMailbox>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn take(&self) -> Vec<Wire> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn publishes(&self) -> Vec<(String, String, QoS, bool)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Wire::Publish {
                    topic,
                    payload,
                    qos,
                    retain,
                } => Some((topic.clone(), payload.clone(), *qos, *retain)),
                _ => None,
            })
            .collect()
    }

    pub fn publishes_on(&self, topic: &str) -> Vec<(String, bool)> {
        self.publishes()
            .into_iter()
            .filter(|(t, ..)| t == topic)
            .map(|(_, payload, _, retain)| (payload, retain))
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl SessionTransport for MockTransport {
    fn connect(&mut self, options: &SessionOptions) -> Result<(), SessionError> {
        self.calls
            .lock()
            .unwrap()
            .push(Wire::Connect(options.clone()));
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(SessionError::TransportFailed);
        }
        if let Some(mailbox) = &self.auto_ack {
            mailbox.post(SessionEvent::Connected);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.calls.lock().unwrap().push(Wire::Disconnect);
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), SessionError> {
        self.calls
            .lock()
            .unwrap()
            .push(Wire::Subscribe(topic.into(), qos));
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        self.calls.lock().unwrap().push(Wire::Publish {
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into(),
            qos,
            retain,
        });
        Ok(())
    }
}

// ── Relay pin ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct PinFault;

impl embedded_hal::digital::Error for PinFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

#[derive(Clone, Default)]
pub struct MockPin {
    pub levels: Arc<Mutex<Vec<bool>>>,
    pub faulty: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl MockPin {
    pub fn writes(&self) -> usize {
        self.levels.lock().unwrap().len()
    }

    pub fn level(&self) -> Option<bool> {
        self.levels.lock().unwrap().last().copied()
    }
}

impl ErrorType for MockPin {
    type Error = PinFault;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), PinFault> {
        if self.faulty.load(Ordering::SeqCst) {
            return Err(PinFault);
        }
        self.levels.lock().unwrap().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), PinFault> {
        if self.faulty.load(Ordering::SeqCst) {
            return Err(PinFault);
        }
        self.levels.lock().unwrap().push(true);
        Ok(())
    }
}

// ── Pixel ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingPixel {
    pub frames: Arc<Mutex<Vec<Rgb>>>,
}

#[allow(dead_code)]
impl RecordingPixel {
    pub fn last(&self) -> Option<Rgb> {
        self.frames.lock().unwrap().last().copied()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }
}

impl PixelOutput for RecordingPixel {
    fn write(&mut self, colour: Rgb) -> Result<(), IndicatorError> {
        self.frames.lock().unwrap().push(colour);
        Ok(())
    }
}

/// Pixel whose `stall_on`-th write blocks for `stall`.  Frames are
/// recorded with their entry time, before any stall.
#[derive(Clone)]
pub struct StallingPixel {
    pub frames: Arc<Mutex<Vec<(Instant, Rgb)>>>,
    pub calls: Arc<AtomicUsize>,
    pub stall_on: usize,
    pub stall: Duration,
}

#[allow(dead_code)]
impl StallingPixel {
    pub fn new(stall_on: usize, stall: Duration) -> Self {
        Self {
            frames: Arc::default(),
            calls: Arc::default(),
            stall_on,
            stall,
        }
    }

    pub fn last(&self) -> Option<Rgb> {
        self.frames.lock().unwrap().last().map(|&(_, c)| c)
    }

    pub fn since(&self, t: Instant) -> Vec<Rgb> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|&&(at, _)| at >= t)
            .map(|&(_, c)| c)
            .collect()
    }
}

impl PixelOutput for StallingPixel {
    fn write(&mut self, colour: Rgb) -> Result<(), IndicatorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.frames.lock().unwrap().push((Instant::now(), colour));
        if n == self.stall_on {
            std::thread::sleep(self.stall);
        }
        Ok(())
    }
}

// ── Assembled device ──────────────────────────────────────────

pub const DEVICE_ID: &str = "porch";
pub const STATUS_TOPIC: &str = "porch/status";
pub const COMMAND_TOPIC: &str = "porch/relay/set";
pub const STATE_TOPIC: &str = "porch/relay/state";

/// Every component wired to mocks the way `main` wires hardware.
#[allow(dead_code)]
pub struct Device {
    pub link: Arc<LinkManager>,
    pub session: Arc<SessionManager>,
    pub relay: Arc<RelayController>,
    pub indicator: Arc<IndicatorEngine>,
    pub orchestrator: Arc<Orchestrator>,
    pub cell: Arc<ConnectivityCell>,
    pub bus: EventBus,
    pub link_mailbox: LinkMailbox,
    pub session_mailbox: SessionMailbox,
    pub radio: MockLinkDriver,
    pub broker: MockTransport,
    pub pin: MockPin,
    pub pixel: RecordingPixel,
}

#[derive(Clone, Copy)]
pub struct Options {
    pub max_retries: u8,
    /// Drivers answer through the mailboxes instead of the test.
    pub autonomous: bool,
    pub credentials: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_retries: 3,
            autonomous: false,
            credentials: false,
        }
    }
}

#[allow(dead_code)]
impl Device {
    pub fn new() -> Self {
        Self::with(Options::default())
    }

    pub fn with(opts: Options) -> Self {
        let bus = EventBus::system();
        let cell = Arc::new(ConnectivityCell::new());
        let link_mailbox = LinkMailbox::new("link");
        let session_mailbox = SessionMailbox::new("session");

        let radio = MockLinkDriver {
            auto_connect: opts.autonomous.then(|| link_mailbox.clone()),
            ..MockLinkDriver::default()
        };
        let broker = MockTransport {
            auto_ack: opts.autonomous.then(|| session_mailbox.clone()),
            ..MockTransport::default()
        };
        let pin = MockPin::default();
        let pixel = RecordingPixel::default();

        let relay = Arc::new(RelayController::new(Box::new(pin.clone()), false).with_bus(bus.clone()));
        relay.initialize().unwrap();

        let link = Arc::new(LinkManager::new(
            Box::new(radio.clone()),
            LinkPolicy {
                max_retries: opts.max_retries,
                backoff: Duration::ZERO,
            },
            Arc::clone(&cell),
            bus.clone(),
            link_mailbox.clone(),
        ));
        let session = Arc::new(SessionManager::new(
            Box::new(broker.clone()),
            SessionPolicy {
                max_retries: opts.max_retries,
                backoff: Duration::ZERO,
                keep_alive_secs: 45,
            },
            Arc::clone(&relay),
            Arc::clone(&cell),
            bus.clone(),
            session_mailbox.clone(),
        ));
        let credentials = opts.credentials.then(|| Credentials {
            username: heapless::String::try_from("porch-user").unwrap(),
            password: Some(heapless::String::try_from("hunter22").unwrap()),
        });
        session.initialize(
            DeviceIdentity::new(DEVICE_ID).unwrap(),
            heapless::String::try_from("mqtt://broker.local:1883").unwrap(),
            credentials,
        );

        let indicator = Arc::new(IndicatorEngine::new(Box::new(pixel.clone())));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&link),
            Arc::clone(&session),
            Arc::clone(&relay),
            Some(Arc::clone(&indicator)),
            Arc::clone(&cell),
            bus.clone(),
        ));

        Self {
            link,
            session,
            relay,
            indicator,
            orchestrator,
            cell,
            bus,
            link_mailbox,
            session_mailbox,
            radio,
            broker,
            pin,
            pixel,
        }
    }

    /// Dispatch bus events until the bus stays empty.
    pub fn settle(&self) {
        while self.orchestrator.dispatch_pending() > 0 {}
    }

    /// Link up, session up, everything dispatched, wire log cleared.
    pub fn online(&self) {
        self.link.start().unwrap();
        self.link.handle_event(LinkEvent::AddressAcquired);
        self.settle();
        self.session.handle_event(SessionEvent::Connected);
        self.settle();
        self.broker.clear();
    }

    pub fn command(&self, payload: &[u8]) {
        assert!(relaynode::app::session::forward_message(
            &self.session_mailbox,
            COMMAND_TOPIC,
            payload
        ));
        let event = self.session_mailbox.try_next().unwrap();
        self.session.handle_event(event);
        self.settle();
    }

    pub fn showing(&self, status: IndicatorStatus) -> bool {
        self.indicator.current_effect() == Some(status.request())
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
