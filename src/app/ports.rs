//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Link / Session / Relay / Indicator (domain)
//! ```
//!
//! Driven adapters (radio, broker client, GPIO, pixel) implement these
//! traits.  The managers own them as boxed trait objects or generics, so
//! the domain core never touches hardware or sockets directly and every
//! state machine can be driven from host tests with mocks.
//!
//! Drivers report asynchronous outcomes by posting events back to the
//! owning manager (`LinkManager::post`, `SessionManager::post`); the port
//! calls themselves only *request* work.

use crate::error::{IndicatorError, LinkError, RelayError, SessionError};

use super::indicator::effects::Rgb;

// ───────────────────────────────────────────────────────────────
// Link driver (domain → radio)
// ───────────────────────────────────────────────────────────────

/// Station-mode radio driver.
pub trait LinkDriver: Send {
    /// Begin association with the configured access point.  Returns once
    /// the request is issued; the outcome arrives later as a `LinkEvent`.
    fn associate(&mut self) -> Result<(), LinkError>;

    /// Drop the current association (or abort one in progress).
    fn disassociate(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Session transport (domain → broker client)
// ───────────────────────────────────────────────────────────────

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// Last-will registered with the broker at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: heapless::String<64>,
    pub payload: &'static str,
    pub qos: QoS,
    pub retain: bool,
}

/// Everything a transport needs to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub broker_uri: heapless::String<128>,
    pub client_id: heapless::String<32>,
    pub username: Option<heapless::String<64>>,
    pub password: Option<heapless::String<64>>,
    pub keep_alive_secs: u16,
    pub last_will: LastWill,
}

/// Publish/subscribe client.
pub trait SessionTransport: Send {
    /// Open a session.  Acknowledgement arrives as `SessionEvent::Connected`.
    fn connect(&mut self, options: &SessionOptions) -> Result<(), SessionError>;

    /// Close the session and release the client.
    fn disconnect(&mut self);

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), SessionError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError>;
}

// ───────────────────────────────────────────────────────────────
// Relay output (domain → GPIO)
// ───────────────────────────────────────────────────────────────

/// Single digital output driving the relay coil.
///
/// `level` is the electrical level; polarity is resolved by the
/// [`RelayController`](super::relay::RelayController).
pub trait RelayOutput: Send {
    fn drive(&mut self, level: bool) -> Result<(), RelayError>;
}

impl<P> RelayOutput for P
where
    P: embedded_hal::digital::OutputPin + Send,
{
    fn drive(&mut self, level: bool) -> Result<(), RelayError> {
        let result = if level { self.set_high() } else { self.set_low() };
        result.map_err(|_| RelayError::GpioWriteFailed)
    }
}

// ───────────────────────────────────────────────────────────────
// Pixel output (domain → indicator hardware)
// ───────────────────────────────────────────────────────────────

/// The single visual output.  Receives fully scaled colours.
pub trait PixelOutput: Send {
    fn write(&mut self, colour: Rgb) -> Result<(), IndicatorError>;
}
