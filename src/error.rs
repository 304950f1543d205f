//! Unified error types for the RelayNode firmware.
//!
//! A single `Error` enum that every subsystem converts into, so the binary
//! edge can report failures uniformly.  All variants are `Copy` so they can
//! be handed across task boundaries and stored in state records without
//! allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The wireless link could not be driven.
    Link(LinkError),
    /// The messaging session rejected an operation.
    Session(SessionError),
    /// The relay output could not be written.
    Relay(RelayError),
    /// The indicator could not render.
    Indicator(IndicatorError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Session(e) => write!(f, "session: {e}"),
            Self::Relay(e) => write!(f, "relay: {e}"),
            Self::Indicator(e) => write!(f, "indicator: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The radio driver refused to start association.
    DriverFailed,
    /// Credentials were rejected by the driver before association.
    InvalidCredentials,
    /// A link worker task could not be spawned.
    WorkerUnavailable,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DriverFailed => write!(f, "radio driver failed"),
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::WorkerUnavailable => write!(f, "link worker unavailable"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// `start()` was called while the link is not associated.
    LinkDown,
    /// Publishing requires an established session.
    NotConnected,
    /// `initialize()` has not been called.
    NotInitialized,
    /// The transport reported a failure.
    TransportFailed,
    /// Topic exceeds the fixed topic buffer.
    TopicTooLong,
    /// Payload exceeds the fixed payload buffer.
    PayloadTooLong,
    /// A session worker task could not be spawned.
    WorkerUnavailable,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkDown => write!(f, "link not connected"),
            Self::NotConnected => write!(f, "session not connected"),
            Self::NotInitialized => write!(f, "session not initialised"),
            Self::TransportFailed => write!(f, "transport failed"),
            Self::TopicTooLong => write!(f, "topic too long"),
            Self::PayloadTooLong => write!(f, "payload too long"),
            Self::WorkerUnavailable => write!(f, "session worker unavailable"),
        }
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

// ---------------------------------------------------------------------------
// Relay errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// GPIO set failed.
    GpioWriteFailed,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
        }
    }
}

impl From<RelayError> for Error {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

// ---------------------------------------------------------------------------
// Indicator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorError {
    /// Pixel or LED write failed.
    OutputFailed,
    /// The output stayed held by an abandoned render task.
    OutputBusy,
    /// The render task could not be spawned.
    RenderTaskUnavailable,
}

impl fmt::Display for IndicatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutputFailed => write!(f, "indicator output failed"),
            Self::OutputBusy => write!(f, "indicator output busy"),
            Self::RenderTaskUnavailable => write!(f, "render task unavailable"),
        }
    }
}

impl From<IndicatorError> for Error {
    fn from(e: IndicatorError) -> Self {
        Self::Indicator(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is outside its accepted range; the tag names the field.
    ValidationFailed(&'static str),
    /// The provisioning document could not be parsed.
    ParseFailed,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(field) => write!(f, "invalid {field}"),
            Self::ParseFailed => write!(f, "parse failed"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
