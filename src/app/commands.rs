//! Inbound command decoding.
//!
//! Messages arriving on `{id}/relay/set` are copied into fixed-capacity
//! buffers at the transport boundary and decoded here.  Anything that
//! does not fit, or is not exactly one of the recognised literals, is
//! rejected without touching any state.

use super::relay::RelayState;

/// Topic buffer capacity.  Longer topics are rejected, never truncated.
pub const MAX_TOPIC_LEN: usize = 64;

/// Payload buffer capacity for inbound commands.
pub const MAX_PAYLOAD_LEN: usize = 16;

/// A message received from the broker, bounded at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: heapless::String<MAX_TOPIC_LEN>,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
}

impl InboundMessage {
    /// Copy a raw transport message into bounded buffers.
    /// Returns `None` when either part exceeds its bound.
    pub fn bounded(topic: &str, payload: &[u8]) -> Option<Self> {
        let topic = heapless::String::try_from(topic).ok()?;
        let payload = heapless::Vec::from_slice(payload).ok()?;
        Some(Self { topic, payload })
    }
}

/// Relay command carried on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    On,
    Off,
}

impl RelayCommand {
    /// Byte-exact match against `"on"` / `"off"`.  Case-sensitive, no
    /// trimming; everything else is `None`.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        match payload {
            b"on" => Some(Self::On),
            b"off" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn target(self) -> RelayState {
        match self {
            Self::On => RelayState::On,
            Self::Off => RelayState::Off,
        }
    }
}
