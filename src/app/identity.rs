//! Device identity and the topic namespace derived from it.

use core::fmt::Write;

use crate::config::MAX_DEVICE_ID_LEN;
use crate::error::ConfigError;

use super::commands::MAX_TOPIC_LEN;

pub type Topic = heapless::String<MAX_TOPIC_LEN>;

/// Immutable device id plus its three pre-rendered topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: heapless::String<MAX_DEVICE_ID_LEN>,
    status: Topic,
    command: Topic,
    state: Topic,
}

impl DeviceIdentity {
    pub fn new(id: &str) -> Result<Self, ConfigError> {
        let invalid = ConfigError::ValidationFailed("device_id");
        if id.is_empty()
            || id
                .bytes()
                .any(|b| matches!(b, b'/' | b'+' | b'#') || !b.is_ascii_graphic())
        {
            return Err(invalid);
        }
        let id: heapless::String<MAX_DEVICE_ID_LEN> =
            heapless::String::try_from(id).map_err(|_| invalid)?;

        Ok(Self {
            status: topic(&id, "status")?,
            command: topic(&id, "relay/set")?,
            state: topic(&id, "relay/state")?,
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owned copy of the id, used as the broker client id.
    pub fn client_id(&self) -> heapless::String<MAX_DEVICE_ID_LEN> {
        self.id.clone()
    }

    /// Owned copy of the status topic, registered as the last-will topic.
    pub fn will_topic(&self) -> Topic {
        self.status.clone()
    }

    /// `{id}/status`: presence, retained.
    pub fn status_topic(&self) -> &str {
        &self.status
    }

    /// `{id}/relay/set`: inbound commands.
    pub fn command_topic(&self) -> &str {
        &self.command
    }

    /// `{id}/relay/state`: confirmed relay state.
    pub fn state_topic(&self) -> &str {
        &self.state
    }
}

fn topic(id: &str, suffix: &str) -> Result<Topic, ConfigError> {
    let mut t = Topic::new();
    write!(t, "{id}/{suffix}").map_err(|_| ConfigError::ValidationFailed("device_id"))?;
    Ok(t)
}
