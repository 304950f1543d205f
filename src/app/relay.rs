//! Relay controller: sole owner of the relay output and its state.
//!
//! The state starts `Off` on every boot and only changes after the pin
//! write succeeds, so `get_state()` always reflects what was last driven.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{error, info};

use crate::error::RelayError;

use super::events::{EventBus, SystemEvent};
use super::ports::RelayOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Off,
    On,
}

impl RelayState {
    /// Wire representation on `{id}/relay/state`.
    pub fn as_payload(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }
}

struct RelayInner {
    output: Box<dyn RelayOutput>,
    state: RelayState,
}

pub struct RelayController {
    inner: Mutex<RelayInner>,
    active_low: bool,
    bus: Option<EventBus>,
}

impl RelayController {
    pub fn new(output: Box<dyn RelayOutput>, active_low: bool) -> Self {
        Self {
            inner: Mutex::new(RelayInner {
                output,
                state: RelayState::Off,
            }),
            active_low,
            bus: None,
        }
    }

    /// Announce successful changes on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn lock(&self) -> MutexGuard<'_, RelayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn level(&self, state: RelayState) -> bool {
        (state == RelayState::On) != self.active_low
    }

    /// Force the output off regardless of the power-on pin level.
    pub fn initialize(&self) -> Result<(), RelayError> {
        let mut inner = self.lock();
        inner.output.drive(self.level(RelayState::Off)).inspect_err(|e| {
            error!("Relay: fail-safe off write failed: {}", e);
        })?;
        inner.state = RelayState::Off;
        info!("Relay: initialised (off, active_low={})", self.active_low);
        Ok(())
    }

    /// Drive the output to `state`.  The pin is written even when the
    /// state is unchanged; the recorded state moves only on success.
    pub fn set_state(&self, state: RelayState) -> Result<(), RelayError> {
        self.write(state, true).map(|_| ())
    }

    /// Drive the output only if `state` differs from the current state.
    /// Returns whether a change was applied.
    pub fn apply(&self, state: RelayState) -> Result<bool, RelayError> {
        self.write(state, false)
    }

    fn write(&self, state: RelayState, force: bool) -> Result<bool, RelayError> {
        let mut inner = self.lock();
        let previous = inner.state;
        if !force && previous == state {
            return Ok(false);
        }
        if let Err(e) = inner.output.drive(self.level(state)) {
            error!("Relay: write {:?} failed: {}", state, e);
            return Err(e);
        }
        inner.state = state;
        drop(inner);

        let changed = previous != state;
        if changed {
            info!("Relay: {:?} -> {:?}", previous, state);
            if let Some(bus) = &self.bus {
                bus.post(SystemEvent::Relay(state));
            }
        }
        Ok(changed)
    }

    pub fn get_state(&self) -> RelayState {
        self.lock().state
    }

    pub fn turn_on(&self) -> Result<(), RelayError> {
        self.set_state(RelayState::On)
    }

    pub fn turn_off(&self) -> Result<(), RelayError> {
        self.set_state(RelayState::Off)
    }

    /// Invert the current state under a single lock.
    pub fn toggle(&self) -> Result<RelayState, RelayError> {
        let mut inner = self.lock();
        let next = inner.state.toggled();
        inner.output.drive(self.level(next))?;
        inner.state = next;
        drop(inner);

        info!("Relay: toggled -> {:?}", next);
        if let Some(bus) = &self.bus {
            bus.post(SystemEvent::Relay(next));
        }
        Ok(next)
    }
}
