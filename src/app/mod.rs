//! Application core: pure domain logic, zero I/O.
//!
//! This module contains the business rules for the RelayNode device:
//! link and session lifecycles, the relay, the status indicator and the
//! orchestrator that ties them together.  All interaction with hardware
//! happens through **port traits** defined in [`ports`], keeping this
//! layer fully testable without real peripherals.

pub mod commands;
pub mod connectivity;
pub mod events;
pub mod identity;
pub mod indicator;
pub mod link;
pub mod orchestrator;
pub mod ports;
pub mod relay;
pub mod session;
