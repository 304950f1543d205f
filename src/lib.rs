//! RelayNode firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;

// Adapters and drivers compile on every target; the hardware halves are
// guarded by cfg attributes inside.
pub mod adapters;
pub mod drivers;
