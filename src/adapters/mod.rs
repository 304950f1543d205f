//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements        | Connects to              |
//! |-------------|-------------------|--------------------------|
//! | `wifi`      | LinkDriver        | ESP-IDF WiFi STA         |
//! | `mqtt`      | SessionTransport  | ESP-IDF MQTT client      |
//! | `device_id` | -                 | eFuse factory MAC        |
//!
//! The relay and indicator outputs live in [`crate::drivers`].

pub mod device_id;
pub mod mqtt;
pub mod wifi;
