//! Relay coil output pin.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: a push-pull `PinDriver` on the configured GPIO.
//! On host/test: [`SimPin`], an in-memory level that can be told to fail.
//!
//! Both implement `embedded_hal::digital::OutputPin`, which gives them
//! [`RelayOutput`](crate::app::ports::RelayOutput) through the blanket impl.

use crate::error::RelayError;

#[cfg(target_os = "espidf")]
pub type RelayPin = esp_idf_svc::hal::gpio::PinDriver<
    'static,
    esp_idf_svc::hal::gpio::AnyOutputPin,
    esp_idf_svc::hal::gpio::Output,
>;

#[cfg(not(target_os = "espidf"))]
pub type RelayPin = SimPin;

/// Claim `gpio` as a push-pull output.
#[cfg(target_os = "espidf")]
pub fn relay_pin(gpio: u8) -> Result<RelayPin, RelayError> {
    use esp_idf_svc::hal::gpio::{AnyOutputPin, PinDriver};

    // Bounded by config validation; no other driver claims this pad.
    let pin = unsafe { AnyOutputPin::new(i32::from(gpio)) };
    PinDriver::output(pin).map_err(|e| {
        log::error!("Relay: GPIO{} unavailable: {}", gpio, e);
        RelayError::GpioWriteFailed
    })
}

#[cfg(not(target_os = "espidf"))]
pub fn relay_pin(gpio: u8) -> Result<RelayPin, RelayError> {
    log::debug!("Relay(sim): GPIO{}", gpio);
    Ok(SimPin::default())
}

// ── Simulation pin ────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub use sim::{SimPin, SimPinError};

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SimPinError;

    impl embedded_hal::digital::Error for SimPinError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// Cloneable handle on one simulated output level.
    #[derive(Debug, Clone, Default)]
    pub struct SimPin {
        level: Arc<AtomicBool>,
        writes: Arc<AtomicUsize>,
        broken: Arc<AtomicBool>,
    }

    impl SimPin {
        pub fn is_high(&self) -> bool {
            self.level.load(Ordering::SeqCst)
        }

        /// Successful writes so far.
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        /// Make every subsequent write fail.
        pub fn break_pin(&self, broken: bool) {
            self.broken.store(broken, Ordering::SeqCst);
        }

        fn write_level(&self, high: bool) -> Result<(), SimPinError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(SimPinError);
            }
            self.level.store(high, Ordering::SeqCst);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl ErrorType for SimPin {
        type Error = SimPinError;
    }

    impl OutputPin for SimPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.write_level(false)
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.write_level(true)
        }
    }
}
