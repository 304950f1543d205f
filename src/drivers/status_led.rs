//! Two-state status LED.
//!
//! Boards without an addressable pixel carry a plain LED.  It stands in
//! for the pixel: a frame lights it when its brightest channel reaches
//! [`MONO_THRESHOLD`], so blink and strobe keep their rhythm and breathe
//! becomes a slow on/off.
//!
//! ## Dual-target design
//!
//! Generic over `embedded_hal::digital::OutputPin`: a `PinDriver` on
//! ESP-IDF, a [`SimPin`](super::relay_pin::SimPin) on host.

use embedded_hal::digital::OutputPin;

use crate::app::indicator::effects::Rgb;
use crate::app::ports::PixelOutput;
use crate::error::IndicatorError;

/// Channel level at or above which the LED is lit.
pub const MONO_THRESHOLD: u8 = 64;

pub struct MonoLed<P> {
    pin: P,
    lit: Option<bool>,
}

impl<P: OutputPin> MonoLed<P> {
    pub fn new(pin: P) -> Self {
        Self { pin, lit: None }
    }

    pub fn is_lit(&self) -> bool {
        self.lit == Some(true)
    }
}

impl<P: OutputPin + Send> PixelOutput for MonoLed<P> {
    fn write(&mut self, colour: Rgb) -> Result<(), IndicatorError> {
        let (r, g, b) = colour;
        let on = r.max(g).max(b) >= MONO_THRESHOLD;
        if self.lit == Some(on) {
            return Ok(());
        }
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|_| IndicatorError::OutputFailed)?;
        self.lit = Some(on);
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
pub fn mono_led(
    gpio: u8,
) -> Result<MonoLed<super::relay_pin::RelayPin>, IndicatorError> {
    super::relay_pin::relay_pin(gpio)
        .map(MonoLed::new)
        .map_err(|_| IndicatorError::OutputFailed)
}
