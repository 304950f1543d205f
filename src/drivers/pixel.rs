//! Single WS2812-class addressable pixel.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: one RMT TX channel clocks out 24 bits per frame, green
//! first, MSB first.
//! On host/test: [`SimPixel`] keeps the last colour in memory.

use crate::app::indicator::effects::Rgb;
use crate::app::ports::PixelOutput;
use crate::error::IndicatorError;

/// Wire order for one frame: G7..G0 R7..R0 B7..B0.
pub fn grb_word(colour: Rgb) -> u32 {
    let (r, g, b) = colour;
    (u32::from(g) << 16) | (u32::from(r) << 8) | u32::from(b)
}

// ── RMT pixel ─────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct RmtPixel {
    tx: esp_idf_svc::hal::rmt::TxRmtDriver<'static>,
    zero: (esp_idf_svc::hal::rmt::Pulse, esp_idf_svc::hal::rmt::Pulse),
    one: (esp_idf_svc::hal::rmt::Pulse, esp_idf_svc::hal::rmt::Pulse),
}

#[cfg(target_os = "espidf")]
impl RmtPixel {
    pub fn new(
        channel: impl esp_idf_svc::hal::peripheral::Peripheral<
            P = impl esp_idf_svc::hal::rmt::RmtChannel,
        > + 'static,
        gpio: u8,
    ) -> Result<Self, IndicatorError> {
        use core::time::Duration;
        use esp_idf_svc::hal::gpio::{AnyOutputPin, PinState};
        use esp_idf_svc::hal::rmt::config::TransmitConfig;
        use esp_idf_svc::hal::rmt::{Pulse, TxRmtDriver};

        let fail = |e: esp_idf_svc::sys::EspError| {
            log::error!("Pixel: RMT setup failed: {}", e);
            IndicatorError::OutputFailed
        };
        // Bounded by config validation; no other driver claims this pad.
        let pin = unsafe { AnyOutputPin::new(i32::from(gpio)) };
        let tx = TxRmtDriver::new(channel, pin, &TransmitConfig::new().clock_divider(1))
            .map_err(fail)?;
        let ticks = tx.counter_clock().map_err(fail)?;
        let pulse = |state, ns| Pulse::new_with_duration(ticks, state, &Duration::from_nanos(ns));

        Ok(Self {
            zero: (
                pulse(PinState::High, 350).map_err(fail)?,
                pulse(PinState::Low, 800).map_err(fail)?,
            ),
            one: (
                pulse(PinState::High, 700).map_err(fail)?,
                pulse(PinState::Low, 600).map_err(fail)?,
            ),
            tx,
        })
    }
}

#[cfg(target_os = "espidf")]
impl PixelOutput for RmtPixel {
    fn write(&mut self, colour: Rgb) -> Result<(), IndicatorError> {
        use esp_idf_svc::hal::rmt::FixedLengthSignal;

        let word = grb_word(colour);
        let mut signal = FixedLengthSignal::<24>::new();
        for i in 0..24 {
            let bit = (word >> (23 - i)) & 1 == 1;
            let pair = if bit { &self.one } else { &self.zero };
            signal
                .set(i as usize, pair)
                .map_err(|_| IndicatorError::OutputFailed)?;
        }
        self.tx
            .start_blocking(&signal)
            .map_err(|_| IndicatorError::OutputFailed)
    }
}

// ── Simulation pixel ──────────────────────────────────────────

/// In-memory pixel; clones share the same colour.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Default)]
pub struct SimPixel {
    last: std::sync::Arc<std::sync::Mutex<Rgb>>,
}

#[cfg(not(target_os = "espidf"))]
impl SimPixel {
    pub fn colour(&self) -> Rgb {
        *self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(not(target_os = "espidf"))]
impl PixelOutput for SimPixel {
    fn write(&mut self, colour: Rgb) -> Result<(), IndicatorError> {
        *self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = colour;
        Ok(())
    }
}
