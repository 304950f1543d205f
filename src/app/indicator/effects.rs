//! Indicator effect catalogue.
//!
//! Every effect is a pure function of an increasing step counter, so the
//! render loop only has to count frames and the output for any step can
//! be asserted directly in tests.  One step lasts a tenth of the
//! request's cycle period.
//!
//! ## Effects
//!
//! | Effect     | Shape                                  | Cycle          |
//! |------------|----------------------------------------|----------------|
//! | Solid      | Constant colour                        | -              |
//! | Blink      | 50 % square wave                       | 10 steps       |
//! | Breathe    | Raised sine envelope                   | ~63 steps      |
//! | Pulse      | Rectified sine                         | ~16 steps      |
//! | FadeInOut  | Linear triangle ramp                   | 200 steps      |
//! | Strobe     | 20 % duty flash                        | 10 steps       |
//! | Rainbow    | Hue wheel, 10° per step                | 36 steps       |
//! | Fire       | Red base, noisy green/blue flicker     | per step       |
//! | Sparkle    | Colour on ~1 step in 10                | per step       |

use core::time::Duration;

use crate::app::relay::RelayState;

/// Colour as (R, G, B) tuple, each 0–255.
pub type Rgb = (u8, u8, u8);

/// Animated effects that do not repeat stop after this many steps.
pub const ONE_SHOT_STEPS: u32 = 100;

// ── Palette ───────────────────────────────────────────────────

pub const COLOUR_OFF: Rgb = (0, 0, 0);
pub const COLOUR_RED: Rgb = (255, 0, 0);
pub const COLOUR_GREEN: Rgb = (0, 255, 0);
pub const COLOUR_BLUE: Rgb = (0, 0, 255);
pub const COLOUR_YELLOW: Rgb = (255, 255, 0);
pub const COLOUR_CYAN: Rgb = (0, 255, 255);
pub const COLOUR_MAGENTA: Rgb = (255, 0, 255);
pub const COLOUR_WHITE: Rgb = (255, 255, 255);
pub const COLOUR_ORANGE: Rgb = (255, 165, 0);
pub const COLOUR_PURPLE: Rgb = (128, 0, 128);
pub const COLOUR_PINK: Rgb = (255, 192, 203);
pub const COLOUR_LIME: Rgb = (50, 205, 50);

// ── Requests ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Solid,
    Blink,
    Breathe,
    Pulse,
    FadeInOut,
    Strobe,
    Rainbow,
    Fire,
    Sparkle,
}

/// One effect to render.  Replaces whatever is rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorRequest {
    pub effect: EffectKind,
    pub primary: Rgb,
    /// Colour for the "off" phase of blink, strobe and sparkle.
    pub secondary: Option<Rgb>,
    /// Full cycle period; one step is a tenth of it.
    pub period_ms: u32,
    /// Per-effect brightness, applied before the global level.
    pub brightness: u8,
    pub repeat: bool,
}

impl IndicatorRequest {
    pub const fn solid(colour: Rgb, brightness: u8) -> Self {
        Self {
            effect: EffectKind::Solid,
            primary: colour,
            secondary: None,
            period_ms: 1000,
            brightness,
            repeat: false,
        }
    }

    pub const fn animated(effect: EffectKind, colour: Rgb, period_ms: u32, brightness: u8) -> Self {
        Self {
            effect,
            primary: colour,
            secondary: None,
            period_ms,
            brightness,
            repeat: true,
        }
    }

    /// Delay between frames: a tenth of the period, at least 1 ms.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(u64::from((self.period_ms / 10).max(1)))
    }

    /// Solid effects hold their colour until replaced.
    pub fn is_animated(&self) -> bool {
        self.effect != EffectKind::Solid
    }

    /// Whether rendering ends on its own after `steps` frames.
    pub fn finished(&self, steps: u32) -> bool {
        self.is_animated() && !self.repeat && steps >= ONE_SHOT_STEPS
    }
}

// ── Status catalogue ──────────────────────────────────────────

/// Canonical device states shown on the indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorStatus {
    Disconnected,
    Connecting,
    /// Link up, session not (yet) established.
    LinkUp,
    /// Session up; colour follows the relay when known.
    SessionUp(Option<RelayState>),
    Error,
}

impl IndicatorStatus {
    pub const fn request(self) -> IndicatorRequest {
        match self {
            Self::Disconnected => IndicatorRequest::solid(COLOUR_OFF, 0),
            Self::Connecting => IndicatorRequest::animated(EffectKind::Breathe, COLOUR_BLUE, 1000, 128),
            Self::LinkUp => IndicatorRequest::animated(EffectKind::Blink, COLOUR_CYAN, 500, 200),
            Self::SessionUp(None | Some(RelayState::On)) => IndicatorRequest {
                period_ms: 5000,
                ..IndicatorRequest::solid(COLOUR_GREEN, 255)
            },
            Self::SessionUp(Some(RelayState::Off)) => IndicatorRequest {
                period_ms: 5000,
                ..IndicatorRequest::solid(COLOUR_YELLOW, 255)
            },
            Self::Error => IndicatorRequest::animated(EffectKind::Strobe, COLOUR_RED, 200, 255),
        }
    }
}

// ── Frame generation ──────────────────────────────────────────

/// Colour for `step`, with the request's own brightness applied.
pub fn frame(req: &IndicatorRequest, step: u32) -> Rgb {
    let alt = req.secondary.unwrap_or(COLOUR_OFF);
    let level = req.brightness;
    match req.effect {
        EffectKind::Solid => scale(req.primary, level),
        EffectKind::Blink => {
            let colour = if step % 10 < 5 { req.primary } else { alt };
            scale(colour, level)
        }
        EffectKind::Breathe => {
            let env = ((step as f32 * 0.1).sin() + 1.0) / 2.0;
            scale(req.primary, envelope(env, level))
        }
        EffectKind::Pulse => {
            let env = (step as f32 * 0.2).sin().abs();
            scale(req.primary, envelope(env, level))
        }
        EffectKind::FadeInOut => {
            let pos = step % 200;
            let ramp = if pos < 100 { pos } else { 200 - pos };
            scale(req.primary, (ramp * u32::from(level) / 100) as u8)
        }
        EffectKind::Strobe => {
            let colour = if step % 10 < 2 { req.primary } else { alt };
            scale(colour, level)
        }
        EffectKind::Rainbow => hsv_to_rgb(((step % 36) * 10) as u16, 255, level),
        EffectKind::Fire => {
            let n = noise(step);
            let flame = (255, 50 + (n % 100) as u8, ((n >> 8) % 20) as u8);
            scale(flame, level)
        }
        EffectKind::Sparkle => {
            let colour = if noise(step) % 10 == 0 { req.primary } else { alt };
            scale(colour, level)
        }
    }
}

fn envelope(env: f32, level: u8) -> u8 {
    (env.clamp(0.0, 1.0) * f32::from(level)) as u8
}

/// Multiply every channel by `brightness / 255`.
pub fn scale(colour: Rgb, brightness: u8) -> Rgb {
    if brightness == 255 {
        return colour;
    }
    let br = brightness as u16;
    (
        ((colour.0 as u16 * br) / 255) as u8,
        ((colour.1 as u16 * br) / 255) as u8,
        ((colour.2 as u16 * br) / 255) as u8,
    )
}

/// Linear mix: `factor` 0 yields `a`, 255 yields `b`.
pub fn blend(a: Rgb, b: Rgb, factor: u8) -> Rgb {
    let f = factor as u16;
    let mix = |x: u8, y: u8| ((x as u16 * (255 - f) + y as u16 * f) / 255) as u8;
    (mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Hue in degrees (wrapped to 0–359), saturation and value 0–255.
pub fn hsv_to_rgb(hue: u16, saturation: u8, value: u8) -> Rgb {
    if saturation == 0 {
        return (value, value, value);
    }
    let hue = u32::from(hue % 360);
    let sector = hue / 60;
    // Position inside the sector, 0–255.
    let frac = (hue % 60) * 255 / 60;
    let v = u32::from(value);
    let s = u32::from(saturation);

    let p = (v * (255 - s) / 255) as u8;
    let q = (v * (255 - s * frac / 255) / 255) as u8;
    let t = (v * (255 - s * (255 - frac) / 255) / 255) as u8;

    match sector {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    }
}

/// Stateless integer hash; gives fire and sparkle a repeatable flicker.
fn noise(step: u32) -> u32 {
    let mut x = step.wrapping_mul(0x9E37_79B9) ^ 0x85EB_CA6B;
    x ^= x >> 16;
    x = x.wrapping_mul(0x7FEB_352D);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846C_A68B);
    x ^ (x >> 16)
}
