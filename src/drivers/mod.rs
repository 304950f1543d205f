//! Output drivers and task helpers.

pub mod pixel;
pub mod relay_pin;
pub mod status_led;
pub mod task_pin;
