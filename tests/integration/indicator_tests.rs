//! Indicator engine driving the recording pixel and the mono LED.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use relaynode::app::indicator::effects::{
    COLOUR_BLUE, COLOUR_CYAN, COLOUR_GREEN, COLOUR_RED, EffectKind, IndicatorRequest,
    IndicatorStatus,
};
use relaynode::app::indicator::{IndicatorEngine, STOP_POLL, STOP_POLLS};
use relaynode::drivers::status_led::MonoLed;

use crate::mock_hw::{MockPin, RecordingPixel, StallingPixel, eventually};

#[test]
fn back_to_back_effects_leave_only_the_second() {
    let pixel = RecordingPixel::default();
    let engine = IndicatorEngine::new(Box::new(pixel.clone()));

    engine
        .set_effect(IndicatorRequest::animated(EffectKind::Rainbow, COLOUR_BLUE, 30, 255))
        .unwrap();
    engine.set_effect(IndicatorRequest::solid(COLOUR_CYAN, 255)).unwrap();
    pixel.clear();

    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(engine.live_loops(), 1);
    let frames = pixel.frames.lock().unwrap().clone();
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|&c| c == COLOUR_CYAN), "{frames:?}");
}

#[test]
fn many_replacements_never_overlap() {
    let pixel = RecordingPixel::default();
    let engine = IndicatorEngine::new(Box::new(pixel));
    for status in [
        IndicatorStatus::Connecting,
        IndicatorStatus::LinkUp,
        IndicatorStatus::Error,
        IndicatorStatus::Disconnected,
        IndicatorStatus::Connecting,
    ] {
        engine.set_status(status).unwrap();
        assert!(engine.live_loops() <= 1);
    }
    assert_eq!(
        engine.current_effect(),
        Some(IndicatorStatus::Connecting.request())
    );
}

#[test]
fn mono_led_follows_strobe() {
    let pin = MockPin::default();
    let engine = IndicatorEngine::new(Box::new(MonoLed::new(pin.clone())));
    engine.set_status(IndicatorStatus::Error).unwrap();

    // 20 ms frames, lit two frames in ten: both levels appear quickly.
    assert!(eventually(|| {
        let levels = pin.levels.lock().unwrap();
        levels.contains(&true) && levels.contains(&false)
    }));
}

#[test]
fn mono_led_dark_when_disconnected() {
    let pin = MockPin::default();
    let engine = IndicatorEngine::new(Box::new(MonoLed::new(pin.clone())));
    engine.set_status(IndicatorStatus::Disconnected).unwrap();
    assert!(eventually(|| pin.level() == Some(false)));
}

// ── Stalled output ────────────────────────────────────────────

fn stop_deadline() -> Duration {
    STOP_POLL * STOP_POLLS
}

#[test]
fn stalled_write_is_abandoned_within_the_stop_deadline() {
    let pixel = StallingPixel::new(2, Duration::from_millis(1500));
    let engine = IndicatorEngine::new(Box::new(pixel.clone()));
    engine
        .set_effect(IndicatorRequest::animated(EffectKind::Blink, COLOUR_RED, 100, 255))
        .unwrap();
    assert!(eventually(|| pixel.calls.load(Ordering::SeqCst) >= 2));

    let began = Instant::now();
    engine.set_effect(IndicatorRequest::solid(COLOUR_GREEN, 255)).unwrap();
    let took = began.elapsed();
    let fenced = Instant::now();

    // The old loop never acknowledged, so the full deadline ran out.
    assert!(took >= stop_deadline(), "{took:?}");
    assert!(took < stop_deadline() + Duration::from_millis(300), "{took:?}");

    assert!(eventually(|| pixel.last() == Some(COLOUR_GREEN)));
    assert!(eventually(|| engine.live_loops() == 1));
    std::thread::sleep(Duration::from_millis(100));
    let after = pixel.since(fenced);
    assert!(!after.is_empty());
    assert!(after.iter().all(|&c| c == COLOUR_GREEN), "{after:?}");
}

#[test]
fn stop_with_stalled_write_returns_in_bounded_time() {
    let pixel = StallingPixel::new(2, Duration::from_millis(2000));
    let engine = IndicatorEngine::new(Box::new(pixel.clone()));
    engine
        .set_effect(IndicatorRequest::animated(EffectKind::Blink, COLOUR_RED, 100, 255))
        .unwrap();
    assert!(eventually(|| pixel.calls.load(Ordering::SeqCst) >= 2));

    let began = Instant::now();
    let result = engine.stop_effect();
    let took = began.elapsed();

    // Stop deadline plus the bounded wait for the output.
    assert_eq!(result, Err(relaynode::error::IndicatorError::OutputBusy));
    assert!(took < stop_deadline() * 2 + Duration::from_millis(300), "{took:?}");
    assert!(!engine.is_rendering());
}
