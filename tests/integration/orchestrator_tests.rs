//! End-to-end flows through the orchestrator: the boot scenario, the
//! heartbeat, and the threaded runtime.

use std::sync::Arc;
use std::time::Duration;

use relaynode::app::connectivity::{LinkState, SessionState};
use relaynode::app::events::{LinkEvent, SessionEvent, SystemEvent};
use relaynode::app::indicator::effects::{COLOUR_GREEN, IndicatorStatus};
use relaynode::app::ports::QoS;
use relaynode::app::relay::RelayState;

use crate::mock_hw::{COMMAND_TOPIC, Device, Options, STATE_TOPIC, STATUS_TOPIC, eventually};

// ── Boot scenario ─────────────────────────────────────────────

#[test]
fn boot_command_and_link_drop() {
    let dev = Device::new();

    dev.link.start().unwrap();
    dev.settle();
    assert!(dev.showing(IndicatorStatus::Connecting));

    dev.link.handle_event(LinkEvent::AddressAcquired);
    dev.settle();
    assert_eq!(dev.session.current_state(), SessionState::Connecting);
    assert!(dev.showing(IndicatorStatus::LinkUp));

    dev.session.handle_event(SessionEvent::Connected);
    dev.settle();
    assert!(dev.showing(IndicatorStatus::SessionUp(Some(RelayState::Off))));

    dev.command(b"on");
    assert_eq!(dev.relay.get_state(), RelayState::On);
    assert!(dev.showing(IndicatorStatus::SessionUp(Some(RelayState::On))));
    assert!(eventually(|| dev.pixel.last() == Some(COLOUR_GREEN)));
    assert_eq!(
        dev.broker.publishes_on(STATE_TOPIC),
        vec![("on".into(), false)]
    );

    // Link drop: handle the first transition on its own.
    dev.link.handle_event(LinkEvent::LinkLost);
    let first = dev.bus.try_next().unwrap();
    assert_eq!(first, SystemEvent::Link(LinkState::Disconnected));
    dev.orchestrator.handle_event(first);

    assert_eq!(dev.session.current_state(), SessionState::Disconnected);
    assert!(dev.showing(IndicatorStatus::Disconnected));
    assert!(eventually(|| dev.pixel.last() == Some((0, 0, 0))));
    assert_eq!(dev.relay.get_state(), RelayState::On);
    assert_eq!(dev.pin.level(), Some(true));
}

#[test]
fn link_failure_shows_error() {
    let dev = Device::with(Options {
        max_retries: 1,
        ..Options::default()
    });
    dev.link.start().unwrap();
    dev.link.handle_event(LinkEvent::AssociationFailed);
    dev.settle();
    assert_eq!(dev.link.current_state(), LinkState::Failed);
    assert!(dev.showing(IndicatorStatus::Error));
}

#[test]
fn broker_drop_with_spent_budget_shows_error() {
    let dev = Device::with(Options {
        max_retries: 1,
        ..Options::default()
    });
    dev.online();
    dev.session.handle_event(SessionEvent::Disconnected);
    dev.settle();
    // Budget of one: the reconnect is not attempted.
    assert_eq!(dev.session.current_state(), SessionState::Error);
    assert!(dev.showing(IndicatorStatus::Error));
}

// ── Heartbeat ─────────────────────────────────────────────────

#[test]
fn heartbeat_republishes_status_and_retained_relay_state() {
    let dev = Device::new();
    dev.online();
    dev.command(b"on");
    dev.broker.clear();

    dev.orchestrator.heartbeat();
    assert_eq!(
        dev.broker.publishes(),
        vec![
            (STATUS_TOPIC.into(), "online".into(), QoS::AtLeastOnce, true),
            (STATE_TOPIC.into(), "on".into(), QoS::AtLeastOnce, true),
        ]
    );
}

#[test]
fn heartbeat_repairs_the_indicator() {
    let dev = Device::new();
    dev.online();
    dev.indicator.stop_effect().unwrap();
    assert!(!dev.indicator.is_rendering());

    dev.orchestrator.heartbeat();
    assert!(dev.showing(IndicatorStatus::SessionUp(Some(RelayState::Off))));
}

#[test]
fn heartbeat_offline_publishes_nothing() {
    let dev = Device::new();
    dev.link.start().unwrap();
    dev.orchestrator.heartbeat();
    assert!(dev.broker.publishes().is_empty());
    assert!(dev.showing(IndicatorStatus::Connecting));
}

// ── Threaded runtime ──────────────────────────────────────────

#[test]
fn runtime_reaches_online_and_serves_commands() {
    let dev = Device::with(Options {
        autonomous: true,
        ..Options::default()
    });
    dev.link.spawn_worker().unwrap();
    dev.session.spawn_worker().unwrap();
    Arc::clone(&dev.orchestrator)
        .spawn(Duration::from_millis(50))
        .unwrap();

    dev.link.start().unwrap();
    assert!(eventually(
        || dev.session.current_state() == SessionState::Connected
    ));

    assert!(relaynode::app::session::forward_message(
        &dev.session_mailbox,
        COMMAND_TOPIC,
        b"on"
    ));
    assert!(eventually(|| dev.relay.get_state() == RelayState::On));
    assert!(eventually(|| dev.pixel.last() == Some(COLOUR_GREEN)));
    assert!(eventually(|| dev
        .broker
        .publishes_on(STATE_TOPIC)
        .contains(&("on".into(), true))));
}
