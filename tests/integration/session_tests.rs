//! Session manager against the mock broker: connect options, the command
//! path, and the retry discipline.

use std::sync::atomic::Ordering;

use relaynode::app::connectivity::SessionState;
use relaynode::app::events::{LinkEvent, SessionEvent};
use relaynode::app::ports::QoS;
use relaynode::app::relay::RelayState;
use relaynode::error::SessionError;

use crate::mock_hw::{COMMAND_TOPIC, Device, Options, STATE_TOPIC, STATUS_TOPIC, Wire};

fn link_up(dev: &Device) {
    dev.link.start().unwrap();
    dev.link.handle_event(LinkEvent::AddressAcquired);
    dev.settle();
}

// ── Connect ───────────────────────────────────────────────────

#[test]
fn connect_registers_offline_will() {
    let dev = Device::with(Options {
        credentials: true,
        ..Options::default()
    });
    link_up(&dev);

    let calls = dev.broker.take();
    let Some(Wire::Connect(opts)) = calls.first() else {
        panic!("expected a connect, got {calls:?}");
    };
    assert_eq!(opts.client_id.as_str(), "porch");
    assert_eq!(opts.broker_uri.as_str(), "mqtt://broker.local:1883");
    assert_eq!(opts.keep_alive_secs, 45);
    assert_eq!(opts.username.as_deref(), Some("porch-user"));
    assert_eq!(opts.password.as_deref(), Some("hunter22"));
    assert_eq!(opts.last_will.topic.as_str(), STATUS_TOPIC);
    assert_eq!(opts.last_will.payload, "offline");
    assert_eq!(opts.last_will.qos, QoS::AtLeastOnce);
    assert!(opts.last_will.retain);
}

#[test]
fn acknowledgement_subscribes_and_announces() {
    let dev = Device::new();
    link_up(&dev);
    dev.broker.clear();
    dev.session.handle_event(SessionEvent::Connected);

    assert_eq!(
        dev.broker.take(),
        vec![
            Wire::Subscribe(COMMAND_TOPIC.into(), QoS::AtMostOnce),
            Wire::Publish {
                topic: STATUS_TOPIC.into(),
                payload: "online".into(),
                qos: QoS::AtLeastOnce,
                retain: true,
            },
        ]
    );
}

#[test]
fn start_refused_while_link_down() {
    let dev = Device::new();
    assert_eq!(dev.session.start(), Err(SessionError::LinkDown));
    assert!(dev.broker.take().is_empty());
}

#[test]
fn refused_connect_reports_error() {
    let dev = Device::new();
    dev.broker.refuse_connect.store(true, Ordering::SeqCst);
    link_up(&dev);
    assert_eq!(dev.session.current_state(), SessionState::Error);

    dev.broker.refuse_connect.store(false, Ordering::SeqCst);
    let event = dev.session_mailbox.try_next().unwrap();
    dev.session.handle_event(event);
    assert_eq!(dev.session.current_state(), SessionState::Connecting);

    dev.session.handle_event(SessionEvent::Connected);
    assert_eq!(dev.session.current_state(), SessionState::Connected);
}

#[test]
fn persistent_refusal_exhausts_the_budget() {
    let dev = Device::new();
    dev.broker.refuse_connect.store(true, Ordering::SeqCst);
    link_up(&dev);

    let event = dev.session_mailbox.try_next().unwrap();
    dev.session.handle_event(event);
    let connects = dev
        .broker
        .take()
        .iter()
        .filter(|c| matches!(c, Wire::Connect(_)))
        .count();
    assert_eq!(connects, 3);
    assert_eq!(dev.session.current_state(), SessionState::Error);
    assert!(dev.session_mailbox.try_next().is_none());
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn on_command_switches_relay_and_confirms() {
    let dev = Device::new();
    dev.online();
    dev.command(b"on");

    assert_eq!(dev.relay.get_state(), RelayState::On);
    assert_eq!(dev.pin.level(), Some(true));
    assert_eq!(
        dev.broker.publishes(),
        vec![(STATE_TOPIC.into(), "on".into(), QoS::AtLeastOnce, false)]
    );
}

#[test]
fn repeated_on_is_a_no_op() {
    let dev = Device::new();
    dev.online();
    dev.command(b"on");
    dev.broker.clear();
    let writes = dev.pin.writes();

    dev.command(b"on");
    assert!(dev.broker.publishes().is_empty());
    assert_eq!(dev.pin.writes(), writes);
}

#[test]
fn off_then_on_publishes_both_in_order() {
    let dev = Device::new();
    dev.online();
    dev.command(b"on");
    dev.broker.clear();

    dev.command(b"off");
    dev.command(b"on");
    assert_eq!(dev.relay.get_state(), RelayState::On);
    assert_eq!(
        dev.broker.publishes_on(STATE_TOPIC),
        vec![("off".into(), false), ("on".into(), false)]
    );
}

#[test]
fn malformed_payloads_change_nothing() {
    let dev = Device::new();
    dev.online();
    for payload in [&b"ON"[..], b"On", b" on", b"on\r\n", b"", b"toggle"] {
        dev.command(payload);
    }
    assert_eq!(dev.relay.get_state(), RelayState::Off);
    assert!(dev.broker.publishes().is_empty());
}

#[test]
fn oversized_inbound_messages_are_dropped_at_the_boundary() {
    let dev = Device::new();
    dev.online();
    let long_topic = format!("{COMMAND_TOPIC}/{}", "x".repeat(64));
    assert!(!relaynode::app::session::forward_message(
        &dev.session_mailbox,
        &long_topic,
        b"on"
    ));
    assert!(!relaynode::app::session::forward_message(
        &dev.session_mailbox,
        COMMAND_TOPIC,
        &[b'o'; 17]
    ));
    assert!(dev.session_mailbox.is_empty());
}

#[test]
fn relay_fault_leaves_state_and_publishes_nothing() {
    let dev = Device::new();
    dev.online();
    dev.pin.faulty.store(true, Ordering::SeqCst);
    dev.command(b"on");
    assert_eq!(dev.relay.get_state(), RelayState::Off);
    assert!(dev.broker.publishes().is_empty());
}

// ── Retry ─────────────────────────────────────────────────────

#[test]
fn transport_errors_exhaust_into_error() {
    let dev = Device::with(Options {
        max_retries: 2,
        ..Options::default()
    });
    dev.online();

    dev.session.handle_event(SessionEvent::Error);
    assert_eq!(dev.session.current_state(), SessionState::Connecting);
    dev.session.handle_event(SessionEvent::Error);
    assert_eq!(dev.session.current_state(), SessionState::Error);

    // Only an explicit start leaves Error.
    dev.broker.clear();
    dev.session.start().unwrap();
    assert_eq!(dev.session.current_state(), SessionState::Connecting);
    assert!(matches!(dev.broker.take().first(), Some(Wire::Connect(_))));
}

#[test]
fn publish_requires_connected_session() {
    let dev = Device::new();
    link_up(&dev);
    assert_eq!(
        dev.session.publish_status(),
        Err(SessionError::NotConnected)
    );
    dev.session.handle_event(SessionEvent::Connected);
    assert!(dev.session.publish_status().is_ok());
}
