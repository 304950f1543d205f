//! Link manager against the mock radio: retry budget, loss recovery and
//! the worker/mailbox path.

use std::sync::atomic::Ordering;
use std::time::Duration;

use relaynode::app::connectivity::{LinkState, SessionState};
use relaynode::app::events::{LinkEvent, SessionEvent, SystemEvent};
use relaynode::app::link::WaitOutcome;

use crate::mock_hw::{Device, Options};

// ── Retry budget ──────────────────────────────────────────────

#[test]
fn budget_exhaustion_stops_automatic_attempts() {
    let dev = Device::with(Options {
        max_retries: 4,
        ..Options::default()
    });
    dev.link.start().unwrap();
    for _ in 0..4 {
        dev.link.handle_event(LinkEvent::AssociationFailed);
    }
    assert_eq!(dev.link.current_state(), LinkState::Failed);
    // One initial attempt plus three reattempts.
    assert_eq!(dev.radio.associations.load(Ordering::SeqCst), 4);

    for event in [
        LinkEvent::AssociationFailed,
        LinkEvent::LinkLost,
        LinkEvent::Started,
    ] {
        dev.link.handle_event(event);
    }
    assert_eq!(dev.link.current_state(), LinkState::Failed);
    assert_eq!(dev.radio.associations.load(Ordering::SeqCst), 4);

    dev.link.start().unwrap();
    assert_eq!(dev.radio.associations.load(Ordering::SeqCst), 5);
    assert_eq!(dev.link.retry_count(), 0);
}

#[test]
fn intermittent_failures_never_exhaust_a_reset_budget() {
    let dev = Device::new();
    dev.link.start().unwrap();
    for _ in 0..10 {
        dev.link.handle_event(LinkEvent::AssociationFailed);
        dev.link.handle_event(LinkEvent::AddressAcquired);
        dev.link.handle_event(LinkEvent::LinkLost);
    }
    assert_eq!(dev.link.current_state(), LinkState::Connecting);
}

// ── Loss ──────────────────────────────────────────────────────

#[test]
fn loss_demotes_session_in_the_same_step() {
    let dev = Device::new();
    dev.online();
    assert_eq!(dev.session.current_state(), SessionState::Connected);

    dev.link.handle_event(LinkEvent::LinkLost);
    let now = dev.cell.snapshot();
    assert_ne!(now.link, LinkState::Connected);
    assert_eq!(now.session, SessionState::Disconnected);

    let events = dev.bus.drain();
    assert_eq!(events[0], SystemEvent::Link(LinkState::Disconnected));
    assert_eq!(events[1], SystemEvent::Session(SessionState::Disconnected));
    assert_eq!(events[2], SystemEvent::Link(LinkState::Connecting));
}

#[test]
fn session_acknowledgement_after_loss_is_dropped() {
    let dev = Device::new();
    dev.link.start().unwrap();
    dev.link.handle_event(LinkEvent::AddressAcquired);
    dev.settle();
    assert_eq!(dev.session.current_state(), SessionState::Connecting);

    dev.link.handle_event(LinkEvent::LinkLost);
    dev.session.handle_event(SessionEvent::Connected);
    assert_eq!(dev.session.current_state(), SessionState::Disconnected);
}

#[test]
fn stop_disassociates() {
    let dev = Device::new();
    dev.online();
    dev.link.stop();
    assert_eq!(dev.link.current_state(), LinkState::Disconnected);
    assert_eq!(dev.session.current_state(), SessionState::Disconnected);
    assert_eq!(dev.radio.disassociations.load(Ordering::SeqCst), 1);
}

// ── Worker ────────────────────────────────────────────────────

#[test]
fn worker_connects_through_the_mailbox() {
    let dev = Device::with(Options {
        autonomous: true,
        ..Options::default()
    });
    dev.link.spawn_worker().unwrap();
    dev.link.start().unwrap();
    assert_eq!(
        dev.link.wait_for_connection(Duration::from_secs(2)),
        WaitOutcome::Connected
    );
    assert!(dev.link.is_connected());
}

#[test]
fn wait_times_out_without_an_outcome() {
    let dev = Device::new();
    dev.link.start().unwrap();
    assert_eq!(
        dev.link.wait_for_connection(Duration::from_millis(20)),
        WaitOutcome::TimedOut
    );
}
