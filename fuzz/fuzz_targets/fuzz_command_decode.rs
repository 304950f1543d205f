//! Fuzz target: inbound broker messages.
//!
//! Splits the input into a topic and a payload, pushes them through the
//! bounded copy and the mailbox hand-off, and decodes the payload.  Nothing
//! may panic, oversize input must be refused rather than truncated, and
//! only the two exact literals may decode.
//!
//! cargo fuzz run fuzz_command_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use relaynode::app::commands::{InboundMessage, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN, RelayCommand};
use relaynode::app::events::SessionEvent;
use relaynode::app::session::{SessionMailbox, forward_message};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let at = usize::from(split).min(rest.len());
    let (raw_topic, payload) = rest.split_at(at);
    let topic = String::from_utf8_lossy(raw_topic);

    let fits = topic.len() <= MAX_TOPIC_LEN && payload.len() <= MAX_PAYLOAD_LEN;
    match InboundMessage::bounded(&topic, payload) {
        Some(msg) => {
            assert!(fits, "oversize message accepted");
            assert_eq!(msg.payload.as_slice(), payload);
        }
        None => assert!(!fits, "fitting message refused"),
    }

    let mailbox = SessionMailbox::new("fuzz");
    assert_eq!(forward_message(&mailbox, &topic, payload), fits);
    if fits {
        let Some(SessionEvent::Message(msg)) = mailbox.try_next() else {
            panic!("forwarded message missing");
        };
        assert_eq!(msg.topic.as_str(), &*topic);
    }

    match RelayCommand::decode(payload) {
        Some(RelayCommand::On) => assert_eq!(payload, b"on"),
        Some(RelayCommand::Off) => assert_eq!(payload, b"off"),
        None => assert!(payload != b"on" && payload != b"off"),
    }
});
