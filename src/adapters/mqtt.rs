//! MQTT broker adapter.
//!
//! Implements [`SessionTransport`] on top of `esp_idf_svc::mqtt::client`.
//! Broker callbacks are read on a receiver task and posted to the
//! [`SessionManager`](crate::app::session::SessionManager) mailbox as
//! [`SessionEvent`]s; inbound messages are bounded on the way in.
//!
//! Every `connect()` builds a fresh client.  Receiver tasks are tagged
//! with the client generation, and events from a superseded client are
//! dropped so a reconnect never sees its predecessor's teardown.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspMqttClient` with last-will and keep-alive.
//! - **all other targets**: a loopback broker that acknowledges at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::info;

use crate::app::ports::{QoS, SessionOptions, SessionTransport};
use crate::app::session::SessionMailbox;
use crate::error::SessionError;

#[cfg(not(target_os = "espidf"))]
use crate::app::events::SessionEvent;

pub struct MqttTransport {
    events: SessionMailbox,
    generation: Arc<AtomicU32>,
    #[cfg(target_os = "espidf")]
    client: Option<esp_idf_svc::mqtt::client::EspMqttClient<'static>>,
    #[cfg(not(target_os = "espidf"))]
    connected: bool,
}

impl MqttTransport {
    pub fn new(events: SessionMailbox) -> Self {
        Self {
            events,
            generation: Arc::new(AtomicU32::new(0)),
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(not(target_os = "espidf"))]
            connected: false,
        }
    }
}

#[cfg(target_os = "espidf")]
fn qos(level: QoS) -> embedded_svc::mqtt::client::QoS {
    match level {
        QoS::AtMostOnce => embedded_svc::mqtt::client::QoS::AtMostOnce,
        QoS::AtLeastOnce => embedded_svc::mqtt::client::QoS::AtLeastOnce,
    }
}

// ── ESP-IDF client ────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl SessionTransport for MqttTransport {
    fn connect(&mut self, options: &SessionOptions) -> Result<(), SessionError> {
        use esp_idf_svc::mqtt::client::{EspMqttClient, LwtConfiguration, MqttClientConfiguration};

        self.disconnect();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst).wrapping_add(1);

        let conf = MqttClientConfiguration {
            client_id: Some(options.client_id.as_str()),
            username: options.username.as_deref(),
            password: options.password.as_deref(),
            keep_alive_interval: Some(std::time::Duration::from_secs(u64::from(
                options.keep_alive_secs,
            ))),
            lwt: Some(LwtConfiguration {
                topic: options.last_will.topic.as_str(),
                payload: options.last_will.payload.as_bytes(),
                qos: qos(options.last_will.qos),
                retain: options.last_will.retain,
            }),
            ..Default::default()
        };

        let (client, connection) =
            EspMqttClient::new(options.broker_uri.as_str(), &conf).map_err(|e| {
                log::error!("MQTT: client creation failed: {}", e);
                SessionError::TransportFailed
            })?;

        let current = Arc::clone(&self.generation);
        let events = self.events.clone();
        crate::drivers::task_pin::spawn_on_core(
            crate::drivers::task_pin::Core::Pro,
            5,
            6,
            "mqtt-rx\0",
            move || receive(connection, &current, generation, &events),
        )
        .map_err(|e| {
            log::error!("MQTT: receiver spawn failed: {}", e);
            SessionError::WorkerUnavailable
        })?;

        self.client = Some(client);
        info!("MQTT: connecting to {}", options.broker_uri);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        // Dropping the client stops it and ends the receiver's connection.
        if self.client.take().is_some() {
            info!("MQTT: client released");
        }
    }

    fn subscribe(&mut self, topic: &str, level: QoS) -> Result<(), SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .subscribe(topic, qos(level))
            .map(|_| ())
            .map_err(|_| SessionError::TransportFailed)
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        level: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .publish(topic, qos(level), retain, payload)
            .map(|_| ())
            .map_err(|_| SessionError::TransportFailed)
    }
}

/// Receiver task body: runs until the client is dropped.
#[cfg(target_os = "espidf")]
fn receive(
    mut connection: esp_idf_svc::mqtt::client::EspMqttConnection,
    current: &AtomicU32,
    generation: u32,
    events: &SessionMailbox,
) {
    use crate::app::events::SessionEvent;
    use embedded_svc::mqtt::client::{Details, EventPayload};

    while let Ok(event) = connection.next() {
        if current.load(Ordering::SeqCst) != generation {
            continue;
        }
        match event.payload() {
            EventPayload::Connected(_) => {
                events.post(SessionEvent::Connected);
            }
            EventPayload::Disconnected => {
                events.post(SessionEvent::Disconnected);
            }
            EventPayload::Error(e) => {
                log::warn!("MQTT: {:?}", e);
                events.post(SessionEvent::Error);
            }
            EventPayload::Received {
                topic: Some(topic),
                data,
                details,
                ..
            } => {
                // Only full payloads; commands are a few bytes.
                if matches!(details, Details::Complete) {
                    crate::app::session::forward_message(events, topic, data);
                }
            }
            _ => {}
        }
    }
    log::debug!("MQTT: receiver for client {} exiting", generation);
}

// ── Loopback (host) ───────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl SessionTransport for MqttTransport {
    fn connect(&mut self, options: &SessionOptions) -> Result<(), SessionError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        info!(
            "MQTT(sim): {} connected to {} (will on {})",
            options.client_id, options.broker_uri, options.last_will.topic
        );
        self.events.post(SessionEvent::Connected);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }

    fn subscribe(&mut self, topic: &str, level: QoS) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        info!("MQTT(sim): subscribed {} {:?}", topic, level);
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        level: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        info!(
            "MQTT(sim): {} <- {:?} ({:?}, retain={})",
            topic,
            core::str::from_utf8(payload).unwrap_or("<binary>"),
            level,
            retain
        );
        Ok(())
    }
}
