//! RelayNode Firmware: Main Entry Point
//!
//! Hexagonal architecture with event-driven execution.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  WifiLink       MqttTransport       RelayPin   RmtPixel/MonoLed│
//! │  (LinkDriver)   (SessionTransport)  (GPIO)     (PixelOutput)   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  LinkManager · SessionManager · RelayController        │    │
//! │  │  IndicatorEngine                                       │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Orchestrator (event dispatch + heartbeat)                     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::prelude::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info, warn};

use relaynode::adapters::device_id;
use relaynode::adapters::mqtt::MqttTransport;
use relaynode::adapters::wifi::WifiLink;
use relaynode::app::connectivity::ConnectivityCell;
use relaynode::app::events::EventBus;
use relaynode::app::identity::DeviceIdentity;
use relaynode::app::indicator::IndicatorEngine;
use relaynode::app::indicator::effects::{COLOUR_BLUE, IndicatorRequest};
use relaynode::app::link::{LinkMailbox, LinkManager, LinkPolicy, WaitOutcome};
use relaynode::app::orchestrator::Orchestrator;
use relaynode::app::ports::PixelOutput;
use relaynode::app::relay::RelayController;
use relaynode::app::session::{Credentials, SessionMailbox, SessionManager, SessionPolicy};
use relaynode::config::{DeviceConfig, IndicatorKind};
use relaynode::drivers::pixel::RmtPixel;
use relaynode::drivers::relay_pin::relay_pin;
use relaynode::drivers::status_led::mono_led;
use relaynode::error::Error as FirmwareError;

const BOOT_SPLASH: Duration = Duration::from_millis(500);
const FIRST_LINK_WAIT: Duration = Duration::from_secs(30);
const MONITOR_PERIOD: Duration = Duration::from_secs(10);

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  RelayNode v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration + identity ───────────────────────────
    let config = DeviceConfig::from_build_env()
        .map_err(FirmwareError::from)
        .context("invalid build configuration")?;
    let identity = if config.device_id.is_empty() {
        let id = device_id::device_id(&device_id::read_mac());
        info!("No device id configured, using {}", id);
        DeviceIdentity::new(&id)
    } else {
        DeviceIdentity::new(&config.device_id)
    }
    .map_err(FirmwareError::from)
    .context("invalid device id")?;
    info!("Command topic: {}", identity.command_topic());

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = match EspDefaultNvsPartition::take() {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("NVS unavailable ({}), WiFi calibration will not persist", e);
            None
        }
    };

    let bus = EventBus::system();
    let cell = Arc::new(ConnectivityCell::new());

    // ── 3. Relay (critical) ───────────────────────────────────
    let pin = relay_pin(config.relay_gpio)
        .map_err(FirmwareError::from)
        .context("relay GPIO")?;
    let relay = Arc::new(
        RelayController::new(Box::new(pin), config.relay_active_low).with_bus(bus.clone()),
    );
    if let Err(e) = relay.initialize() {
        error!("Relay: could not force Off at boot: {}", e);
    }

    // ── 4. Indicator (optional) ───────────────────────────────
    let pixel: Result<Box<dyn PixelOutput>, _> = match config.indicator {
        IndicatorKind::RgbPixel => RmtPixel::new(peripherals.rmt.channel0, config.indicator_gpio)
            .map(|p| Box::new(p) as Box<dyn PixelOutput>),
        IndicatorKind::MonoLed => {
            mono_led(config.indicator_gpio).map(|p| Box::new(p) as Box<dyn PixelOutput>)
        }
    };
    let indicator = match pixel {
        Ok(pixel) => {
            let engine = Arc::new(IndicatorEngine::new(pixel));
            engine.set_brightness(config.indicator_brightness);
            // Boot splash: dim blue, then dark until the first transition.
            if engine.set_effect(IndicatorRequest::solid(COLOUR_BLUE, 20)).is_ok() {
                std::thread::sleep(BOOT_SPLASH);
            }
            if let Err(e) = engine.stop_effect() {
                warn!("Indicator: {}", e);
            }
            Some(engine)
        }
        Err(e) => {
            warn!("Indicator unavailable ({}), continuing without status output", e);
            None
        }
    };

    // ── 5. Link ───────────────────────────────────────────────
    let link_mailbox = LinkMailbox::new("link");
    let wifi = WifiLink::new(
        peripherals.modem,
        sysloop,
        nvs,
        &config.wifi_ssid,
        &config.wifi_password,
        link_mailbox.clone(),
    )
    .map_err(FirmwareError::from)
    .context("WiFi driver")?;
    let link = Arc::new(LinkManager::new(
        Box::new(wifi),
        LinkPolicy::from_config(&config),
        Arc::clone(&cell),
        bus.clone(),
        link_mailbox,
    ));
    link.spawn_worker()?;

    // ── 6. Session ────────────────────────────────────────────
    let session_mailbox = SessionMailbox::new("session");
    let session = Arc::new(SessionManager::new(
        Box::new(MqttTransport::new(session_mailbox.clone())),
        SessionPolicy::from_config(&config),
        Arc::clone(&relay),
        Arc::clone(&cell),
        bus.clone(),
        session_mailbox,
    ));
    session.initialize(
        identity,
        config.broker_uri.clone(),
        Credentials::from_config(&config),
    );
    session.spawn_worker()?;

    // ── 7. Orchestrator ───────────────────────────────────────
    Arc::new(Orchestrator::new(
        Arc::clone(&link),
        Arc::clone(&session),
        Arc::clone(&relay),
        indicator,
        Arc::clone(&cell),
        bus,
    ))
    .spawn(Duration::from_secs(u64::from(config.heartbeat_interval_secs)))?;

    // ── 8. Bring the link up ──────────────────────────────────
    if let Err(e) = link.start() {
        error!("Link start failed: {}", e);
    }
    match link.wait_for_connection(FIRST_LINK_WAIT) {
        WaitOutcome::Connected => info!("Link up"),
        WaitOutcome::TimedOut => warn!("Link not up yet, retrying in background"),
        WaitOutcome::Failed => warn!("Link failed, waiting for restart"),
    }

    // ── 9. Health monitor ─────────────────────────────────────
    let mut ticks: u32 = 0;
    loop {
        if ticks % 10 == 0 {
            let snapshot = cell.snapshot();
            info!(
                "Heap free {} B (min {} B), link {:?}, session {:?}, relay {}",
                unsafe { esp_idf_svc::sys::esp_get_free_heap_size() },
                unsafe { esp_idf_svc::sys::esp_get_minimum_free_heap_size() },
                snapshot.link,
                snapshot.session,
                relay.get_state().as_payload()
            );
        }
        if !unsafe { esp_idf_svc::sys::heap_caps_check_integrity_all(true) } {
            error!("Heap corruption detected");
        }
        ticks = ticks.wrapping_add(1);
        std::thread::sleep(MONITOR_PERIOD);
    }
}
