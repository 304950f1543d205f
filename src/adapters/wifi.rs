//! WiFi station-mode adapter.
//!
//! Implements [`LinkDriver`], the hexagonal boundary for the wireless
//! link.  Association outcomes are reported back to the
//! [`LinkManager`](crate::app::link::LinkManager) through its mailbox.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver calls via `esp_idf_svc::wifi`.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! ## Outcome detection
//!
//! Each `associate()` starts a monitor task that polls the driver until
//! the station has an address (`AddressAcquired`), the attempt times out
//! (`AssociationFailed`), or an established association drops
//! (`LinkLost`).  Monitors are tagged with an attempt number; a monitor
//! whose attempt has been superseded exits without reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
#[cfg(target_os = "espidf")]
use std::time::Duration;

use log::info;

use crate::app::events::LinkEvent;
use crate::app::link::LinkMailbox;
use crate::app::ports::LinkDriver;
use crate::error::LinkError;

/// How long a single association attempt may take before it is failed.
#[cfg(target_os = "espidf")]
const ASSOCIATION_TIMEOUT: Duration = Duration::from_secs(15);

#[cfg(target_os = "espidf")]
const MONITOR_POLL: Duration = Duration::from_millis(250);

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate(ssid: &str, password: &str) -> Result<(), LinkError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(LinkError::InvalidCredentials);
    }
    if !password.is_empty() && !(8..=64).contains(&password.len()) {
        return Err(LinkError::InvalidCredentials);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiLink {
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    events: LinkMailbox,
    /// Bumped on every associate/disassociate; stale monitors compare
    /// against it and exit.
    attempt: Arc<AtomicU32>,
    #[cfg(target_os = "espidf")]
    wifi: Arc<std::sync::Mutex<esp_idf_svc::wifi::EspWifi<'static>>>,
}

impl WifiLink {
    #[cfg(target_os = "espidf")]
    pub fn new(
        modem: esp_idf_svc::hal::modem::Modem,
        sysloop: esp_idf_svc::eventloop::EspSystemEventLoop,
        nvs: Option<esp_idf_svc::nvs::EspDefaultNvsPartition>,
        ssid: &str,
        password: &str,
        events: LinkMailbox,
    ) -> Result<Self, LinkError> {
        validate(ssid, password)?;
        let wifi = esp_idf_svc::wifi::EspWifi::new(modem, sysloop, nvs).map_err(|e| {
            log::error!("WiFi(espidf): driver init failed: {}", e);
            LinkError::DriverFailed
        })?;
        Ok(Self {
            ssid: heapless::String::try_from(ssid).map_err(|_| LinkError::InvalidCredentials)?,
            password: heapless::String::try_from(password)
                .map_err(|_| LinkError::InvalidCredentials)?,
            events,
            attempt: Arc::new(AtomicU32::new(0)),
            wifi: Arc::new(std::sync::Mutex::new(wifi)),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(ssid: &str, password: &str, events: LinkMailbox) -> Result<Self, LinkError> {
        validate(ssid, password)?;
        Ok(Self {
            ssid: heapless::String::try_from(ssid).map_err(|_| LinkError::InvalidCredentials)?,
            password: heapless::String::try_from(password)
                .map_err(|_| LinkError::InvalidCredentials)?,
            events,
            attempt: Arc::new(AtomicU32::new(0)),
        })
    }

    /// No passphrase: associate without WPA2.
    fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_associate(&mut self, attempt: u32) -> Result<(), LinkError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let config = Configuration::Client(ClientConfiguration {
            ssid: self
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| LinkError::InvalidCredentials)?,
            password: self
                .password
                .as_str()
                .try_into()
                .map_err(|_| LinkError::InvalidCredentials)?,
            auth_method: if self.is_open() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });

        {
            let mut wifi = self
                .wifi
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let fail = |e: esp_idf_svc::sys::EspError| {
                log::error!("WiFi(espidf): {}", e);
                LinkError::DriverFailed
            };
            wifi.set_configuration(&config).map_err(fail)?;
            if !wifi.is_started().map_err(fail)? {
                wifi.start().map_err(fail)?;
                self.events.post(LinkEvent::Started);
            }
            wifi.connect().map_err(fail)?;
        }

        let wifi = Arc::clone(&self.wifi);
        let current = Arc::clone(&self.attempt);
        let events = self.events.clone();
        crate::drivers::task_pin::spawn_on_core(
            crate::drivers::task_pin::Core::Pro,
            4,
            4,
            "wifi-mon\0",
            move || monitor(&wifi, &current, attempt, &events),
        )
        .map(|_| ())
        .map_err(|e| {
            log::error!("WiFi(espidf): monitor spawn failed: {}", e);
            LinkError::WorkerUnavailable
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_associate(&mut self, attempt: u32) -> Result<(), LinkError> {
        // The simulated access point always accepts.
        info!(
            "WiFi(sim): associated with '{}' ({}, attempt {})",
            self.ssid,
            if self.is_open() { "open" } else { "wpa2" },
            attempt
        );
        if attempt == 1 {
            self.events.post(LinkEvent::Started);
        }
        self.events.post(LinkEvent::AddressAcquired);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_disassociate(&mut self) {
        let mut wifi = self
            .wifi
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = wifi.disconnect() {
            log::debug!("WiFi(espidf): disconnect: {}", e);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disassociate(&mut self) {
        info!("WiFi(sim): disassociated");
    }
}

impl LinkDriver for WifiLink {
    fn associate(&mut self) -> Result<(), LinkError> {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        info!("WiFi: associating with '{}'", self.ssid);
        self.platform_associate(attempt)
    }

    fn disassociate(&mut self) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.platform_disassociate();
    }
}

/// Poll one association attempt to its outcome.
#[cfg(target_os = "espidf")]
fn monitor(
    wifi: &std::sync::Mutex<esp_idf_svc::wifi::EspWifi<'static>>,
    current: &AtomicU32,
    attempt: u32,
    events: &LinkMailbox,
) {
    let started = std::time::Instant::now();
    let mut associated = false;
    loop {
        std::thread::sleep(MONITOR_POLL);
        if current.load(Ordering::SeqCst) != attempt {
            return;
        }
        let up = {
            let wifi = wifi.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            wifi.is_connected().unwrap_or(false) && wifi.sta_netif().is_up().unwrap_or(false)
        };
        match (associated, up) {
            (false, true) => {
                associated = true;
                events.post(LinkEvent::AddressAcquired);
            }
            (false, false) if started.elapsed() >= ASSOCIATION_TIMEOUT => {
                events.post(LinkEvent::AssociationFailed);
                return;
            }
            (true, false) => {
                events.post(LinkEvent::LinkLost);
                return;
            }
            _ => {}
        }
    }
}
