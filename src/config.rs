//! Device configuration parameters
//!
//! All tunable parameters for the RelayNode device. Values come from
//! compile-time environment overrides or a JSON provisioning document,
//! and are validated before any subsystem is constructed.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Highest GPIO pad number across the supported ESP32 family.
pub const MAX_GPIO: u8 = 48;

/// Longest device identifier accepted as a topic namespace.
pub const MAX_DEVICE_ID_LEN: usize = 32;

/// Physical indicator fitted to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    /// Single WS2812-style addressable pixel on an RMT channel.
    RgbPixel,
    /// Plain two-state LED on a GPIO.
    MonoLed,
}

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    // --- Wireless link ---
    pub wifi_ssid: heapless::String<32>,
    /// Empty for open networks.
    pub wifi_password: heapless::String<64>,
    /// Consecutive association failures before the link reports Failed
    pub link_max_retries: u8,
    /// Fixed delay between association attempts (milliseconds)
    pub link_backoff_ms: u32,

    // --- Messaging session ---
    /// Broker address, `mqtt://host:port` or `mqtts://host:port`
    pub broker_uri: heapless::String<128>,
    pub broker_username: Option<heapless::String<64>>,
    pub broker_password: Option<heapless::String<64>>,
    /// Session reconnect attempts after a transport error
    pub session_max_retries: u8,
    /// Delay between session reconnect attempts (milliseconds)
    pub session_backoff_ms: u32,
    /// Keep-alive interval negotiated with the broker (seconds)
    pub keep_alive_secs: u16,

    // --- Identity ---
    /// Topic namespace. Empty means "derive from the factory MAC".
    pub device_id: heapless::String<MAX_DEVICE_ID_LEN>,

    // --- Hardware ---
    pub relay_gpio: u8,
    /// Relay modules that energise on a low level.
    pub relay_active_low: bool,
    pub indicator: IndicatorKind,
    pub indicator_gpio: u8,
    /// Global indicator brightness applied on top of every effect
    pub indicator_brightness: u8,

    // --- Timing ---
    /// Heartbeat / reconciliation interval (seconds)
    pub heartbeat_interval_secs: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: heapless::String::new(),
            wifi_password: heapless::String::new(),
            link_max_retries: 5,
            link_backoff_ms: 1000,

            broker_uri: heapless::String::new(),
            broker_username: None,
            broker_password: None,
            session_max_retries: 5,
            session_backoff_ms: 2000,
            keep_alive_secs: 60,

            device_id: heapless::String::new(),

            relay_gpio: 2,
            relay_active_low: false,
            indicator: IndicatorKind::RgbPixel,
            indicator_gpio: 8,
            indicator_brightness: 255,

            heartbeat_interval_secs: 30,
        }
    }
}

impl DeviceConfig {
    /// Parse a JSON provisioning document. Missing fields keep their
    /// defaults; the result is validated before it is returned.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(doc).map_err(|_| ConfigError::ParseFailed)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `RELAYNODE_*` variables captured at build time.
    pub fn from_build_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ssid) = option_env!("RELAYNODE_WIFI_SSID") {
            config.wifi_ssid = bounded(ssid, "wifi_ssid")?;
        }
        if let Some(password) = option_env!("RELAYNODE_WIFI_PASSWORD") {
            config.wifi_password = bounded(password, "wifi_password")?;
        }
        if let Some(uri) = option_env!("RELAYNODE_BROKER_URI") {
            config.broker_uri = bounded(uri, "broker_uri")?;
        }
        if let Some(user) = option_env!("RELAYNODE_BROKER_USERNAME").filter(|u| !u.is_empty()) {
            config.broker_username = Some(bounded(user, "broker_username")?);
        }
        if let Some(pass) = option_env!("RELAYNODE_BROKER_PASSWORD").filter(|p| !p.is_empty()) {
            config.broker_password = Some(bounded(pass, "broker_password")?);
        }
        if let Some(id) = option_env!("RELAYNODE_DEVICE_ID") {
            config.device_id = bounded(id, "device_id")?;
        }
        if let Some(gpio) = option_env!("RELAYNODE_RELAY_GPIO") {
            config.relay_gpio = gpio
                .parse()
                .map_err(|_| ConfigError::ValidationFailed("relay_gpio"))?;
        }
        if let Some(gpio) = option_env!("RELAYNODE_LED_GPIO") {
            config.indicator_gpio = gpio
                .parse()
                .map_err(|_| ConfigError::ValidationFailed("indicator_gpio"))?;
        }
        if option_env!("RELAYNODE_MONO_LED").is_some() {
            config.indicator = IndicatorKind::MonoLed;
        }
        if option_env!("RELAYNODE_RELAY_ACTIVE_LOW").is_some() {
            config.relay_active_low = true;
        }
        if let Some(retries) = option_env!("RELAYNODE_MAX_RETRY") {
            config.link_max_retries = retries
                .parse()
                .map_err(|_| ConfigError::ValidationFailed("link_max_retries"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values instead of clamping them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ssid = self.wifi_ssid.as_str();
        if ssid.is_empty() || !ssid.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
            return Err(ConfigError::ValidationFailed("wifi_ssid"));
        }
        let pass_len = self.wifi_password.len();
        if pass_len != 0 && pass_len < 8 {
            return Err(ConfigError::ValidationFailed("wifi_password"));
        }
        let uri = self.broker_uri.as_str();
        let host = uri
            .strip_prefix("mqtt://")
            .or_else(|| uri.strip_prefix("mqtts://"))
            .ok_or(ConfigError::ValidationFailed("broker_uri"))?;
        if host.is_empty() {
            return Err(ConfigError::ValidationFailed("broker_uri"));
        }
        if self.broker_password.is_some() && self.broker_username.is_none() {
            return Err(ConfigError::ValidationFailed("broker_username"));
        }
        if self
            .device_id
            .bytes()
            .any(|b| matches!(b, b'/' | b'+' | b'#') || !b.is_ascii_graphic())
        {
            return Err(ConfigError::ValidationFailed("device_id"));
        }
        if self.relay_gpio > MAX_GPIO {
            return Err(ConfigError::ValidationFailed("relay_gpio"));
        }
        if self.indicator_gpio > MAX_GPIO || self.indicator_gpio == self.relay_gpio {
            return Err(ConfigError::ValidationFailed("indicator_gpio"));
        }
        if self.link_max_retries == 0 {
            return Err(ConfigError::ValidationFailed("link_max_retries"));
        }
        if self.session_max_retries == 0 {
            return Err(ConfigError::ValidationFailed("session_max_retries"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed("heartbeat_interval_secs"));
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::ValidationFailed("keep_alive_secs"));
        }
        Ok(())
    }
}

fn bounded<const N: usize>(
    value: &str,
    field: &'static str,
) -> Result<heapless::String<N>, ConfigError> {
    heapless::String::try_from(value).map_err(|_| ConfigError::ValidationFailed(field))
}
