//! Device id fallback derived from the factory MAC address.
//!
//! Used when the configuration leaves `device_id` empty.  The result,
//! `relay-xxyyzz` (last three MAC bytes, lowercase hex), is stable across
//! reboots and safe to use as a topic namespace.

use core::fmt::Write;

use crate::config::MAX_DEVICE_ID_LEN;

pub type DeviceIdString = heapless::String<MAX_DEVICE_ID_LEN>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    let ret = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if ret != esp_idf_svc::sys::ESP_OK {
        log::warn!("eFuse MAC unavailable ({}), id will not be unique", ret);
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0x24, 0x6F, 0x28, 0x1A, 0x2B, 0x3C]
}

pub fn device_id(mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    // 12 bytes always fit
    let _ = write!(id, "relay-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    id
}
