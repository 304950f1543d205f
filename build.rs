fn main() {
    println!("cargo:rerun-if-env-changed=RELAYNODE_WIFI_SSID");
    println!("cargo:rerun-if-env-changed=RELAYNODE_WIFI_PASSWORD");
    println!("cargo:rerun-if-env-changed=RELAYNODE_BROKER_URI");
    println!("cargo:rerun-if-env-changed=RELAYNODE_DEVICE_ID");

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
