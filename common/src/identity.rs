use std::fmt;

/// SSID prefix advertised by the provisioning access point.
pub const AP_SSID_PREFIX: &str = "AgroFlowSensor";

/// Stable device identity derived from the hardware MAC address: each of
/// the 6 bytes rendered as two uppercase hex digits, in address order.
/// Computed once at boot and used verbatim as the MQTT client ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        use fmt::Write as _;

        let mut id = String::with_capacity(12);
        for byte in mac {
            let _ = write!(&mut id, "{byte:02X}");
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Access-point name for provisioning mode, built from the last 3 MAC
    /// bytes so nearby nodes stay distinguishable.
    pub fn ap_ssid(&self) -> String {
        format!("{AP_SSID_PREFIX}-{}", &self.0[6..])
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_mac_as_uppercase_hex() {
        let identity = DeviceIdentity::from_mac([0xA4, 0x07, 0x03, 0x1E, 0x22, 0x9A]);
        assert_eq!(identity.as_str(), "A407031E229A");
    }

    #[test]
    fn zero_pads_low_bytes() {
        let identity = DeviceIdentity::from_mac([0x00, 0x01, 0x0A, 0x0B, 0x00, 0xFF]);
        assert_eq!(identity.as_str(), "00010A0B00FF");
        assert_eq!(identity.as_str().len(), 12);
    }

    #[test]
    fn ap_ssid_uses_last_three_bytes() {
        let identity = DeviceIdentity::from_mac([0xA4, 0x07, 0x03, 0x1E, 0x22, 0x9A]);
        assert_eq!(identity.ap_ssid(), "AgroFlowSensor-1E229A");
    }
}
