//! Instrument descriptor records.
//!
//! A descriptor is the minimal record the persistence collaborator keeps per
//! instrument: how to reach it and which driver to build for it.

use crate::identity::InstrumentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical interface an instrument is attached through.
///
/// Serialized as the bare upper-case tag (`"TCPIP"`, `"GPIB"`, ...). Tags that
/// are not in the fixed set are kept verbatim as [`InterfaceTag::Vendor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InterfaceTag {
    /// USB (USBTMC, or a USB-serial adapter when the address carries an ASRL token)
    Usb,
    /// GPIB / IEEE-488
    Gpib,
    /// LAN (VXI-11 / HiSLIP)
    Tcpip,
    /// RS-232
    Serial,
    /// VISA serial resource
    Asrl,
    /// Windows COM port
    Com,
    /// Vendor-specific interface
    Vendor(String),
}

impl InterfaceTag {
    /// Tag as it appears in resource strings.
    pub fn as_str(&self) -> &str {
        match self {
            InterfaceTag::Usb => "USB",
            InterfaceTag::Gpib => "GPIB",
            InterfaceTag::Tcpip => "TCPIP",
            InterfaceTag::Serial => "SERIAL",
            InterfaceTag::Asrl => "ASRL",
            InterfaceTag::Com => "COM",
            InterfaceTag::Vendor(tag) => tag,
        }
    }
}

impl From<String> for InterfaceTag {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "USB" => InterfaceTag::Usb,
            "GPIB" => InterfaceTag::Gpib,
            "TCPIP" => InterfaceTag::Tcpip,
            "SERIAL" => InterfaceTag::Serial,
            "ASRL" => InterfaceTag::Asrl,
            "COM" => InterfaceTag::Com,
            _ => InterfaceTag::Vendor(value),
        }
    }
}

impl From<&str> for InterfaceTag {
    fn from(value: &str) -> Self {
        InterfaceTag::from(value.to_string())
    }
}

impl From<InterfaceTag> for String {
    fn from(value: InterfaceTag) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for InterfaceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a live connection talks to its instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Addressed through a resource-manager resource string
    Visa,
    /// Driver owns the link itself (no resource matching)
    Generic,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Visa => write!(f, "visa"),
            ConnectionKind::Generic => write!(f, "generic"),
        }
    }
}

/// Which driver implementation to construct for an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverSource {
    /// The catalogue's generic driver
    Builtin,
    /// A named custom driver registered in the catalogue
    Custom(String),
}

fn default_visa() -> bool {
    true
}

/// Persisted description of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentDescriptor {
    /// Unique instrument identity
    pub identity: InstrumentId,
    /// Interface tag
    pub interface: InterfaceTag,
    /// Address token (GPIB address, IP, USB serial, port name, ...)
    pub address: String,
    /// Baud rate for serial links
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// Custom driver reference, resolved through the driver catalogue
    #[serde(default)]
    pub driver: Option<String>,
    /// Whether the instrument is reached through resource matching
    #[serde(default = "default_visa")]
    pub visa: bool,
}

impl InstrumentDescriptor {
    /// VISA-like descriptor using the generic driver.
    pub fn new(
        identity: impl Into<String>,
        interface: impl Into<InterfaceTag>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            interface: interface.into(),
            address: address.into(),
            baud_rate: None,
            driver: None,
            visa: true,
        }
    }

    /// Set the serial baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// Use a custom driver from the catalogue.
    pub fn with_custom_driver(mut self, reference: impl Into<String>) -> Self {
        self.driver = Some(reference.into());
        self
    }

    /// Mark as a non-VISA instrument.
    pub fn non_visa(mut self) -> Self {
        self.visa = false;
        self
    }

    /// Connection kind implied by the VISA flag.
    pub fn connection_kind(&self) -> ConnectionKind {
        if self.visa {
            ConnectionKind::Visa
        } else {
            ConnectionKind::Generic
        }
    }

    /// Driver implementation to construct. Empty references count as absent.
    pub fn driver_source(&self) -> DriverSource {
        match self.driver.as_deref().map(str::trim) {
            Some(reference) if !reference.is_empty() => DriverSource::Custom(reference.to_string()),
            _ => DriverSource::Builtin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_tag_parsing() {
        assert_eq!(InterfaceTag::from("tcpip"), InterfaceTag::Tcpip);
        assert_eq!(InterfaceTag::from("GPIB"), InterfaceTag::Gpib);
        assert_eq!(
            InterfaceTag::from("PXI"),
            InterfaceTag::Vendor("PXI".to_string())
        );
        assert_eq!(InterfaceTag::Vendor("PXI".into()).as_str(), "PXI");
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let descriptor: InstrumentDescriptor = serde_json::from_str(
            r#"{"identity": "dmm", "interface": "GPIB", "address": "22"}"#,
        )
        .unwrap();
        assert_eq!(descriptor.interface, InterfaceTag::Gpib);
        assert!(descriptor.visa);
        assert_eq!(descriptor.baud_rate, None);
        assert_eq!(descriptor.driver_source(), DriverSource::Builtin);
        assert_eq!(descriptor.connection_kind(), ConnectionKind::Visa);
    }

    #[test]
    fn test_driver_source() {
        let d =
            InstrumentDescriptor::new("awg", "USB", "MY123").with_custom_driver("agilent33220a");
        assert_eq!(
            d.driver_source(),
            DriverSource::Custom("agilent33220a".to_string())
        );

        let blank = InstrumentDescriptor::new("awg", "USB", "MY123").with_custom_driver("  ");
        assert_eq!(blank.driver_source(), DriverSource::Builtin);
    }

    #[test]
    fn test_serialize_round_trips_tag() {
        let d = InstrumentDescriptor::new("scope", "TCPIP", "192.168.0.7")
            .with_baud_rate(9600)
            .non_visa();
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["interface"], "TCPIP");
        assert_eq!(json["visa"], false);
        assert_eq!(d.connection_kind(), ConnectionKind::Generic);
    }
}
