//! Live resource discovery and connection string resolution.
//!
//! A resource manager reports the instruments it can currently see as VISA-style
//! resource strings (`GPIB0::22::INSTR`, `USB0::0x0957::0x0407::MY44::INSTR`,
//! `ASRL/dev/ttyUSB0::INSTR`). Resolution turns a descriptor's interface tag and
//! address into one of those strings:
//!
//! | Interface | Rule |
//! |-----------|------|
//! | TCPIP | constructed as `TCPIP0::<address>::INSTR`, no lookup |
//! | USB with an `ASRL` address | first resource containing the address |
//! | anything else | first resource containing both the tag and the address |
//!
//! A USB-serial adapter shows up as an `ASRL` resource, never as `USB`, which is
//! why the serial case only matches on the address token.

use async_trait::async_trait;
use labsweep_core::descriptor::{InstrumentDescriptor, InterfaceTag};
use labsweep_core::error::{SweepError, SweepResult};

/// Board prefix used when constructing LAN resource strings.
pub const TCPIP_TRANSPORT_PREFIX: &str = "TCPIP0";

/// Resource class suffix.
pub const INSTR_SUFFIX: &str = "INSTR";

/// Token marking a serial sub-address.
const SERIAL_TOKEN: &str = "ASRL";

/// Source of the live resource list.
#[async_trait]
pub trait ResourceLister: Send + Sync {
    /// Every resource currently visible.
    async fn list_resources(&self) -> anyhow::Result<Vec<String>>;
}

/// Fixed resource list, from configuration or tests.
#[derive(Debug, Clone, Default)]
pub struct StaticResources {
    resources: Vec<String>,
}

impl StaticResources {
    /// Create a lister that always reports `resources`.
    pub fn new<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ResourceLister for StaticResources {
    async fn list_resources(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.resources.clone())
    }
}

/// Serial ports on this machine, reported as `ASRL<port>::INSTR`.
#[cfg(feature = "serial")]
#[derive(Debug, Clone, Default)]
pub struct SerialPortResources;

#[cfg(feature = "serial")]
#[async_trait]
impl ResourceLister for SerialPortResources {
    async fn list_resources(&self) -> anyhow::Result<Vec<String>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports).await??;
        Ok(ports
            .into_iter()
            .map(|p| format!("{}{}::{}", SERIAL_TOKEN, p.port_name, INSTR_SUFFIX))
            .collect())
    }
}

/// Several listers reported as one list, in order.
pub struct CombinedResources {
    listers: Vec<Box<dyn ResourceLister>>,
}

impl CombinedResources {
    /// Combine `listers`.
    pub fn new(listers: Vec<Box<dyn ResourceLister>>) -> Self {
        Self { listers }
    }
}

#[async_trait]
impl ResourceLister for CombinedResources {
    async fn list_resources(&self) -> anyhow::Result<Vec<String>> {
        let mut all = Vec::new();
        for lister in &self.listers {
            all.extend(lister.list_resources().await?);
        }
        Ok(all)
    }
}

/// Connection string for a LAN instrument.
///
/// ```
/// use labsweep_hardware::resources::tcpip_connection_string;
/// assert_eq!(tcpip_connection_string("192.168.0.7"), "TCPIP0::192.168.0.7::INSTR");
/// ```
pub fn tcpip_connection_string(address: &str) -> String {
    format!("{}::{}::{}", TCPIP_TRANSPORT_PREFIX, address, INSTR_SUFFIX)
}

/// Whether the interface needs the live resource list at all.
pub fn needs_resource_list(descriptor: &InstrumentDescriptor) -> bool {
    descriptor.interface != InterfaceTag::Tcpip
}

/// Pick the resource string for `descriptor` out of `live`.
///
/// Fails with `ResourceNotFound` carrying the whole of `live` when nothing matches.
pub fn resolve_resource(descriptor: &InstrumentDescriptor, live: &[String]) -> SweepResult<String> {
    let address = descriptor.address.as_str();
    let tag = descriptor.interface.as_str();

    let found = match &descriptor.interface {
        InterfaceTag::Tcpip => Some(tcpip_connection_string(address)),
        InterfaceTag::Usb if address.contains(SERIAL_TOKEN) => live
            .iter()
            .find(|resource| resource.contains(address))
            .cloned(),
        _ => live
            .iter()
            .find(|resource| resource.contains(tag) && resource.contains(address))
            .cloned(),
    };

    found.ok_or_else(|| SweepError::ResourceNotFound {
        identity: descriptor.identity.clone(),
        interface: tag.to_string(),
        address: address.to_string(),
        available: live.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> Vec<String> {
        vec![
            "GPIB0::5::INSTR".to_string(),
            "GPIB0::22::INSTR".to_string(),
            "USB0::0x0957::0x0407::MY44012345::INSTR".to_string(),
            "ASRL/dev/ttyUSB0::INSTR".to_string(),
        ]
    }

    #[test]
    fn test_tcpip_is_constructed() {
        let d = InstrumentDescriptor::new("scope", "TCPIP", "192.168.0.7");
        assert_eq!(
            resolve_resource(&d, &[]).unwrap(),
            "TCPIP0::192.168.0.7::INSTR"
        );
        assert!(!needs_resource_list(&d));
    }

    #[test]
    fn test_interface_and_address_must_both_match() {
        let d = InstrumentDescriptor::new("dmm", "GPIB", "22");
        assert_eq!(resolve_resource(&d, &live()).unwrap(), "GPIB0::22::INSTR");

        let d = InstrumentDescriptor::new("awg", "USB", "MY44012345");
        assert_eq!(
            resolve_resource(&d, &live()).unwrap(),
            "USB0::0x0957::0x0407::MY44012345::INSTR"
        );
    }

    #[test]
    fn test_usb_serial_matches_address_only() {
        // The resource carries no "USB" token; matching on the tag would fail.
        let d = InstrumentDescriptor::new("stage", "USB", "ASRL/dev/ttyUSB0");
        assert_eq!(
            resolve_resource(&d, &live()).unwrap(),
            "ASRL/dev/ttyUSB0::INSTR"
        );
    }

    #[test]
    fn test_not_found_carries_live_list() {
        let d = InstrumentDescriptor::new("dmm", "GPIB", "9");
        match resolve_resource(&d, &live()) {
            Err(SweepError::ResourceNotFound {
                identity,
                available,
                ..
            }) => {
                assert_eq!(identity, "dmm");
                assert_eq!(available, live());
            }
            other => panic!("expected ResourceNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_address_on_wrong_interface_is_not_matched() {
        let d = InstrumentDescriptor::new("dmm", "SERIAL", "22");
        assert!(resolve_resource(&d, &live()).is_err());
    }

    #[tokio::test]
    async fn test_combined_lister_preserves_order() {
        let lister = CombinedResources::new(vec![
            Box::new(StaticResources::new(["GPIB0::1::INSTR"])),
            Box::new(StaticResources::new(["ASRL1::INSTR", "ASRL2::INSTR"])),
        ]);
        assert_eq!(
            lister.list_resources().await.unwrap(),
            vec!["GPIB0::1::INSTR", "ASRL1::INSTR", "ASRL2::INSTR"]
        );
    }
}
