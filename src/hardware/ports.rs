//! Serial port discovery and device selection
//!
//! The registry keeps the last scanned port list and the single port currently
//! bound to the instrument. Enumeration goes through [`PortSource`] so tests can
//! supply a fixed list.

use crate::error::{AppResult, DaqError};
use crate::hardware::keithley::IntegrationRate;
use std::fmt;
use tracing::{debug, info};

/// One enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Identifier used to open the port (e.g. "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Human readable description, empty when the OS reports none
    pub description: String,
}

impl PortInfo {
    /// Port with a description.
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.port_name)
        } else {
            write!(f, "{} - {}", self.port_name, self.description)
        }
    }
}

/// Where the list of available ports comes from.
pub trait PortSource: Send + Sync {
    /// Currently available ports.
    fn available(&self) -> AppResult<Vec<PortInfo>>;
}

/// Ports reported by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortSource for SystemPorts {
    #[cfg(feature = "instrument_serial")]
    fn available(&self) -> AppResult<Vec<PortInfo>> {
        use serialport::SerialPortType;

        let ports = serialport::available_ports().map_err(|e| {
            DaqError::transport("*", format!("Could not enumerate serial ports: {}", e))
        })?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let description = match p.port_type {
                    SerialPortType::UsbPort(usb) => usb
                        .product
                        .or(usb.manufacturer)
                        .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                    SerialPortType::PciPort => "PCI".to_string(),
                    SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    SerialPortType::Unknown => String::new(),
                };
                PortInfo::new(p.port_name, description)
            })
            .collect())
    }

    #[cfg(not(feature = "instrument_serial"))]
    fn available(&self) -> AppResult<Vec<PortInfo>> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

/// A fixed port list.
#[derive(Debug, Clone, Default)]
pub struct StaticPorts(pub Vec<PortInfo>);

impl PortSource for StaticPorts {
    fn available(&self) -> AppResult<Vec<PortInfo>> {
        Ok(self.0.clone())
    }
}

/// The port bound to the instrument plus its configured integration rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceHandle {
    /// Port identifier
    pub port: String,
    /// Integration rate last sent (or to be sent) to the instrument
    pub integration_rate: IntegrationRate,
}

impl DeviceHandle {
    /// Handle with the default integration rate.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            integration_rate: IntegrationRate::default(),
        }
    }
}

/// Tracks available ports and which one is bound to the instrument.
pub struct PortRegistry {
    source: Box<dyn PortSource>,
    ports: Vec<PortInfo>,
    selected: Option<DeviceHandle>,
}

impl PortRegistry {
    /// Registry over `source`, scanned once on creation.
    ///
    /// A failing first scan leaves the list empty.
    pub fn new(source: impl PortSource + 'static) -> Self {
        let mut registry = Self {
            source: Box::new(source),
            ports: Vec::new(),
            selected: None,
        };
        if let Err(e) = registry.scan() {
            debug!(error = %e, "Initial port scan failed");
        }
        registry
    }

    /// Registry over the operating system's ports.
    pub fn system() -> Self {
        Self::new(SystemPorts)
    }

    /// Refresh the port list.
    pub fn scan(&mut self) -> AppResult<&[PortInfo]> {
        self.ports = self.source.available()?;
        debug!(count = self.ports.len(), "Scanned serial ports");
        Ok(&self.ports)
    }

    /// Ports found by the last scan.
    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    /// Identifiers found by the last scan.
    pub fn identifiers(&self) -> Vec<String> {
        self.ports.iter().map(|p| p.port_name.clone()).collect()
    }

    /// Display strings found by the last scan.
    pub fn display_names(&self) -> Vec<String> {
        self.ports.iter().map(ToString::to_string).collect()
    }

    /// Whether `id` is among the scanned ports.
    pub fn is_present(&self, id: &str) -> bool {
        self.ports.iter().any(|p| p.port_name == id)
    }

    /// Description of `id`, falling back to the identifier itself.
    pub fn description(&self, id: &str) -> String {
        self.ports
            .iter()
            .find(|p| p.port_name == id)
            .map(ToString::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    /// Turn a user selection (identifier or display string) into a device handle.
    pub fn resolve(&self, selection: &str) -> AppResult<DeviceHandle> {
        let selection = selection.trim();
        if selection.is_empty() {
            return Err(DaqError::Validation("No device selected.".into()));
        }

        self.ports
            .iter()
            .find(|p| p.port_name == selection || p.to_string() == selection)
            .map(|p| DeviceHandle::new(p.port_name.clone()))
            .ok_or_else(|| DaqError::Validation(format!("Device {} not found.", selection)))
    }

    /// Resolve `selection` and bind it as the active device.
    pub fn select(&mut self, selection: &str) -> AppResult<DeviceHandle> {
        let handle = self.resolve(selection)?;
        info!(port = %handle.port, "Device selected");
        self.selected = Some(handle.clone());
        Ok(handle)
    }

    /// Drop the active device binding.
    pub fn deselect(&mut self) -> Option<DeviceHandle> {
        self.selected.take()
    }

    /// The active device, if any.
    pub fn selected(&self) -> Option<&DeviceHandle> {
        self.selected.as_ref()
    }
}
