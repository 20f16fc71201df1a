//! # Device Locator
//!
//! Finds the receiver's serial port.
//!
//! Two strategies:
//! - [`UsbLocator`]: scan enumerated ports for an allow-listed USB VID/PID
//! - [`FixedLocator`]: always answer with a configured port

use tracing::{debug, info};

use crate::broadcast::envelope::DeviceAddress;
use crate::config::{SerialConfig, UsbId};

/// Source of the receiver's port name
#[cfg_attr(test, mockall::automock)]
pub trait DeviceLocator: Send + Sync {
    /// Current address of the device, or [`DeviceAddress::NotFound`]
    fn locate(&self) -> DeviceAddress;
}

/// Pick the locator for a configuration: a fixed port wins over scanning
pub fn from_config(config: &SerialConfig) -> Box<dyn DeviceLocator> {
    if config.port.is_empty() {
        Box::new(UsbLocator::new(config.allowed_devices.clone()))
    } else {
        Box::new(FixedLocator::new(config.port.clone()))
    }
}

/// Matches enumerated USB serial ports against an allow-list
#[derive(Debug, Clone)]
pub struct UsbLocator {
    allowed: Vec<UsbId>,
}

impl UsbLocator {
    pub fn new(allowed: Vec<UsbId>) -> Self {
        Self { allowed }
    }

    /// First port whose identity is allowed, in enumeration order
    pub fn select<'a, I>(&self, ports: I) -> Option<String>
    where
        I: IntoIterator<Item = (&'a str, Option<UsbId>)>,
    {
        ports
            .into_iter()
            .find(|(_, id)| id.is_some_and(|id| self.allowed.contains(&id)))
            .map(|(name, _)| name.to_string())
    }
}

impl DeviceLocator for UsbLocator {
    fn locate(&self) -> DeviceAddress {
        let ports = match tokio_serial::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                debug!("Failed to enumerate serial ports: {}", e);
                return DeviceAddress::NotFound;
            }
        };

        let candidates = ports.iter().map(|p| {
            let id = match &p.port_type {
                tokio_serial::SerialPortType::UsbPort(info) => Some(UsbId {
                    vid: info.vid,
                    pid: info.pid,
                }),
                _ => None,
            };
            (p.port_name.as_str(), id)
        });

        match self.select(candidates) {
            Some(port) => {
                info!("Found receiver on port: {}", port);
                DeviceAddress::Port(port)
            }
            None => DeviceAddress::NotFound,
        }
    }
}

/// Always reports the configured port
#[derive(Debug, Clone)]
pub struct FixedLocator {
    port: String,
}

impl FixedLocator {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }
}

impl DeviceLocator for FixedLocator {
    fn locate(&self) -> DeviceAddress {
        DeviceAddress::Port(self.port.clone())
    }
}
