//! # Live Update Envelope
//!
//! Wire form of a store snapshot:
//!
//! ```json
//! {"type":"update","status":{"connected":true,"port":"/dev/ttyACM0"},
//!  "data":{"pitch":"5.2", ..., "rssi":"-95.0","sys_status":"active"}}
//! ```

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::telemetry::record::{RecordStatus, TelemetryRecord};
use crate::telemetry::schema::{Channel, CHANNEL_COUNT};

/// Port text shown while no device is known
pub const PORT_NOT_FOUND: &str = "Not Found";

/// Where the receiver is, if anywhere
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceAddress {
    #[default]
    NotFound,
    Port(String),
}

impl DeviceAddress {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceAddress::NotFound => PORT_NOT_FOUND,
            DeviceAddress::Port(port) => port,
        }
    }
}

impl From<Option<String>> for DeviceAddress {
    fn from(port: Option<String>) -> Self {
        port.map_or(DeviceAddress::NotFound, DeviceAddress::Port)
    }
}

/// Connection status as observers see it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub address: DeviceAddress,
}

impl Serialize for LinkStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("connected", &self.connected)?;
        map.serialize_entry("port", self.address.as_str())?;
        map.end()
    }
}

/// Display text of every channel plus the device status tag
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayData {
    values: Vec<String>,
    status: RecordStatus,
}

impl Default for DisplayData {
    fn default() -> Self {
        Self {
            values: Channel::ALL.iter().map(|c| c.display(0.0)).collect(),
            status: RecordStatus::Active,
        }
    }
}

impl DisplayData {
    pub fn from_record(record: &TelemetryRecord) -> Self {
        Self {
            values: record.values.iter().map(|(c, v)| c.display(v)).collect(),
            status: record.status,
        }
    }

    pub fn get(&self, channel: Channel) -> &str {
        &self.values[channel.index()]
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }
}

impl Serialize for DisplayData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(CHANNEL_COUNT + 1))?;
        for channel in Channel::ALL {
            map.serialize_entry(channel.name(), &self.values[channel.index()])?;
        }
        map.serialize_entry("sys_status", self.status.as_str())?;
        map.end()
    }
}

/// Immutable copy of the store state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub status: LinkStatus,
    pub data: DisplayData,
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    status: &'a LinkStatus,
    data: &'a DisplayData,
}

impl Snapshot {
    /// Serialize as an `update` envelope
    pub fn to_envelope(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&Envelope {
            kind: "update",
            status: &self.status,
            data: &self.data,
        })
    }
}
