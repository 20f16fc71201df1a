//! # Telemetry Record Types
//!
//! Structured form of one decoded frame.

use chrono::{DateTime, Local};
use std::fmt;

use super::schema::{Channel, CHANNEL_COUNT};

/// Timestamp format used for capture times (ISO-8601, local time, microseconds)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Whether the device is streaming live data or still waiting for a GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordStatus {
    #[default]
    Active,
    Waiting,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Waiting => "waiting",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel values for one frame, indexed by [`Channel`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelValues([f64; CHANNEL_COUNT]);

impl ChannelValues {
    pub fn zeroed() -> Self {
        Self([0.0; CHANNEL_COUNT])
    }

    pub fn get(&self, channel: Channel) -> f64 {
        self.0[channel.index()]
    }

    pub fn set(&mut self, channel: Channel, value: f64) {
        self.0[channel.index()] = value;
    }

    /// Iterate `(channel, value)` pairs in frame order
    pub fn iter(&self) -> impl Iterator<Item = (Channel, f64)> + '_ {
        Channel::ALL.iter().map(move |&c| (c, self.0[c.index()]))
    }
}

/// One accepted telemetry frame
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Local>,
    pub sequence: u64,
    pub status: RecordStatus,
    pub values: ChannelValues,
}

impl TelemetryRecord {
    pub fn get(&self, channel: Channel) -> f64 {
        self.values.get(channel)
    }

    /// Look up a value by channel name
    pub fn value(&self, name: &str) -> Option<f64> {
        Channel::from_name(name).map(|c| self.values.get(c))
    }

    /// Only live frames go to the flight log
    pub fn is_loggable(&self) -> bool {
        self.status == RecordStatus::Active
    }

    /// Flatten into a named row for the flight log.
    ///
    /// Column order: `timestamp`, `sequence`, `sys_status`, then every
    /// channel in frame order.
    pub fn to_row(&self) -> Vec<(&'static str, LogValue)> {
        let mut row = Vec::with_capacity(CHANNEL_COUNT + 3);
        row.push((
            "timestamp",
            LogValue::Text(self.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        ));
        row.push(("sequence", LogValue::Int(self.sequence as i64)));
        row.push(("sys_status", LogValue::Text(self.status.as_str().to_string())));
        for (channel, value) in self.values.iter() {
            let value = if channel.is_integer() {
                LogValue::Int(value as i64)
            } else {
                LogValue::Float(value)
            };
            row.push((channel.name(), value));
        }
        row
    }
}

/// A single cell in the flight log
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    Text(String),
    Int(i64),
    Float(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetryRecord {
        let mut values = ChannelValues::zeroed();
        values.set(Channel::GpsSats, 8.0);
        values.set(Channel::GpsLat, 37.123456);
        TelemetryRecord {
            timestamp: Local::now(),
            sequence: 3,
            status: RecordStatus::Active,
            values,
        }
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(RecordStatus::Active.as_str(), "active");
        assert_eq!(RecordStatus::Waiting.to_string(), "waiting");
    }

    #[test]
    fn test_value_by_name() {
        let record = sample();
        assert_eq!(record.value("gps_lat"), Some(37.123456));
        assert_eq!(record.value("nope"), None);
    }

    #[test]
    fn test_row_layout() {
        let row = sample().to_row();
        assert_eq!(row.len(), CHANNEL_COUNT + 3);
        assert_eq!(row[0].0, "timestamp");
        assert_eq!(row[1], ("sequence", LogValue::Int(3)));
        assert_eq!(row[2], ("sys_status", LogValue::Text("active".into())));
        assert_eq!(row[3].0, "pitch");
        assert_eq!(row[3 + Channel::GpsSats.index()], ("gps_sats", LogValue::Int(8)));
        assert_eq!(row[3 + Channel::GpsLat.index()], ("gps_lat", LogValue::Float(37.123456)));
    }

    #[test]
    fn test_waiting_not_loggable() {
        let mut record = sample();
        assert!(record.is_loggable());
        record.status = RecordStatus::Waiting;
        assert!(!record.is_loggable());
    }
}
