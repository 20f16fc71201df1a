//! # Telemetry Frame Parser
//!
//! Decodes one ASCII line from the receiver into a [`TelemetryRecord`].
//!
//! ## Frame Formats
//!
//! Live frames are 18 comma-separated numbers in [`Channel::ALL`] order:
//!
//! ```text
//! pitch,roll,yaw,altitude,velocity,ax,ay,az,pressure,temp,fix,sats,lat,lon,gps_alt,gps_speed,vbat,rssi
//! ```
//!
//! The trailing `rssi` field is often dropped by the radio, so 17 fields are
//! accepted too. Before the GPS has a fix the receiver instead emits a status
//! line such as `Waiting for GPS Fix,-97`, whose last field is the RSSI.
//!
//! ## Failure Policy
//!
//! A frame with the wrong shape (field count) is rejected. A frame with the
//! right shape but a garbled number keeps going with that channel set to 0.0.
//! Range validation, when configured, rejects the whole frame.

use chrono::Local;
use thiserror::Error;
use tracing::{debug, warn};

use super::record::{ChannelValues, RecordStatus, TelemetryRecord};
use super::schema::{round_to, Channel, CHANNEL_COUNT};

/// Marker text of the receiver's no-fix status line
pub const WAITING_FOR_FIX_MARKER: &str = "Waiting for GPS Fix";

/// Rejected frames with more fields than this are worth a warning
const IMPLAUSIBLE_FIELD_THRESHOLD: usize = 3;

/// Why a line did not produce a record
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("empty line")]
    Empty,

    #[error("bad packet length: expected {expected}, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("value out of configured range")]
    OutOfRange,
}

/// Inclusive `[min, max]` bound for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelRange {
    pub channel: Channel,
    pub min: f64,
    pub max: f64,
}

impl ChannelRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Decoded frame before it is stamped with time and sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFrame {
    pub status: RecordStatus,
    pub values: ChannelValues,
}

/// Stateful wrapper around [`decode_line`] that numbers accepted frames.
#[derive(Debug, Default)]
pub struct TelemetryParser {
    ranges: Vec<ChannelRange>,
    packet_count: u64,
}

impl TelemetryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that rejects frames with any channel outside `ranges`
    pub fn with_ranges(ranges: Vec<ChannelRange>) -> Self {
        Self {
            ranges,
            packet_count: 0,
        }
    }

    /// Number of live frames accepted so far
    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// Parse one line into a record.
    ///
    /// Live records take the next sequence number. Waiting records carry
    /// the current count without advancing it.
    ///
    /// # Examples
    ///
    /// ```
    /// use groundlink::telemetry::parser::TelemetryParser;
    /// use groundlink::telemetry::schema::Channel;
    ///
    /// let mut parser = TelemetryParser::new();
    /// let record = parser
    ///     .parse("5.2,-3.1,45.8,125.5,15.3,0.5,0.2,9.8,101325.0,22.5,1,8,37.123456,-122.345678,130.2,12.5,3.85,-95")
    ///     .unwrap();
    /// assert_eq!(record.get(Channel::Yaw), 45.8);
    /// assert_eq!(record.sequence, 1);
    /// ```
    pub fn parse(&mut self, line: &str) -> Result<TelemetryRecord, Rejection> {
        let frame = decode_line(line, &self.ranges)?;
        let sequence = match frame.status {
            RecordStatus::Active => {
                self.packet_count += 1;
                self.packet_count
            }
            RecordStatus::Waiting => self.packet_count,
        };
        Ok(TelemetryRecord {
            timestamp: Local::now(),
            sequence,
            status: frame.status,
            values: frame.values,
        })
    }
}

/// Decode one line without side effects other than diagnostics.
pub fn decode_line(line: &str, ranges: &[ChannelRange]) -> Result<DecodedFrame, Rejection> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Rejection::Empty);
    }

    if line.contains(WAITING_FOR_FIX_MARKER) {
        return Ok(decode_waiting(line));
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != CHANNEL_COUNT && fields.len() != CHANNEL_COUNT - 1 {
        let rejection = Rejection::FieldCount {
            expected: CHANNEL_COUNT,
            actual: fields.len(),
        };
        if fields.len() > IMPLAUSIBLE_FIELD_THRESHOLD {
            warn!("{}", rejection);
        } else {
            debug!("Dropping fragment: {:?}", line);
        }
        return Err(rejection);
    }

    let mut values = ChannelValues::zeroed();
    for (channel, field) in Channel::ALL.iter().zip(fields.iter()) {
        values.set(*channel, coerce(*channel, field));
    }

    for channel in Channel::ALL {
        if let Some(places) = channel.precision() {
            values.set(channel, round_to(values.get(channel), places));
        }
    }

    if ranges.iter().any(|r| !r.contains(values.get(r.channel))) {
        warn!("Dropping frame: value out of configured range");
        return Err(Rejection::OutOfRange);
    }

    Ok(DecodedFrame {
        status: RecordStatus::Active,
        values,
    })
}

fn decode_waiting(line: &str) -> DecodedFrame {
    let mut values = ChannelValues::zeroed();
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() > 1 {
        if let Some(rssi) = fields.last().and_then(|f| f.trim().parse::<f64>().ok()) {
            values.set(Channel::Rssi, rssi);
        }
    }
    DecodedFrame {
        status: RecordStatus::Waiting,
        values,
    }
}

/// Parse one field, falling back to 0.0 on garbage
fn coerce(channel: Channel, field: &str) -> f64 {
    match field.trim().parse::<f64>() {
        Ok(v) if channel.is_integer() => v.trunc(),
        Ok(v) => v,
        Err(_) => {
            debug!("Unparsable {} field {:?}, using 0.0", channel, field);
            0.0
        }
    }
}
