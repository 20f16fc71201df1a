//! # Canonical Telemetry Schema
//!
//! The fixed, ordered list of channels carried by every telemetry frame.
//!
//! ## Channel Layout
//!
//! | Index | Channel | Unit | Rounding |
//! |-------|---------|------|----------|
//! | 0 | pitch | deg | - |
//! | 1 | roll | deg | - |
//! | 2 | yaw | deg | - |
//! | 3 | altitude | m | 2 |
//! | 4 | velocity | m/s | 2 |
//! | 5 | accel_x | m/s² | - |
//! | 6 | accel_y | m/s² | - |
//! | 7 | accel_z | m/s² | - |
//! | 8 | pressure_pa | Pa | 2 |
//! | 9 | imu_temp_c | °C | 2 |
//! | 10 | gps_fix | flag | integer |
//! | 11 | gps_sats | count | integer |
//! | 12 | gps_lat | deg | 6 |
//! | 13 | gps_lon | deg | 6 |
//! | 14 | gps_alt_m | m | 2 |
//! | 15 | gps_speed_m_s | m/s | - |
//! | 16 | vbat | V | 3 |
//! | 17 | rssi | dBm | - |
//!
//! The index order is the positional order of fields in a CSV frame.

use std::fmt;

/// Number of channels in a full frame
pub const CHANNEL_COUNT: usize = 18;

/// One telemetry channel of the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Pitch,
    Roll,
    Yaw,
    Altitude,
    Velocity,
    AccelX,
    AccelY,
    AccelZ,
    PressurePa,
    ImuTempC,
    GpsFix,
    GpsSats,
    GpsLat,
    GpsLon,
    GpsAltM,
    GpsSpeedMS,
    Vbat,
    Rssi,
}

impl Channel {
    /// All channels in frame order
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Pitch,
        Channel::Roll,
        Channel::Yaw,
        Channel::Altitude,
        Channel::Velocity,
        Channel::AccelX,
        Channel::AccelY,
        Channel::AccelZ,
        Channel::PressurePa,
        Channel::ImuTempC,
        Channel::GpsFix,
        Channel::GpsSats,
        Channel::GpsLat,
        Channel::GpsLon,
        Channel::GpsAltM,
        Channel::GpsSpeedMS,
        Channel::Vbat,
        Channel::Rssi,
    ];

    /// Position of this channel within a frame
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable snake_case name used in log columns and envelopes
    pub fn name(self) -> &'static str {
        match self {
            Channel::Pitch => "pitch",
            Channel::Roll => "roll",
            Channel::Yaw => "yaw",
            Channel::Altitude => "altitude",
            Channel::Velocity => "velocity",
            Channel::AccelX => "accel_x",
            Channel::AccelY => "accel_y",
            Channel::AccelZ => "accel_z",
            Channel::PressurePa => "pressure_pa",
            Channel::ImuTempC => "imu_temp_c",
            Channel::GpsFix => "gps_fix",
            Channel::GpsSats => "gps_sats",
            Channel::GpsLat => "gps_lat",
            Channel::GpsLon => "gps_lon",
            Channel::GpsAltM => "gps_alt_m",
            Channel::GpsSpeedMS => "gps_speed_m_s",
            Channel::Vbat => "vbat",
            Channel::Rssi => "rssi",
        }
    }

    /// Look up a channel by its snake_case name
    pub fn from_name(name: &str) -> Option<Channel> {
        Channel::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Channels that carry whole numbers (decoded float-then-truncate)
    pub fn is_integer(self) -> bool {
        matches!(self, Channel::GpsFix | Channel::GpsSats)
    }

    /// Decimal places kept for this channel, if it has a fixed precision
    pub fn precision(self) -> Option<u32> {
        match self {
            Channel::GpsLat | Channel::GpsLon => Some(6),
            Channel::Vbat => Some(3),
            Channel::GpsAltM
            | Channel::ImuTempC
            | Channel::PressurePa
            | Channel::Altitude
            | Channel::Velocity => Some(2),
            _ => None,
        }
    }

    /// Render a value the way the dashboard expects it.
    ///
    /// Integer channels have no decimal point; whole floats keep one
    /// trailing zero so the text width does not jump between `1` and `1.5`.
    ///
    /// # Examples
    ///
    /// ```
    /// use groundlink::telemetry::schema::Channel;
    ///
    /// assert_eq!(Channel::GpsSats.display(8.0), "8");
    /// assert_eq!(Channel::Altitude.display(125.0), "125.0");
    /// assert_eq!(Channel::GpsLat.display(37.123456), "37.123456");
    /// ```
    pub fn display(self, value: f64) -> String {
        if self.is_integer() {
            format!("{}", value as i64)
        } else if value.is_finite() && value.fract() == 0.0 {
            format!("{:.1}", value)
        } else {
            format!("{}", value)
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Round `value` to `places` decimal places (half away from zero)
pub fn round_to(value: f64, places: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(places as i32);
    let scaled = value * factor;
    // Too large to carry any fractional digits at this precision
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

/// Precision for a named log column, if the name is a channel with one
pub fn precision_for(column: &str) -> Option<u32> {
    Channel::from_name(column).and_then(Channel::precision)
}
