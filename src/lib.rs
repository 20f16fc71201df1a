//! # Groundlink Library
//!
//! Serial telemetry ground station.
//!
//! This library provides the ingestion pipeline that reads ASCII telemetry
//! frames from a serial-attached receiver, logs them to CSV and pushes live
//! updates to any number of WebSocket observers.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod serial;
pub mod telemetry;
