//! # Telemetry Module
//!
//! Turns receiver lines into records and writes them to the flight log.
//!
//! This module handles:
//! - The canonical 18-channel schema and per-channel precision
//! - Tolerant parsing of CSV frames and "waiting for fix" status lines
//! - Appending accepted records to a per-run CSV file

pub mod logger;
pub mod parser;
pub mod record;
pub mod schema;
