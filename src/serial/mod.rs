//! # Serial Communication Module
//!
//! Owns the link to the telemetry receiver.
//!
//! This module handles:
//! - Locating the receiver (USB allow-list or fixed port)
//! - Opening the serial port and reading newline-delimited frames
//! - Feeding frames to the ingestion [`Pipeline`]
//! - Reconnecting after any failure with a fixed back-off
//!
//! ## Connection States
//!
//! ```text
//!            locate ok / have port          open ok
//! Disconnected ───────────────────▶ Connecting ──────▶ Connected
//!      ▲                                │                  │
//!      └──────── back-off ◀─────────────┴── I/O error ◀────┘
//! ```
//!
//! There is no terminal state: the manager keeps retrying until the process
//! exits.

pub mod locator;
pub mod port_trait;
pub mod reader;

use std::time::Duration;
use tracing::{error, info, warn};

use crate::broadcast::envelope::DeviceAddress;
use crate::config::SerialConfig;
use crate::error::Result;
use crate::pipeline::Pipeline;
use locator::DeviceLocator;
use port_trait::PortOpener;
use reader::{PacketReader, ReadOutcome};

/// Link state of the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Timing for the connection state machine
#[derive(Debug, Clone, Copy)]
pub struct LinkTiming {
    /// Longest wait for one frame
    pub read_timeout: Duration,
    /// Pause after every failure
    pub reconnect_interval: Duration,
}

impl From<&SerialConfig> for LinkTiming {
    fn from(config: &SerialConfig) -> Self {
        Self {
            read_timeout: Duration::from_millis(config.timeout_ms),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
        }
    }
}

/// Retry state machine around one serial link.
pub struct ConnectionManager<O: PortOpener> {
    opener: O,
    locator: Box<dyn DeviceLocator>,
    pipeline: Pipeline,
    timing: LinkTiming,
    state: ConnectionState,
    address: DeviceAddress,
    reader: Option<PacketReader<O::Stream>>,
}

impl<O: PortOpener> ConnectionManager<O> {
    pub fn new(opener: O, locator: Box<dyn DeviceLocator>, pipeline: Pipeline, timing: LinkTiming) -> Self {
        Self {
            opener,
            locator,
            pipeline,
            timing,
            state: ConnectionState::Disconnected,
            address: DeviceAddress::NotFound,
            reader: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Drive the link forever, starting from `initial`.
    ///
    /// # Errors
    ///
    /// Only a flight log failure ends the loop; link failures are retried.
    pub async fn run(mut self, initial: DeviceAddress) -> Result<()> {
        self.address = initial;
        self.pipeline
            .hub()
            .set_link_status(false, self.address.clone())
            .await;
        loop {
            if let Err(e) = self.step().await {
                error!("Ingestion stopped: {}", e);
                return Err(e);
            }
        }
    }

    /// Perform one transition of the state machine
    pub async fn step(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => self.step_disconnected().await,
            ConnectionState::Connecting => self.step_connecting().await,
            ConnectionState::Connected => self.step_connected().await,
        }
    }

    async fn step_disconnected(&mut self) -> Result<()> {
        if self.address == DeviceAddress::NotFound {
            let found = self.locator.locate();
            self.pipeline.hub().set_link_status(false, found.clone()).await;
            if found == DeviceAddress::NotFound {
                warn!(
                    "Serial port not found. Retrying in {:?}...",
                    self.timing.reconnect_interval
                );
                tokio::time::sleep(self.timing.reconnect_interval).await;
                return Ok(());
            }
            self.address = found;
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    async fn step_connecting(&mut self) -> Result<()> {
        let port = self.address.as_str().to_string();
        info!("Attempting to connect to serial port {}...", port);
        match self.opener.open(&port) {
            Ok(stream) => {
                self.reader = Some(PacketReader::new(stream, self.timing.read_timeout));
                self.state = ConnectionState::Connected;
                info!("Serial connection to {} established", port);
                self.pipeline
                    .hub()
                    .set_link_status(true, self.address.clone())
                    .await;
            }
            Err(e) => {
                warn!("Serial connection error: {}", e);
                self.fail().await;
            }
        }
        Ok(())
    }

    async fn step_connected(&mut self) -> Result<()> {
        let Some(reader) = self.reader.as_mut() else {
            self.state = ConnectionState::Disconnected;
            return Ok(());
        };
        match reader.read_frame().await {
            Ok(ReadOutcome::Frame(line)) => self.pipeline.handle_line(&line).await?,
            Ok(ReadOutcome::Idle) | Ok(ReadOutcome::Discarded) => {}
            Err(e) => {
                warn!("Serial error (disconnect?): {}", e);
                self.fail().await;
            }
        }
        Ok(())
    }

    /// Drop the link, forget the port and wait out the back-off
    async fn fail(&mut self) {
        self.reader = None;
        self.state = ConnectionState::Disconnected;
        self.pipeline
            .hub()
            .set_link_status(false, self.address.clone())
            .await;
        self.address = DeviceAddress::NotFound;
        info!("Retrying connection in {:?}...", self.timing.reconnect_interval);
        tokio::time::sleep(self.timing.reconnect_interval).await;
    }
}
