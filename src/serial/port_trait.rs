//! Trait abstraction for opening serial streams to enable testing

use tokio::io::AsyncRead;
use tokio_serial::SerialPortBuilderExt;

use crate::error::{GroundlinkError, Result};

/// Opens a byte stream to a named port
pub trait PortOpener: Send + Sync {
    type Stream: AsyncRead + Unpin + Send;

    /// Open `port`, failing fast if the device is absent
    fn open(&self, port: &str) -> Result<Self::Stream>;
}

/// Opens real serial ports (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct TokioSerialOpener {
    baud_rate: u32,
}

impl TokioSerialOpener {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl PortOpener for TokioSerialOpener {
    type Stream = tokio_serial::SerialStream;

    fn open(&self, port: &str) -> Result<Self::Stream> {
        tokio_serial::new(port, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| GroundlinkError::Serial(format!("Failed to open {}: {}", port, e)))
    }
}
