//! # Packet Reader
//!
//! Pulls newline-delimited frames off a byte stream with a bounded wait.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Longest line kept while waiting for its newline. A full frame is well
/// under 200 bytes.
pub const MAX_FRAME_LEN: usize = 1024;

/// Result of one read attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete UTF-8 line, terminator stripped
    Frame(String),
    /// Nothing arrived within the timeout
    Idle,
    /// A line arrived but was not valid UTF-8, or grew past
    /// [`MAX_FRAME_LEN`] without a newline
    Discarded,
}

/// Line reader over a serial stream.
///
/// Bytes of a partial line survive a timeout and are completed by the next
/// call. An overlong line is dropped in pieces, up to and including its
/// newline.
pub struct PacketReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    timeout: Duration,
    skipping: bool,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(stream: R, timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(stream),
            buf: Vec::with_capacity(256),
            timeout,
            skipping: false,
        }
    }

    /// Read one frame.
    ///
    /// # Errors
    ///
    /// End of stream is reported as [`io::ErrorKind::UnexpectedEof`]; any
    /// other stream error is passed through. Both mean the link is gone.
    pub async fn read_frame(&mut self) -> io::Result<ReadOutcome> {
        let read = tokio::time::timeout(self.timeout, read_bounded(&mut self.inner, &mut self.buf)).await;
        let n = match read {
            Err(_) => return Ok(ReadOutcome::Idle),
            Ok(result) => result?,
        };

        if n == 0 && self.buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial stream closed"));
        }

        let complete = self.buf.last() == Some(&b'\n') || n == 0;
        if self.buf.len() > MAX_FRAME_LEN || (self.skipping && complete) {
            if !self.skipping {
                debug!("Discarding line longer than {} bytes", MAX_FRAME_LEN);
            }
            self.skipping = !complete;
            self.buf.clear();
            return Ok(ReadOutcome::Discarded);
        }

        let raw = std::mem::take(&mut self.buf);
        match String::from_utf8(raw) {
            Ok(mut line) => {
                let trimmed_len = line.trim_end_matches(['\r', '\n']).len();
                line.truncate(trimmed_len);
                Ok(ReadOutcome::Frame(line))
            }
            Err(e) => {
                debug!("Discarding non UTF-8 frame: {}", e);
                Ok(ReadOutcome::Discarded)
            }
        }
    }
}

/// Append bytes up to and including the next newline, stopping early once
/// `buf` passes [`MAX_FRAME_LEN`]. Returns the number of bytes appended; 0
/// means end of stream.
///
/// Cancel safe: bytes are moved from the reader into `buf` without an await
/// in between.
async fn read_bounded<R: AsyncRead + Unpin>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> io::Result<usize> {
    let mut total = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }
        let (done, used) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (true, i + 1),
            None => (false, available.len()),
        };
        buf.extend_from_slice(&available[..used]);
        reader.consume(used);
        total += used;
        if done || buf.len() > MAX_FRAME_LEN {
            return Ok(total);
        }
    }
}
