//! Return channel from the target back to the controller
//!
//! The controller owns the server end of a well-known named channel and
//! pulls one message from it. Code running inside the target connects,
//! writes a single message and disconnects. Only one controller/target pair
//! can use the well-known name at a time.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::sys;

/// Outcome of a single bounded read from a message-framed source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRead {
    /// `n` bytes read and the message is complete
    Complete(usize),
    /// `n` bytes read and more of the same message remains
    Partial(usize),
    /// Terminal failure; nothing was read
    Failed,
}

/// A message-framed byte source read in bounded chunks
pub trait MessageSource {
    /// Read up to `buffer.len()` bytes of the current message
    fn read_chunk(&mut self, buffer: &mut [u8]) -> ChunkRead;
}

/// Read one whole message, `chunk_size` bytes at a time
///
/// Chunks are concatenated in order. A terminal failure ends the message
/// early and keeps whatever arrived before it.
pub fn drain_message<S: MessageSource + ?Sized>(source: &mut S, chunk_size: usize) -> Vec<u8> {
    let mut message = Vec::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        match source.read_chunk(&mut buffer) {
            ChunkRead::Partial(n) => message.extend_from_slice(&buffer[..n.min(buffer.len())]),
            ChunkRead::Complete(n) => {
                message.extend_from_slice(&buffer[..n.min(buffer.len())]);
                break;
            }
            ChunkRead::Failed => break,
        }
    }
    message
}

/// Controller end of the return channel
pub struct ReturnChannel {
    server: sys::PipeServer,
    name: String,
    chunk_size: usize,
    drained: bool,
}

impl ReturnChannel {
    /// Create the named endpoint
    ///
    /// The endpoint admits writers running at low integrity.
    pub fn open(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let server = sys::PipeServer::create(&config.channel_name, config.pipe_buffer_size)?;
        debug!(channel = %config.channel_name, "return channel listening");
        Ok(Self {
            server,
            name: config.channel_name.clone(),
            chunk_size: config.pipe_buffer_size,
            drained: false,
        })
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the target and read its message
    ///
    /// `None` waits for the connection indefinitely. Returns an empty buffer
    /// when nobody connects in time, and on every pull after the first
    /// drained connection.
    pub fn pull(&mut self, timeout: Option<Duration>) -> Vec<u8> {
        trace!(channel = %self.name, ?timeout, "pulling from return channel");
        if self.drained {
            debug!(channel = %self.name, "return channel already drained");
            return Vec::new();
        }
        if !self.server.wait_for_client(timeout) {
            return Vec::new();
        }

        self.drained = true;
        let message = drain_message(&mut self.server, self.chunk_size);
        debug!(channel = %self.name, len = message.len(), "return channel drained");
        message
    }
}

impl std::fmt::Debug for ReturnChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReturnChannel")
            .field("name", &self.name)
            .field("chunk_size", &self.chunk_size)
            .field("drained", &self.drained)
            .finish()
    }
}

/// Target side: send `bytes` to the controller's return channel
///
/// Waits up to `config.connect_timeout()` for the channel, writes the payload
/// as one message and disconnects. Failures are logged, never returned: the
/// controller sees them as an empty pull.
pub fn write_to_channel(config: &BridgeConfig, process_id: u32, bytes: &[u8]) {
    if let Err(e) = try_write_to_channel(config, process_id, bytes) {
        warn!(process_id, error = %e, "failed to write to return channel");
    }
}

pub(crate) fn try_write_to_channel(
    config: &BridgeConfig,
    process_id: u32,
    bytes: &[u8],
) -> Result<(), BridgeError> {
    trace!(process_id, len = bytes.len(), channel = %config.channel_name, "writing to return channel");
    sys::write_message(&config.channel_name, config.connect_timeout(), bytes)
}
