//! Return channel over a Unix domain socket
//!
//! Sockets have no message mode, so each write is framed:
//! ```text
//! ┌──────────────┐
//! │ len: u32 LE  │
//! │ payload...   │
//! └──────────────┘
//! ```
//! A chunk read reports `Partial` until the whole frame has arrived.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::channel::{ChunkRead, MessageSource};
use crate::error::BridgeError;

const FRAME_HEADER_SIZE: usize = 4;

/// Poll interval while waiting for the peer
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.sock", name.replace(['/', '\\'], "_")))
}

/// Controller end of the return channel
pub(crate) struct PipeServer {
    listener: UnixListener,
    path: PathBuf,
    stream: Option<UnixStream>,
    remaining: Option<usize>,
}

impl PipeServer {
    pub(crate) fn create(name: &str, _buffer_size: usize) -> Result<Self, BridgeError> {
        let path = socket_path(name);
        // A socket file left behind by an earlier controller blocks bind
        let _ = std::fs::remove_file(&path);

        let listener = UnixListener::bind(&path).map_err(|source| BridgeError::ChannelCreation {
            name: name.to_string(),
            source,
        })?;

        Ok(Self {
            listener,
            path,
            stream: None,
            remaining: None,
        })
    }

    /// Wait for the target to connect; an existing connection counts
    pub(crate) fn wait_for_client(&mut self, timeout: Option<Duration>) -> bool {
        if self.stream.is_some() {
            return true;
        }
        if let Err(e) = self.listener.set_nonblocking(true) {
            warn!(error = %e, "failed to poll return channel");
            return false;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(error = %e, "failed to configure return channel connection");
                        return false;
                    }
                    self.stream = Some(stream);
                    return true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        debug!("no connection on return channel before timeout");
                        return false;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept return channel connection");
                    return false;
                }
            }
        }
    }
}

impl MessageSource for PipeServer {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> ChunkRead {
        let Some(stream) = self.stream.as_mut() else {
            return ChunkRead::Failed;
        };

        let remaining = match self.remaining {
            Some(remaining) => remaining,
            None => {
                let mut header = [0u8; FRAME_HEADER_SIZE];
                if let Err(e) = stream.read_exact(&mut header) {
                    debug!(error = %e, "return channel closed before a frame header");
                    return ChunkRead::Failed;
                }
                u32::from_le_bytes(header) as usize
            }
        };

        let want = remaining.min(buffer.len());
        let mut read = 0;
        while read < want {
            match stream.read(&mut buffer[read..want]) {
                Ok(0) => {
                    debug!(read, want, "return channel closed mid-frame");
                    return ChunkRead::Failed;
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(error = %e, "return channel read failed");
                    return ChunkRead::Failed;
                }
            }
        }

        let left = remaining - read;
        if left > 0 {
            self.remaining = Some(left);
            ChunkRead::Partial(read)
        } else {
            self.remaining = None;
            ChunkRead::Complete(read)
        }
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connect to the controller's channel and write `bytes` as one frame
pub(crate) fn write_message(name: &str, timeout: Duration, bytes: &[u8]) -> Result<(), BridgeError> {
    let path = socket_path(name);
    let deadline = Instant::now() + timeout;

    let mut stream = loop {
        match UnixStream::connect(&path) {
            Ok(stream) => break stream,
            Err(e) => {
                if Instant::now() >= deadline {
                    debug!(error = %e, "return channel never became available");
                    return Err(BridgeError::ChannelTimeout {
                        name: name.to_string(),
                        timeout,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    };

    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large for a frame"))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + bytes.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(bytes);

    stream.write_all(&frame)?;
    stream.flush()?;
    Ok(())
}
