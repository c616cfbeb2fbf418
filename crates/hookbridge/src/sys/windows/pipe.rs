//! Return channel over an overlapped, message-mode named pipe

use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_FILE_NOT_FOUND, ERROR_IO_PENDING, ERROR_MORE_DATA, ERROR_NO_DATA,
    ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED, GENERIC_READ, GENERIC_WRITE, HANDLE, WAIT_OBJECT_0,
    WIN32_ERROR,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_FLAG_OVERLAPPED, FILE_SHARE_NONE, OPEN_EXISTING,
    PIPE_ACCESS_DUPLEX, ReadFile, WriteFile,
};
use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_READMODE_MESSAGE,
    PIPE_TYPE_MESSAGE, PIPE_UNLIMITED_INSTANCES, PIPE_WAIT, SetNamedPipeHandleState,
};
use windows::Win32::System::Threading::{CreateEventW, INFINITE, WaitForSingleObject};
use windows::core::{Error, PCWSTR};

use super::security::LowIntegrityDescriptor;
use super::wide;
use crate::channel::{ChunkRead, MessageSource};
use crate::error::BridgeError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn pipe_path(name: &str) -> Vec<u16> {
    wide(&format!("\\\\.\\pipe\\{name}"))
}

fn is(e: &Error, code: WIN32_ERROR) -> bool {
    e.code() == code.to_hresult()
}

/// Owned kernel handle, closed on drop
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Controller end of the return channel
pub(crate) struct PipeServer {
    pipe: OwnedHandle,
    event: OwnedHandle,
    connected: bool,
}

// SAFETY: pipe and event handles carry no thread affinity
unsafe impl Send for PipeServer {}

impl PipeServer {
    pub(crate) fn create(name: &str, buffer_size: usize) -> Result<Self, BridgeError> {
        let creation = |source: io::Error| BridgeError::ChannelCreation {
            name: name.to_string(),
            source,
        };
        let path = pipe_path(name);
        let descriptor =
            LowIntegrityDescriptor::new().map_err(|e| creation(io::Error::other(e)))?;
        let sa = descriptor.attributes();

        unsafe {
            let pipe = CreateNamedPipeW(
                PCWSTR(path.as_ptr()),
                PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
                PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                buffer_size as u32,
                0,
                0,
                Some(&sa),
            );
            if pipe.is_invalid() {
                return Err(creation(io::Error::last_os_error()));
            }
            let pipe = OwnedHandle(pipe);

            let event = CreateEventW(None, true, false, PCWSTR::null())
                .map_err(|e| creation(io::Error::other(e)))?;

            Ok(Self {
                pipe,
                event: OwnedHandle(event),
                connected: false,
            })
        }
    }

    fn overlapped(&self) -> OVERLAPPED {
        OVERLAPPED {
            hEvent: self.event.0,
            ..Default::default()
        }
    }

    /// Wait for the target to connect; an existing connection counts
    pub(crate) fn wait_for_client(&mut self, timeout: Option<Duration>) -> bool {
        if self.connected {
            return true;
        }

        let mut overlapped = self.overlapped();
        unsafe {
            match ConnectNamedPipe(self.pipe.0, Some(&mut overlapped)) {
                Ok(()) => {}
                // A writer that already closed leaves its message buffered
                Err(e) if is(&e, ERROR_PIPE_CONNECTED) || is(&e, ERROR_NO_DATA) => {}
                Err(e) if is(&e, ERROR_IO_PENDING) => {
                    let millis = timeout.map_or(INFINITE, |t| {
                        t.as_millis().min(u128::from(INFINITE - 1)) as u32
                    });
                    if WaitForSingleObject(self.event.0, millis) != WAIT_OBJECT_0 {
                        debug!("no connection on return channel before timeout");
                        let _ = CancelIoEx(self.pipe.0, Some(&overlapped));
                        let mut ignored = 0u32;
                        let _ = GetOverlappedResult(self.pipe.0, &overlapped, &mut ignored, true);
                        return false;
                    }
                    let mut ignored = 0u32;
                    if let Err(e) =
                        GetOverlappedResult(self.pipe.0, &overlapped, &mut ignored, false)
                    {
                        warn!(error = %e, "return channel connection failed");
                        return false;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to wait for return channel connection");
                    return false;
                }
            }
        }

        self.connected = true;
        true
    }
}

impl MessageSource for PipeServer {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> ChunkRead {
        let mut overlapped = self.overlapped();
        let mut read = 0u32;

        let result = unsafe {
            match ReadFile(self.pipe.0, Some(buffer), None, Some(&mut overlapped)) {
                Err(e) if !is(&e, ERROR_IO_PENDING) && !is(&e, ERROR_MORE_DATA) => Err(e),
                // Completed, pending or partial: the overlapped result has the count
                _ => GetOverlappedResult(self.pipe.0, &overlapped, &mut read, true),
            }
        };

        match result {
            Ok(()) => ChunkRead::Complete(read as usize),
            Err(e) if is(&e, ERROR_MORE_DATA) => ChunkRead::Partial(read as usize),
            Err(e) => {
                debug!(error = %e, "return channel read failed");
                ChunkRead::Failed
            }
        }
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        if self.connected {
            unsafe {
                let _ = DisconnectNamedPipe(self.pipe.0);
            }
        }
    }
}

/// Connect to the controller's pipe and write `bytes` as one message
pub(crate) fn write_message(name: &str, timeout: Duration, bytes: &[u8]) -> Result<(), BridgeError> {
    let path = pipe_path(name);
    let deadline = Instant::now() + timeout;

    let pipe = loop {
        let opened = unsafe {
            CreateFileW(
                PCWSTR(path.as_ptr()),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_NONE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        };
        match opened {
            Ok(handle) => break OwnedHandle(handle),
            Err(e) if is(&e, ERROR_FILE_NOT_FOUND) || is(&e, ERROR_PIPE_BUSY) => {
                if Instant::now() >= deadline {
                    debug!(error = %e, "return channel never became available");
                    return Err(BridgeError::ChannelTimeout {
                        name: name.to_string(),
                        timeout,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(BridgeError::ChannelIo(io::Error::other(e))),
        }
    };

    unsafe {
        let mode = PIPE_READMODE_MESSAGE;
        SetNamedPipeHandleState(pipe.0, Some(&mode), None, None)
            .map_err(|e| BridgeError::ChannelIo(io::Error::other(e)))?;

        let mut written = 0u32;
        WriteFile(pipe.0, Some(bytes), Some(&mut written), None)
            .map_err(|e| BridgeError::ChannelIo(io::Error::other(e)))?;
        if written as usize != bytes.len() {
            return Err(BridgeError::ChannelIo(io::Error::new(
                io::ErrorKind::WriteZero,
                "short write to return channel",
            )));
        }
    }
    Ok(())
}
