//! Windows backends: `SetWindowsHookExW` registrations, `WM_COPYDATA`
//! through a message-only window, a named file mapping for the mailbox and an
//! overlapped named pipe for the return channel.

mod hook;
mod mapping;
mod pipe;
mod security;
mod window;

pub(crate) use hook::WindowsHookInstaller;
pub(crate) use mapping::MappedRegion;
pub(crate) use pipe::{PipeServer, write_message};
pub(crate) use window::CopyDataTransport;

/// NUL-terminated UTF-16 copy of `s`
pub(crate) fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}
