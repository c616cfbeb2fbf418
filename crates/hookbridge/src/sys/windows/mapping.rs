//! Named file mapping backed by the paging file

use std::io;

use windows::Win32::Foundation::{
    CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE, INVALID_HANDLE_VALUE,
};
use windows::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
    PAGE_READWRITE, UnmapViewOfFile,
};
use windows::core::PCWSTR;

use super::security::LowIntegrityDescriptor;
use super::wide;

/// A read/write view of a named mapping in the session namespace
pub(crate) struct MappedRegion {
    handle: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
}

fn to_io(e: windows::core::Error) -> io::Error {
    io::Error::other(e)
}

impl MappedRegion {
    /// Open `Local\<name>`, creating it with `len` bytes if it does not exist yet
    ///
    /// Returns whether this call created the mapping.
    pub(crate) fn open_or_create(name: &str, len: usize) -> io::Result<(Self, bool)> {
        let name = wide(&format!("Local\\{name}"));
        let descriptor = LowIntegrityDescriptor::new().map_err(to_io)?;
        let sa = descriptor.attributes();

        unsafe {
            let handle = CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                Some(&sa),
                PAGE_READWRITE,
                0,
                len as u32,
                PCWSTR(name.as_ptr()),
            )
            .map_err(to_io)?;
            let created = GetLastError() != ERROR_ALREADY_EXISTS;

            let view = MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len);
            if view.Value.is_null() {
                let err = io::Error::last_os_error();
                let _ = CloseHandle(handle);
                return Err(err);
            }

            Ok((Self { handle, view }, created))
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.view.Value.cast::<u8>()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.handle);
        }
    }
}
