//! Security attributes admitting low-integrity peers

use std::ffi::c_void;

use windows::Win32::Foundation::{HLOCAL, LocalFree};
use windows::Win32::Security::Authorization::{
    ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
};
use windows::Win32::Security::{PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES};
use windows::core::{PCWSTR, Result};

use super::wide;
use crate::LOW_INTEGRITY_SDDL_SACL;

/// Security descriptor carrying a low mandatory label, freed on drop
pub(crate) struct LowIntegrityDescriptor {
    descriptor: PSECURITY_DESCRIPTOR,
}

impl LowIntegrityDescriptor {
    pub(crate) fn new() -> Result<Self> {
        let sddl = wide(LOW_INTEGRITY_SDDL_SACL);
        let mut descriptor = PSECURITY_DESCRIPTOR::default();
        unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                PCWSTR(sddl.as_ptr()),
                SDDL_REVISION_1,
                &mut descriptor,
                None,
            )?;
        }
        Ok(Self { descriptor })
    }

    /// Attributes borrowing this descriptor; keep `self` alive while in use
    pub(crate) fn attributes(&self) -> SECURITY_ATTRIBUTES {
        SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: self.descriptor.0,
            bInheritHandle: false.into(),
        }
    }
}

impl Drop for LowIntegrityDescriptor {
    fn drop(&mut self) {
        if !self.descriptor.0.is_null() {
            unsafe {
                let _ = LocalFree(Some(HLOCAL(self.descriptor.0 as *mut c_void)));
            }
        }
    }
}
