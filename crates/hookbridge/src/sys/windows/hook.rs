//! Hook registration via `SetWindowsHookExW`

use std::ffi::{CString, c_void};

use tracing::debug;
use windows::Win32::Foundation::{HINSTANCE, HMODULE, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::{
    GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
    GetModuleHandleExW, GetModuleHandleW, GetProcAddress,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetWindowThreadProcessId, HHOOK, SetWindowsHookExW, UnhookWindowsHookEx, WINDOWS_HOOK_ID,
};
use windows::core::{PCSTR, PCWSTR};

use super::wide;
use crate::error::BridgeError;
use crate::registrar::{HookHandle, HookInstaller};
use crate::settings::{ContextHandle, HookClass};

type HookProcedure = unsafe extern "system" fn(i32, WPARAM, LPARAM) -> LRESULT;

/// Address inside this module, used to find the module handle
fn module_anchor() {}

/// Installs hook procedures exported by a loaded module
pub(crate) struct WindowsHookInstaller {
    module_name: Option<String>,
}

impl WindowsHookInstaller {
    /// `None` resolves procedures in the module hosting this crate
    pub(crate) fn new(module_name: Option<String>) -> Self {
        Self { module_name }
    }

    fn module(&self) -> Result<HMODULE, BridgeError> {
        let resolution = |reason: String| BridgeError::Resolution {
            name: self.module_name.clone().unwrap_or_default(),
            reason,
        };

        unsafe {
            match &self.module_name {
                Some(name) => {
                    let name = wide(name);
                    GetModuleHandleW(PCWSTR(name.as_ptr()))
                        .map_err(|e| resolution(format!("module not loaded: {e}")))
                }
                None => {
                    let mut module = HMODULE::default();
                    GetModuleHandleExW(
                        GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS
                            | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
                        PCWSTR(module_anchor as *const () as *const u16),
                        &mut module,
                    )
                    .map_err(|e| resolution(format!("hosting module not found: {e}")))?;
                    Ok(module)
                }
            }
        }
    }

    fn resolve(&self, module: HMODULE, name: &str) -> Result<HookProcedure, BridgeError> {
        let resolution = |reason: &str| BridgeError::Resolution {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let symbol = CString::new(name).map_err(|_| resolution("name contains NUL"))?;

        unsafe {
            let address = GetProcAddress(module, PCSTR(symbol.as_ptr().cast()))
                .ok_or_else(|| resolution("not exported"))?;
            let procedure =
                std::mem::transmute::<unsafe extern "system" fn() -> isize, HookProcedure>(address);
            Ok(procedure)
        }
    }
}

impl HookInstaller for WindowsHookInstaller {
    fn install(
        &self,
        name: &str,
        class: HookClass,
        target: Option<ContextHandle>,
    ) -> Result<HookHandle, BridgeError> {
        let module = self.module()?;
        let procedure = self.resolve(module, name)?;

        let thread_id = match target {
            Some(target) => {
                let thread_id = unsafe { GetWindowThreadProcessId(target.as_hwnd(), None) };
                if thread_id == 0 {
                    return Err(BridgeError::Installation {
                        class,
                        reason: format!("no thread owns window {:#x}", target.as_raw()),
                    });
                }
                thread_id
            }
            None => 0,
        };

        let hook = unsafe {
            SetWindowsHookExW(
                WINDOWS_HOOK_ID(class.id()),
                Some(procedure),
                Some(HINSTANCE(module.0)),
                thread_id,
            )
        }
        .map_err(|e| BridgeError::Installation {
            class,
            reason: e.to_string(),
        })?;

        debug!(procedure = name, %class, thread_id, "hook installed");
        Ok(HookHandle::from_raw(hook.0 as isize))
    }

    fn uninstall(&self, handle: HookHandle) -> Result<(), BridgeError> {
        // HHOOK is not a kernel handle; UnhookWindowsHookEx alone releases it
        unsafe { UnhookWindowsHookEx(HHOOK(handle.as_raw() as *mut c_void)) }
            .map_err(|e| BridgeError::Uninstall(e.to_string()))
    }
}
