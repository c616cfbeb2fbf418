//! `WM_COPYDATA` delivery from a transient message-only window

use std::ffi::c_void;
use std::sync::OnceLock;

use tracing::trace;
use windows::Win32::Foundation::{
    ERROR_CLASS_ALREADY_EXISTS, GetLastError, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM,
};
use windows::Win32::System::DataExchange::COPYDATASTRUCT;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, HWND_MESSAGE, RegisterClassW, SendMessageW,
    WINDOW_EX_STYLE, WINDOW_STYLE, WM_COPYDATA, WNDCLASSW,
};
use windows::core::PCWSTR;

use super::wide;
use crate::COPY_DATA_TAG;
use crate::error::BridgeError;
use crate::notifier::{NotificationPayload, NotifyTransport};
use crate::settings::ContextHandle;

const SENDER_CLASS_NAME: &str = "HookBridgeSender";

unsafe extern "system" fn sender_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

/// Registered class name, registered once per process
fn sender_class(instance: HINSTANCE) -> Result<&'static [u16], String> {
    static CLASS: OnceLock<Result<Vec<u16>, String>> = OnceLock::new();

    CLASS
        .get_or_init(|| {
            let name = wide(SENDER_CLASS_NAME);
            let class = WNDCLASSW {
                lpfnWndProc: Some(sender_window_proc),
                hInstance: instance,
                lpszClassName: PCWSTR(name.as_ptr()),
                ..Default::default()
            };
            let atom = unsafe { RegisterClassW(&class) };
            if atom == 0 {
                let err = unsafe { GetLastError() };
                if err != ERROR_CLASS_ALREADY_EXISTS {
                    return Err(format!("RegisterClassW failed: {err:?}"));
                }
            }
            Ok(name)
        })
        .as_ref()
        .map(Vec::as_slice)
        .map_err(|e| e.clone())
}

/// Message-only window destroyed on drop
struct SenderWindow(HWND);

impl SenderWindow {
    fn create() -> Result<Self, String> {
        unsafe {
            let module = GetModuleHandleW(PCWSTR::null())
                .map_err(|e| format!("GetModuleHandleW failed: {e}"))?;
            let instance = HINSTANCE(module.0);
            let class = sender_class(instance)?;

            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE(0),
                PCWSTR(class.as_ptr()),
                PCWSTR::null(),
                WINDOW_STYLE(0),
                0,
                0,
                0,
                0,
                Some(HWND_MESSAGE),
                None,
                Some(instance),
                None,
            )
            .map_err(|e| format!("CreateWindowExW failed: {e}"))?;
            Ok(Self(hwnd))
        }
    }
}

impl Drop for SenderWindow {
    fn drop(&mut self) {
        unsafe {
            let _ = DestroyWindow(self.0);
        }
    }
}

/// Sends each payload as a synchronous `WM_COPYDATA`
pub(crate) struct CopyDataTransport;

impl NotifyTransport for CopyDataTransport {
    fn deliver(
        &self,
        target: Option<ContextHandle>,
        payload: &NotificationPayload,
    ) -> Result<isize, BridgeError> {
        let sender = SenderWindow::create().map_err(BridgeError::Notifier)?;
        let target = target.unwrap_or(ContextHandle::from_raw(0));

        let envelope = COPYDATASTRUCT {
            dwData: COPY_DATA_TAG,
            cbData: payload.len() as u32,
            lpData: payload.as_bytes().as_ptr() as *mut c_void,
        };

        trace!(target = target.as_raw(), len = payload.len(), "sending WM_COPYDATA");
        // Blocks until the target's handler returns; the envelope outlives the call
        let result = unsafe {
            SendMessageW(
                target.as_hwnd(),
                WM_COPYDATA,
                Some(WPARAM(sender.0.0 as usize)),
                Some(LPARAM(&envelope as *const COPYDATASTRUCT as isize)),
            )
        };
        Ok(result.0)
    }
}
