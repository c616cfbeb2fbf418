//! Hook settings handed to the bridge by the controller

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::BridgeError;

/// Classes of events a hook procedure can intercept (`WH_*` identifiers)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookClass {
    /// Messages about to be processed by a dialog, message box or menu (`WH_MSGFILTER`)
    MsgFilter = -1,
    /// Input recorded from the system message queue (`WH_JOURNALRECORD`)
    JournalRecord = 0,
    /// Messages previously recorded by a journal record hook (`WH_JOURNALPLAYBACK`)
    JournalPlayback = 1,
    /// Keystroke messages (`WH_KEYBOARD`)
    Keyboard = 2,
    /// Messages posted to a message queue (`WH_GETMESSAGE`)
    GetMessage = 3,
    /// Messages before the window procedure sees them (`WH_CALLWNDPROC`)
    CallWndProc = 4,
    /// Window lifecycle and activation notifications (`WH_CBT`)
    Cbt = 5,
    /// System-wide message filter (`WH_SYSMSGFILTER`)
    SysMsgFilter = 6,
    /// Mouse messages (`WH_MOUSE`)
    Mouse = 7,
    /// Calls to other hook procedures (`WH_DEBUG`)
    Debug = 9,
    /// Shell notifications (`WH_SHELL`)
    Shell = 10,
    /// Foreground thread about to go idle (`WH_FOREGROUNDIDLE`)
    ForegroundIdle = 11,
    /// Messages after the window procedure handled them (`WH_CALLWNDPROCRET`)
    CallWndProcRet = 12,
    /// Low-level keyboard input (`WH_KEYBOARD_LL`)
    KeyboardLowLevel = 13,
    /// Low-level mouse input (`WH_MOUSE_LL`)
    MouseLowLevel = 14,
}

impl HookClass {
    const ALL: [HookClass; 15] = [
        HookClass::MsgFilter,
        HookClass::JournalRecord,
        HookClass::JournalPlayback,
        HookClass::Keyboard,
        HookClass::GetMessage,
        HookClass::CallWndProc,
        HookClass::Cbt,
        HookClass::SysMsgFilter,
        HookClass::Mouse,
        HookClass::Debug,
        HookClass::Shell,
        HookClass::ForegroundIdle,
        HookClass::CallWndProcRet,
        HookClass::KeyboardLowLevel,
        HookClass::MouseLowLevel,
    ];

    /// Raw `WH_*` identifier
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Name used in configuration files and on the command line
    pub fn name(self) -> &'static str {
        match self {
            HookClass::MsgFilter => "msg_filter",
            HookClass::JournalRecord => "journal_record",
            HookClass::JournalPlayback => "journal_playback",
            HookClass::Keyboard => "keyboard",
            HookClass::GetMessage => "get_message",
            HookClass::CallWndProc => "call_wnd_proc",
            HookClass::Cbt => "cbt",
            HookClass::SysMsgFilter => "sys_msg_filter",
            HookClass::Mouse => "mouse",
            HookClass::Debug => "debug",
            HookClass::Shell => "shell",
            HookClass::ForegroundIdle => "foreground_idle",
            HookClass::CallWndProcRet => "call_wnd_proc_ret",
            HookClass::KeyboardLowLevel => "keyboard_low_level",
            HookClass::MouseLowLevel => "mouse_low_level",
        }
    }
}

impl TryFrom<i32> for HookClass {
    type Error = BridgeError;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        HookClass::ALL
            .into_iter()
            .find(|class| class.id() == id)
            .ok_or(BridgeError::UnknownHookClass(id))
    }
}

/// Accepts either the configuration name or the raw integer identifier
impl FromStr for HookClass {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<i32>() {
            return HookClass::try_from(id);
        }
        let wanted = s.to_ascii_lowercase().replace('-', "_");
        HookClass::ALL
            .into_iter()
            .find(|class| class.name() == wanted)
            .ok_or_else(|| BridgeError::UnknownHookClassName(s.to_string()))
    }
}

impl fmt::Display for HookClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether the target gets a return path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationMode {
    /// Controller to target only
    #[default]
    OneWay,
    /// Additionally opens a [`ReturnChannel`](crate::ReturnChannel) for replies
    TwoWay,
}

/// Opaque handle of the target window
///
/// The hook is bound to the thread that owns this window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct ContextHandle(isize);

impl ContextHandle {
    /// Wrap a raw window handle value
    pub fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    /// Raw window handle value
    pub fn as_raw(self) -> isize {
        self.0
    }

    #[cfg(windows)]
    pub(crate) fn as_hwnd(self) -> windows::Win32::Foundation::HWND {
        windows::Win32::Foundation::HWND(self.0 as *mut std::ffi::c_void)
    }
}

/// Parses decimal or `0x`-prefixed hexadecimal handle values
impl FromStr for ContextHandle {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => isize::from_str_radix(hex, 16)?,
            None => s.parse::<isize>()?,
        };
        Ok(Self(raw))
    }
}

/// What to install and how to talk to it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HookSettings {
    /// Exported entry point of the hook procedure
    pub callback_name: String,
    /// Event class the procedure intercepts
    pub callback_class: HookClass,
    /// Target window, or `None` for every thread on the desktop
    #[serde(default)]
    pub target: Option<ContextHandle>,
    /// Whether a return channel is opened
    #[serde(default)]
    pub mode: CommunicationMode,
}

impl HookSettings {
    /// Process-wide, one-way settings for `callback_name`
    pub fn new(callback_name: impl Into<String>, callback_class: HookClass) -> Self {
        Self {
            callback_name: callback_name.into(),
            callback_class,
            target: None,
            mode: CommunicationMode::OneWay,
        }
    }

    /// Bind the hook to the thread owning `target`
    pub fn with_target(mut self, target: ContextHandle) -> Self {
        self.target = Some(target);
        self
    }

    /// Select the communication mode
    pub fn with_mode(mut self, mode: CommunicationMode) -> Self {
        self.mode = mode;
        self
    }
}
