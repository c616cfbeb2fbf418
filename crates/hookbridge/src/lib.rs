//! Cross-process data exchange for injected hook procedures
//!
//! A controlling process installs a hook procedure exported by this module
//! into a target process's message loop and exchanges bounded payloads with it.
//!
//! # Architecture
//!
//! Four components, wired together by [`HookBridge`]:
//! - [`SharedMailbox`] - single-slot shared memory region staging one payload
//! - [`CallbackRegistrar`] - installs and removes the hook registration
//! - [`OutboundNotifier`] - synchronous `WM_COPYDATA` push into the target
//! - [`ReturnChannel`] - named, message-framed channel the target writes back on
//!
//! # Exchange choreography
//!
//! The mailbox is not locked. One side writes, the other reads, strictly
//! alternating; the synchronous [`HookBridge::push_data`] call is the usual
//! handoff barrier between the two.

#![deny(missing_docs)]

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod notifier;
pub mod registrar;
pub mod settings;
mod sys;

pub use bridge::*;
pub use channel::*;
pub use config::*;
pub use error::*;
pub use mailbox::*;
pub use notifier::*;
pub use registrar::*;
pub use settings::*;

/// Physical size of the mailbox storage, and the default capacity ceiling
pub const MAX_BUFFER_SIZE: usize = 32 * 1024; // 32KB

/// Size of a single read from the return channel
pub const NAMED_PIPE_BUFFER_SIZE: usize = 1024;

/// How long the target side waits for the return channel to appear
pub const PIPE_CONNECTION_TIMEOUT_MS: u64 = 5000;

/// Well-known return channel name shared by every bridge instance
pub const DEFAULT_CHANNEL_NAME: &str = "hookbridge";

/// Well-known shared mailbox name
pub const DEFAULT_MAILBOX_NAME: &str = "hookbridge-mailbox";

/// SACL granting low-integrity processes write access to the bridge objects
pub const LOW_INTEGRITY_SDDL_SACL: &str = "S:(ML;;NW;;;LW)";

/// `dwData` tag carried by every outbound `WM_COPYDATA` envelope
pub const COPY_DATA_TAG: usize = 1;

/// Magic value identifying an initialised mailbox region
pub const MAILBOX_MAGIC: u32 = 0x4842_4D42; // "HBMB"
