//! Error types for bridge operations

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::settings::HookClass;

/// Error type for bridge operations
///
/// Most of these never reach the caller of [`HookBridge`](crate::HookBridge):
/// initialization and teardown failures are logged and swallowed there. The
/// component types return them so the failure reason is not lost.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The named hook procedure is not exported by the hosting module
    #[error("unable to get address of hook procedure named `{name}`: {reason}")]
    Resolution {
        /// Entry point that was looked up
        name: String,
        /// Why the lookup failed
        reason: String,
    },

    /// The interception could not be bound
    #[error("unable to set {class:?} hook: {reason}")]
    Installation {
        /// Requested event class
        class: HookClass,
        /// Why the platform refused
        reason: String,
    },

    /// Removing an installed hook failed
    #[error("unable to remove hook: {0}")]
    Uninstall(String),

    /// An integer that names no known hook class
    #[error("unknown hook class {0}")]
    UnknownHookClass(i32),

    /// A name that matches no known hook class
    #[error("unknown hook class `{0}`")]
    UnknownHookClassName(String),

    /// The controller side of the return channel could not be created
    #[error("failed to create return channel `{name}`: {source}")]
    ChannelCreation {
        /// Channel name
        name: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The return channel did not become available in time
    #[error("return channel `{name}` not available within {timeout:?}")]
    ChannelTimeout {
        /// Channel name
        name: String,
        /// How long the writer waited
        timeout: Duration,
    },

    /// Reading or writing the return channel failed
    #[error("return channel I/O failed: {0}")]
    ChannelIo(#[from] io::Error),

    /// The transient notification sender could not be created
    #[error("notification sender unavailable: {0}")]
    Notifier(String),

    /// The shared mailbox region could not be opened
    #[error("failed to open shared mailbox `{name}`: {source}")]
    Mailbox {
        /// Mailbox name
        name: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_message_names_procedure() {
        let err = BridgeError::Resolution {
            name: "CallWndProcHook".to_string(),
            reason: "not exported".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unable to get address of hook procedure named `CallWndProcHook`: not exported"
        );
    }

    #[test]
    fn test_channel_creation_keeps_source() {
        use std::error::Error as _;

        let err = BridgeError::ChannelCreation {
            name: "hookbridge".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.source().is_some());
    }
}
