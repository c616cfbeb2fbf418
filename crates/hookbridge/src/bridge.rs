//! Controller-facing bridge
//!
//! [`HookBridge`] owns one of each component. Failures while initializing or
//! tearing down are logged and swallowed, so a bridge is always usable in
//! whatever state it reached: without a return channel every pull is empty,
//! without a registration every push is refused.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::channel::{ReturnChannel, write_to_channel};
use crate::config::BridgeConfig;
use crate::mailbox::SharedMailbox;
use crate::notifier::{NotificationPayload, NotifyTransport, OutboundNotifier, default_transport};
use crate::registrar::{CallbackRegistrar, HookInstaller, default_installer};
use crate::settings::{CommunicationMode, ContextHandle, HookSettings};

/// Controller side of a hook bridge
pub struct HookBridge {
    config: BridgeConfig,
    registrar: CallbackRegistrar,
    notifier: OutboundNotifier,
    mailbox: SharedMailbox,
    channel: Option<ReturnChannel>,
    mode: CommunicationMode,
    target: Option<ContextHandle>,
    disposed: bool,
}

impl HookBridge {
    /// Bridge over the platform backends
    ///
    /// Falls back to a private mailbox, with a warning, when the shared
    /// region cannot be opened.
    pub fn new(config: BridgeConfig) -> Self {
        let mailbox = SharedMailbox::open(&config.mailbox_name).unwrap_or_else(|e| {
            warn!(error = %e, "shared mailbox unavailable, using a private one");
            SharedMailbox::anonymous()
        });
        let installer = default_installer(&config);
        Self::with_backends(config, installer, default_transport(), mailbox)
    }

    /// Bridge over explicit backends
    pub fn with_backends(
        config: BridgeConfig,
        installer: Box<dyn HookInstaller>,
        transport: Box<dyn NotifyTransport>,
        mailbox: SharedMailbox,
    ) -> Self {
        Self {
            config,
            registrar: CallbackRegistrar::new(installer),
            notifier: OutboundNotifier::new(transport),
            mailbox,
            channel: None,
            mode: CommunicationMode::OneWay,
            target: None,
            disposed: false,
        }
    }

    /// Install the hook described by `settings`
    ///
    /// Releases the channel and hook an earlier call acquired; whatever is
    /// staged in the mailbox stays. With [`CommunicationMode::TwoWay`] the
    /// return channel is opened before the hook, so the target can connect as
    /// soon as the hook procedure runs.
    pub fn initialize(&mut self, settings: &HookSettings) {
        trace!(procedure = %settings.callback_name, mode = ?settings.mode, "initialize");
        self.release();
        self.disposed = false;

        self.mode = settings.mode;
        self.target = settings.target;

        if settings.mode == CommunicationMode::TwoWay {
            match ReturnChannel::open(&self.config) {
                Ok(channel) => self.channel = Some(channel),
                Err(e) => warn!(error = %e, "return channel unavailable, pulls will be empty"),
            }
        }

        match self.registrar.install(settings) {
            Ok(registration) => {
                info!(handle = registration.handle().as_raw(), "hook procedure installed")
            }
            Err(e) => warn!(error = %e, "hook procedure not installed"),
        }
    }

    /// Clear the mailbox, close the channel and remove the hook
    ///
    /// Only the first call after an initialization does anything.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        trace!("dispose");

        self.mailbox.clear();
        self.release();
    }

    fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!(channel = channel.name(), "closing return channel");
        }
        self.registrar.uninstall();
    }

    /// Push `bytes` to the target window
    ///
    /// Returns `false` when no hook is installed or the sender could not be
    /// created.
    pub fn push_data(&self, bytes: &[u8]) -> bool {
        self.push(&NotificationPayload::new(bytes))
    }

    /// Push `text` to the target window as UTF-16LE
    pub fn push_wide(&self, text: &str) -> bool {
        self.push(&NotificationPayload::from_wide(text))
    }

    fn push(&self, payload: &NotificationPayload) -> bool {
        if !self.registrar.is_installed() {
            warn!("no hook procedure has been set");
            return false;
        }
        self.notifier
            .push(self.target, payload, self.mailbox.capacity())
    }

    /// Wait for the target's reply, bounded by the configured pull timeout
    pub fn pull_data(&mut self) -> Vec<u8> {
        self.pull(self.config.pull_timeout())
    }

    /// Wait at most `timeout` for the target's reply
    pub fn pull_data_within(&mut self, timeout: Duration) -> Vec<u8> {
        self.pull(Some(timeout))
    }

    fn pull(&mut self, timeout: Option<Duration>) -> Vec<u8> {
        match self.channel.as_mut() {
            Some(channel) => channel.pull(timeout),
            None => {
                debug!(mode = ?self.mode, "no return channel to pull from");
                Vec::new()
            }
        }
    }

    /// Shared mailbox ceiling
    pub fn data_buffer_size(&self) -> usize {
        self.mailbox.capacity()
    }

    /// Set the shared mailbox ceiling
    pub fn set_data_buffer_size(&mut self, size: usize) {
        self.mailbox.set_capacity(size);
    }

    /// Stage `bytes` in the mailbox
    pub fn put_data(&mut self, bytes: &[u8]) {
        self.mailbox.put(bytes);
    }

    /// Take at least `requested` bytes from the mailbox
    pub fn get_data(&mut self, requested: usize) -> Vec<u8> {
        self.mailbox.get(requested)
    }

    /// Stage `text` in the mailbox as UTF-16LE
    pub fn put_wide_data(&mut self, text: &str) {
        self.mailbox.put_wide(text);
    }

    /// Take UTF-16LE text from the mailbox
    pub fn get_wide_data(&mut self) -> String {
        self.mailbox.get_wide()
    }

    /// Whether a hook is installed
    pub fn is_installed(&self) -> bool {
        self.registrar.is_installed()
    }

    /// Mode of the last initialization
    pub fn mode(&self) -> CommunicationMode {
        self.mode
    }

    /// Whether a return channel is open
    pub fn has_return_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Configuration in use
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl Drop for HookBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for HookBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookBridge")
            .field("registrar", &self.registrar)
            .field("mailbox", &self.mailbox)
            .field("channel", &self.channel)
            .field("mode", &self.mode)
            .field("target", &self.target)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

/// Target side: send `bytes` back to the controller
///
/// Uses the environment-adjusted default configuration. Failures are logged.
pub fn write_data_to_pipe(process_id: u32, bytes: &[u8]) {
    let config = BridgeConfig::load(None).unwrap_or_else(|e| {
        warn!(error = %e, "invalid bridge configuration, using defaults");
        BridgeConfig::default()
    });
    write_to_channel(&config, process_id, bytes);
}
