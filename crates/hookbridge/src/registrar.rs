//! Hook registration lifecycle

use tracing::{trace, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::settings::{CommunicationMode, ContextHandle, HookClass, HookSettings};

/// Opaque handle returned by a [`HookInstaller`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(isize);

impl HookHandle {
    /// Wrap a raw platform handle
    pub fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    /// Raw platform handle
    pub fn as_raw(self) -> isize {
        self.0
    }
}

/// An installed hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRegistration {
    handle: HookHandle,
    target: Option<ContextHandle>,
    mode: CommunicationMode,
}

impl HookRegistration {
    /// Platform handle
    pub fn handle(&self) -> HookHandle {
        self.handle
    }

    /// Window whose thread the hook is bound to
    pub fn target(&self) -> Option<ContextHandle> {
        self.target
    }

    /// Communication mode requested at install time
    pub fn mode(&self) -> CommunicationMode {
        self.mode
    }
}

/// Binds and unbinds hook procedures
pub trait HookInstaller: Send {
    /// Resolve `name` and bind it for `class`, to the thread owning `target` or process-wide
    fn install(
        &self,
        name: &str,
        class: HookClass,
        target: Option<ContextHandle>,
    ) -> Result<HookHandle, BridgeError>;

    /// Remove a binding made by [`install`](Self::install)
    fn uninstall(&self, handle: HookHandle) -> Result<(), BridgeError>;
}

/// Installer for platforms without message hooks
#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct UnsupportedInstaller;

#[cfg(not(windows))]
impl HookInstaller for UnsupportedInstaller {
    fn install(
        &self,
        _name: &str,
        class: HookClass,
        _target: Option<ContextHandle>,
    ) -> Result<HookHandle, BridgeError> {
        Err(BridgeError::Installation {
            class,
            reason: "interception unsupported on this platform".to_string(),
        })
    }

    fn uninstall(&self, _handle: HookHandle) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Platform installer resolving procedures in `config.callback_module`
pub fn default_installer(config: &BridgeConfig) -> Box<dyn HookInstaller> {
    #[cfg(windows)]
    {
        Box::new(crate::sys::windows::WindowsHookInstaller::new(
            config.callback_module.clone(),
        ))
    }
    #[cfg(not(windows))]
    {
        let _ = config;
        Box::new(UnsupportedInstaller)
    }
}

/// Owns at most one [`HookRegistration`]
pub struct CallbackRegistrar {
    installer: Box<dyn HookInstaller>,
    registration: Option<HookRegistration>,
}

impl CallbackRegistrar {
    /// Registrar over `installer`, nothing installed
    pub fn new(installer: Box<dyn HookInstaller>) -> Self {
        Self {
            installer,
            registration: None,
        }
    }

    /// Install the hook described by `settings`
    ///
    /// Any previous registration is removed first.
    pub fn install(&mut self, settings: &HookSettings) -> Result<&HookRegistration, BridgeError> {
        trace!(
            procedure = %settings.callback_name,
            class = %settings.callback_class,
            target = ?settings.target,
            "install"
        );
        self.uninstall();

        let handle = self.installer.install(
            &settings.callback_name,
            settings.callback_class,
            settings.target,
        )?;
        Ok(self.registration.insert(HookRegistration {
            handle,
            target: settings.target,
            mode: settings.mode,
        }))
    }

    /// Remove the registration, if any
    ///
    /// The registration is forgotten even when the platform call fails.
    pub fn uninstall(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        trace!(handle = registration.handle.as_raw(), "uninstall");
        if let Err(e) = self.installer.uninstall(registration.handle) {
            warn!(error = %e, "failed to remove hook");
        }
    }

    /// Current registration
    pub fn registration(&self) -> Option<&HookRegistration> {
        self.registration.as_ref()
    }

    /// Whether a hook is installed
    pub fn is_installed(&self) -> bool {
        self.registration.is_some()
    }
}

impl std::fmt::Debug for CallbackRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistrar")
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeInstaller {
        installs: Arc<AtomicUsize>,
        removed: Arc<Mutex<Vec<HookHandle>>>,
        fail_install: bool,
        fail_uninstall: bool,
    }

    impl HookInstaller for FakeInstaller {
        fn install(
            &self,
            name: &str,
            _class: HookClass,
            _target: Option<ContextHandle>,
        ) -> Result<HookHandle, BridgeError> {
            if self.fail_install {
                return Err(BridgeError::Resolution {
                    name: name.to_string(),
                    reason: "not exported".to_string(),
                });
            }
            let n = self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(HookHandle::from_raw(0x1000 + n as isize))
        }

        fn uninstall(&self, handle: HookHandle) -> Result<(), BridgeError> {
            self.removed.lock().unwrap().push(handle);
            if self.fail_uninstall {
                return Err(BridgeError::Uninstall("gone".to_string()));
            }
            Ok(())
        }
    }

    fn settings() -> HookSettings {
        HookSettings::new("CallWndProcHook", HookClass::CallWndProc)
            .with_target(ContextHandle::from_raw(0x77))
            .with_mode(CommunicationMode::TwoWay)
    }

    #[test]
    fn test_install_records_registration() {
        let installer = FakeInstaller::default();
        let mut registrar = CallbackRegistrar::new(Box::new(installer));

        let registration = registrar.install(&settings()).unwrap();
        assert_eq!(registration.handle(), HookHandle::from_raw(0x1000));
        assert_eq!(registration.target(), Some(ContextHandle::from_raw(0x77)));
        assert_eq!(registration.mode(), CommunicationMode::TwoWay);
        assert!(registrar.is_installed());
    }

    #[test]
    fn test_failed_install_leaves_nothing() {
        let installer = FakeInstaller {
            fail_install: true,
            ..Default::default()
        };
        let mut registrar = CallbackRegistrar::new(Box::new(installer));

        assert!(matches!(
            registrar.install(&settings()),
            Err(BridgeError::Resolution { .. })
        ));
        assert!(!registrar.is_installed());
        assert!(registrar.registration().is_none());
    }

    #[test]
    fn test_uninstall_is_idempotent() {
        let installer = FakeInstaller::default();
        let removed = installer.removed.clone();
        let mut registrar = CallbackRegistrar::new(Box::new(installer));

        registrar.install(&settings()).unwrap();
        registrar.uninstall();
        registrar.uninstall();

        assert_eq!(removed.lock().unwrap().len(), 1);
        assert!(!registrar.is_installed());
    }

    #[test]
    fn test_uninstall_failure_still_clears() {
        let installer = FakeInstaller {
            fail_uninstall: true,
            ..Default::default()
        };
        let mut registrar = CallbackRegistrar::new(Box::new(installer));

        registrar.install(&settings()).unwrap();
        registrar.uninstall();
        assert!(!registrar.is_installed());
    }

    #[test]
    fn test_reinstall_removes_previous() {
        let installer = FakeInstaller::default();
        let removed = installer.removed.clone();
        let mut registrar = CallbackRegistrar::new(Box::new(installer));

        registrar.install(&settings()).unwrap();
        let second = registrar.install(&settings()).unwrap().handle();

        assert_eq!(second, HookHandle::from_raw(0x1001));
        assert_eq!(
            removed.lock().unwrap().as_slice(),
            &[HookHandle::from_raw(0x1000)]
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn test_unsupported_installer_fails() {
        let mut registrar = CallbackRegistrar::new(default_installer(&BridgeConfig::default()));
        assert!(matches!(
            registrar.install(&settings()),
            Err(BridgeError::Installation {
                class: HookClass::CallWndProc,
                ..
            })
        ));
    }
}
