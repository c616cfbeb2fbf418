//! Synchronous outbound notification into the target
//!
//! Each push wraps the payload in a `WM_COPYDATA` envelope and sends it from
//! a transient sender window. The call blocks until the target's handler
//! returns, which makes it the handoff point for the shared mailbox.

use std::ffi::c_void;

use tracing::{info, trace, warn};

use crate::COPY_DATA_TAG;
use crate::error::BridgeError;
use crate::mailbox::{SharedMailbox, encode_wide};
use crate::settings::ContextHandle;

/// Bytes delivered in one notification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationPayload {
    bytes: Vec<u8>,
}

impl NotificationPayload {
    /// Copy `bytes` into a payload
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// UTF-16LE encoding of `text`, no terminator
    pub fn from_wide(text: &str) -> Self {
        Self {
            bytes: encode_wide(text),
        }
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Take the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for NotificationPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// In-memory layout of a `WM_COPYDATA` envelope (`COPYDATASTRUCT`)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CopyDataEnvelope {
    /// Application tag, [`COPY_DATA_TAG`] for bridge payloads
    pub tag: usize,
    /// Payload length in bytes
    pub len: u32,
    /// Payload address in the receiving process
    pub data: *mut c_void,
}

/// Delivers one payload to the target and returns the handler's result code
pub trait NotifyTransport: Send {
    /// Blocks until the target handles the payload
    ///
    /// Fails only when the transient sender cannot be created.
    fn deliver(
        &self,
        target: Option<ContextHandle>,
        payload: &NotificationPayload,
    ) -> Result<isize, BridgeError>;
}

/// Transport for platforms without `WM_COPYDATA`
#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct UnsupportedTransport;

#[cfg(not(windows))]
impl NotifyTransport for UnsupportedTransport {
    fn deliver(
        &self,
        _target: Option<ContextHandle>,
        _payload: &NotificationPayload,
    ) -> Result<isize, BridgeError> {
        Err(BridgeError::Notifier(
            "WM_COPYDATA is unsupported on this platform".to_string(),
        ))
    }
}

/// Platform transport
pub fn default_transport() -> Box<dyn NotifyTransport> {
    #[cfg(windows)]
    {
        Box::new(crate::sys::windows::CopyDataTransport)
    }
    #[cfg(not(windows))]
    {
        Box::new(UnsupportedTransport)
    }
}

/// Pushes payloads through a [`NotifyTransport`]
pub struct OutboundNotifier {
    transport: Box<dyn NotifyTransport>,
}

impl OutboundNotifier {
    /// Notifier over `transport`
    pub fn new(transport: Box<dyn NotifyTransport>) -> Self {
        Self { transport }
    }

    /// Send `payload` to `target`
    ///
    /// A payload larger than `capacity` is still delivered in full, with a
    /// warning. Returns `false` only when the sender could not be created.
    pub fn push(
        &self,
        target: Option<ContextHandle>,
        payload: &NotificationPayload,
        capacity: usize,
    ) -> bool {
        trace!(len = payload.len(), ?target, "push");
        if payload.len() > capacity {
            warn!(
                len = payload.len(),
                capacity, "payload is larger than the shared mailbox"
            );
        }

        match self.transport.deliver(target, payload) {
            Ok(result) => {
                info!(result, "WM_COPYDATA delivered");
                true
            }
            Err(e) => {
                warn!(error = %e, "unable to create notification sender");
                false
            }
        }
    }

    /// Send `text` as UTF-16LE
    pub fn push_wide(&self, target: Option<ContextHandle>, text: &str, capacity: usize) -> bool {
        self.push(target, &NotificationPayload::from_wide(text), capacity)
    }
}

impl std::fmt::Debug for OutboundNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundNotifier").finish_non_exhaustive()
    }
}

/// Target side: decode the envelope passed as a `WM_COPYDATA` `lParam`
///
/// Returns `None` for a null envelope or a foreign tag.
///
/// # Safety
/// `lparam` must be zero or point to a valid envelope whose `data` spans
/// `len` bytes, as during the handling of `WM_COPYDATA`.
pub unsafe fn payload_from_copy_data(lparam: isize) -> Option<NotificationPayload> {
    let envelope = lparam as *const CopyDataEnvelope;
    if envelope.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller
    let envelope = unsafe { &*envelope };
    if envelope.tag != COPY_DATA_TAG {
        return None;
    }
    if envelope.len == 0 || envelope.data.is_null() {
        return Some(NotificationPayload::default());
    }
    // SAFETY: data spans len bytes per the caller's guarantee
    let bytes =
        unsafe { std::slice::from_raw_parts(envelope.data.cast::<u8>(), envelope.len as usize) };
    Some(NotificationPayload::new(bytes))
}

/// Target side: stage an incoming `WM_COPYDATA` payload in `mailbox`
///
/// Returns whether a bridge payload was found.
///
/// # Safety
/// Same contract as [`payload_from_copy_data`].
pub unsafe fn copy_data_to_mailbox(mailbox: &mut SharedMailbox, lparam: isize) -> bool {
    // SAFETY: forwarded from the caller
    match unsafe { payload_from_copy_data(lparam) } {
        Some(payload) => {
            mailbox.put(payload.as_bytes());
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records deliveries and answers with a fixed result
    #[derive(Clone, Default)]
    struct RecordingTransport {
        delivered: Arc<Mutex<Vec<(Option<ContextHandle>, Vec<u8>)>>>,
        fail: bool,
    }

    impl NotifyTransport for RecordingTransport {
        fn deliver(
            &self,
            target: Option<ContextHandle>,
            payload: &NotificationPayload,
        ) -> Result<isize, BridgeError> {
            if self.fail {
                return Err(BridgeError::Notifier("no window".to_string()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((target, payload.as_bytes().to_vec()));
            Ok(0)
        }
    }

    fn envelope_for(bytes: &mut [u8]) -> CopyDataEnvelope {
        CopyDataEnvelope {
            tag: COPY_DATA_TAG,
            len: bytes.len() as u32,
            data: bytes.as_mut_ptr().cast(),
        }
    }

    #[test]
    fn test_push_delivers_payload() {
        let transport = RecordingTransport::default();
        let notifier = OutboundNotifier::new(Box::new(transport.clone()));
        let target = Some(ContextHandle::from_raw(0x2a));

        assert!(notifier.push(target, &NotificationPayload::new(b"go"), 1024));

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.as_slice(), &[(target, b"go".to_vec())]);
    }

    #[test]
    fn test_push_oversized_payload_still_delivered() {
        let transport = RecordingTransport::default();
        let notifier = OutboundNotifier::new(Box::new(transport.clone()));

        let large = vec![0x55u8; 4096];
        assert!(notifier.push(None, &NotificationPayload::new(&large), 1024));
        assert_eq!(transport.delivered.lock().unwrap()[0].1.len(), 4096);
    }

    #[test]
    fn test_push_fails_without_sender() {
        let notifier = OutboundNotifier::new(Box::new(RecordingTransport {
            fail: true,
            ..Default::default()
        }));
        assert!(!notifier.push(None, &NotificationPayload::new(b"x"), 1024));
    }

    #[test]
    fn test_push_wide_encodes_utf16() {
        let transport = RecordingTransport::default();
        let notifier = OutboundNotifier::new(Box::new(transport.clone()));

        assert!(notifier.push_wide(None, "ok", 1024));
        assert_eq!(transport.delivered.lock().unwrap()[0].1, vec![b'o', 0, b'k', 0]);
    }

    #[test]
    fn test_payload_from_copy_data() {
        let mut bytes = *b"parameters";
        let envelope = envelope_for(&mut bytes);

        let payload = unsafe { payload_from_copy_data(&envelope as *const _ as isize) }.unwrap();
        assert_eq!(payload.as_bytes(), b"parameters");
        assert_eq!(payload.len(), 10);
    }

    #[test]
    fn test_payload_from_copy_data_rejects_foreign_tag_and_null() {
        let mut bytes = *b"other";
        let envelope = CopyDataEnvelope {
            tag: 7,
            ..envelope_for(&mut bytes)
        };
        assert!(unsafe { payload_from_copy_data(&envelope as *const _ as isize) }.is_none());
        assert!(unsafe { payload_from_copy_data(0) }.is_none());
    }

    #[test]
    fn test_copy_data_to_mailbox_stages_payload() {
        let mut bytes = *b"staged";
        let envelope = envelope_for(&mut bytes);
        let mut mailbox = SharedMailbox::anonymous();

        assert!(unsafe { copy_data_to_mailbox(&mut mailbox, &envelope as *const _ as isize) });
        assert_eq!(mailbox.size(), 6);
        assert_eq!(mailbox.get(6), b"staged");
    }

    #[test]
    fn test_envelope_matches_copydatastruct_layout() {
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<CopyDataEnvelope>(), 24);
        #[cfg(target_pointer_width = "32")]
        assert_eq!(std::mem::size_of::<CopyDataEnvelope>(), 12);
    }
}
