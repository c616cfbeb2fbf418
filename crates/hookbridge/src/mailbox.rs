//! Single-slot shared mailbox
//!
//! Region layout (identical in every process that opens the same name):
//! ```text
//! ┌──────────────────┐
//! │ magic: u32       │  <- 0x48424D42 "HBMB"
//! │ capacity: u32    │  <- shared ceiling, settable by any process
//! │ size: u32        │  <- logical size of the staged payload
//! │ reserved: u32    │
//! │ data[32768]      │  <- payload followed by zero fill
//! └──────────────────┘
//! ```
//!
//! There is exactly one slot. A second `put` before the matching `get`
//! overwrites the first, and nothing guards against two writers: callers
//! keep to one producer and one consumer, strictly alternating.
//!
//! The size bookkeeping is kept bit-for-bit with existing hook procedures:
//! - `put` only shrinks the logical size when the payload is strictly
//!   smaller than the ceiling. A payload at or above the ceiling leaves the
//!   size at the ceiling and is truncated to it.
//! - `get` widens the requested length to the logical size, never narrows it.

use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::sys::MappedRegion;
use crate::{MAILBOX_MAGIC, MAX_BUFFER_SIZE};

#[repr(C)]
struct MailboxHeader {
    magic: AtomicU32,
    capacity: AtomicU32,
    size: AtomicU32,
    reserved: AtomicU32,
}

#[repr(C)]
struct MailboxLayout {
    header: MailboxHeader,
    data: [u8; MAX_BUFFER_SIZE],
}

/// How long an opener waits for the creator to finish initialising a region
const INIT_WAIT: Duration = Duration::from_millis(100);

/// Bytes occupied by a mailbox region
pub const MAILBOX_REGION_SIZE: usize = std::mem::size_of::<MailboxLayout>();

enum Backing {
    Heap,
    Mapped(#[allow(dead_code)] MappedRegion),
}

/// Handle to a mailbox region
pub struct SharedMailbox {
    layout: NonNull<MailboxLayout>,
    backing: Backing,
    name: Option<String>,
}

// SAFETY: the region is either owned by this handle (heap) or a process-wide
// mapping that stays valid until the handle drops. All access goes through
// &mut self or atomics.
unsafe impl Send for SharedMailbox {}

impl SharedMailbox {
    /// Private in-process mailbox with the shared layout
    pub fn anonymous() -> Self {
        // SAFETY: an all-zero MailboxLayout is valid (atomics and bytes)
        let boxed = unsafe { Box::<MailboxLayout>::new_zeroed().assume_init() };
        let mut mailbox = Self {
            layout: NonNull::from(Box::leak(boxed)),
            backing: Backing::Heap,
            name: None,
        };
        mailbox.initialize();
        mailbox
    }

    /// Open the named region, creating and initialising it if this is the first opener
    pub fn open(name: &str) -> Result<Self, BridgeError> {
        let mailbox_error = |source| BridgeError::Mailbox {
            name: name.to_string(),
            source,
        };

        let (region, created) =
            MappedRegion::open_or_create(name, MAILBOX_REGION_SIZE).map_err(mailbox_error)?;
        let layout = NonNull::new(region.as_ptr().cast::<MailboxLayout>()).ok_or_else(|| {
            mailbox_error(io::Error::other("mapping returned null"))
        })?;

        let mut mailbox = Self {
            layout,
            backing: Backing::Mapped(region),
            name: Some(name.to_string()),
        };

        if created {
            mailbox.initialize();
            debug!(mailbox = name, "created shared mailbox");
        } else if !mailbox.wait_for_magic() {
            return Err(mailbox_error(io::Error::new(
                io::ErrorKind::InvalidData,
                "region exists but is not a mailbox",
            )));
        }

        Ok(mailbox)
    }

    /// Region name, `None` for an anonymous mailbox
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether other processes can reach this mailbox
    pub fn is_shared(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    fn initialize(&mut self) {
        let header = self.header();
        header
            .capacity
            .store(MAX_BUFFER_SIZE as u32, Ordering::Relaxed);
        header.size.store(MAX_BUFFER_SIZE as u32, Ordering::Relaxed);
        self.zero_storage();
        self.header().magic.store(MAILBOX_MAGIC, Ordering::Release);
    }

    /// Give a concurrent creator up to [`INIT_WAIT`] to publish the magic
    fn wait_for_magic(&self) -> bool {
        let deadline = Instant::now() + INIT_WAIT;
        loop {
            if self.header().magic.load(Ordering::Acquire) == MAILBOX_MAGIC {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn header(&self) -> &MailboxHeader {
        // SAFETY: layout points to a live region for the lifetime of self
        unsafe { &(*self.layout.as_ptr()).header }
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: field projection inside a live region, no reference is created
        unsafe { (&raw mut (*self.layout.as_ptr()).data).cast::<u8>() }
    }

    fn zero_storage(&mut self) {
        // SAFETY: data spans MAX_BUFFER_SIZE bytes
        unsafe { ptr::write_bytes(self.data_ptr(), 0, MAX_BUFFER_SIZE) };
    }

    /// Shared capacity ceiling
    pub fn capacity(&self) -> usize {
        (self.header().capacity.load(Ordering::Relaxed) as usize).min(MAX_BUFFER_SIZE)
    }

    /// Set the shared ceiling for every process using this region
    ///
    /// Also resets the logical size to the new ceiling. Values above
    /// [`MAX_BUFFER_SIZE`] are clamped.
    pub fn set_capacity(&mut self, capacity: usize) {
        let clamped = capacity.min(MAX_BUFFER_SIZE);
        if clamped != capacity {
            warn!(
                requested = capacity,
                max = MAX_BUFFER_SIZE,
                "mailbox capacity clamped to storage size"
            );
        }
        let header = self.header();
        header.capacity.store(clamped as u32, Ordering::Relaxed);
        header.size.store(clamped as u32, Ordering::Relaxed);
    }

    /// Logical size of the staged payload
    pub fn size(&self) -> usize {
        (self.header().size.load(Ordering::Relaxed) as usize).min(MAX_BUFFER_SIZE)
    }

    /// Zero the storage and reset the logical size to the ceiling
    pub fn clear(&mut self) {
        let capacity = self.capacity();
        self.header().size.store(capacity as u32, Ordering::Relaxed);
        self.zero_storage();
    }

    /// Stage `bytes`, replacing whatever was staged before
    pub fn put(&mut self, bytes: &[u8]) {
        self.clear();

        let mut size = self.size();
        if bytes.len() < size {
            size = bytes.len();
            self.header().size.store(size as u32, Ordering::Relaxed);
        } else if bytes.len() > size {
            debug!(
                len = bytes.len(),
                capacity = size,
                "payload truncated to mailbox capacity"
            );
        }

        // SAFETY: size <= MAX_BUFFER_SIZE and size <= bytes.len()
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.data_ptr(), size) };
    }

    /// Take the staged payload and clear the mailbox
    ///
    /// Returns `requested` bytes, or the logical size if that is larger.
    pub fn get(&mut self, requested: usize) -> Vec<u8> {
        let stored = self.size();
        let effective = if stored >= requested {
            stored
        } else {
            requested
        };
        let count = effective.min(MAX_BUFFER_SIZE);

        let mut out = vec![0u8; count];
        // SAFETY: count <= MAX_BUFFER_SIZE and out holds count bytes
        unsafe { ptr::copy_nonoverlapping(self.data_ptr(), out.as_mut_ptr(), count) };

        self.clear();
        out
    }

    /// Stage `text` as UTF-16LE without a terminator
    pub fn put_wide(&mut self, text: &str) {
        self.put(&encode_wide(text));
    }

    /// Take the staged UTF-16LE text and clear the mailbox
    ///
    /// Reads one wide character past the logical size and forces it to NUL,
    /// so the text ends at the first NUL or at the logical size.
    pub fn get_wide(&mut self) -> String {
        let bytes = self.get(self.size() + 2);
        let mut units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        match units.last_mut() {
            Some(last) => *last = 0,
            None => units.push(0),
        }
        let len = units.iter().position(|&c| c == 0).unwrap_or(units.len());
        String::from_utf16_lossy(&units[..len])
    }
}

impl Drop for SharedMailbox {
    fn drop(&mut self) {
        if let Backing::Heap = self.backing {
            // SAFETY: heap layouts come from Box::leak in anonymous()
            drop(unsafe { Box::from_raw(self.layout.as_ptr()) });
        }
    }
}

impl std::fmt::Debug for SharedMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMailbox")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}

/// UTF-16LE bytes of `text`, no terminator
pub(crate) fn encode_wide(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Remove a named region so the next `open` creates it afresh
///
/// Windows releases the region with its last handle; on Unix it persists
/// until unlinked.
#[cfg(unix)]
pub fn remove_shared_mailbox(name: &str) -> Result<(), BridgeError> {
    crate::sys::unlink_region(name).map_err(|source| BridgeError::Mailbox {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "hookbridge-test-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        )
    }

    #[test]
    fn test_new_mailbox_is_clear() {
        let mailbox = SharedMailbox::anonymous();
        assert_eq!(mailbox.capacity(), MAX_BUFFER_SIZE);
        assert_eq!(mailbox.size(), MAX_BUFFER_SIZE);
        assert!(!mailbox.is_shared());
        assert_eq!(mailbox.name(), None);
    }

    #[test]
    fn test_put_get_small_payload() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.put(b"parameters");
        assert_eq!(mailbox.size(), 10);

        assert_eq!(mailbox.get(10), b"parameters");
        assert_eq!(mailbox.size(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_scenario_capacity_1024() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.set_capacity(1024);

        mailbox.put(b"hello");
        assert_eq!(mailbox.size(), 5);
        assert_eq!(mailbox.get(5), b"hello");
        assert_eq!(mailbox.size(), 1024);
        assert_eq!(mailbox.capacity(), 1024);
    }

    #[test]
    fn test_put_at_ceiling_keeps_size_at_ceiling() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.set_capacity(16);

        mailbox.put(&[7u8; 16]);
        assert_eq!(mailbox.size(), 16);

        mailbox.put(&[9u8; 40]);
        assert_eq!(mailbox.size(), 16);
        // Truncated to the ceiling
        assert_eq!(mailbox.get(0), vec![9u8; 16]);
    }

    #[test]
    fn test_get_widens_to_logical_size() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.put(b"0123456789");

        let out = mailbox.get(4);
        assert_eq!(out.len(), 10);
        assert_eq!(out, b"0123456789");
    }

    #[test]
    fn test_get_larger_than_stored_reads_zero_fill() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.put(b"abc");

        let out = mailbox.get(6);
        assert_eq!(out, b"abc\0\0\0");
    }

    #[test]
    fn test_get_never_exceeds_storage() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.put(b"abc");
        assert_eq!(mailbox.get(MAX_BUFFER_SIZE * 2).len(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_second_put_overwrites_first() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.put(b"first payload");
        mailbox.put(b"second");
        assert_eq!(mailbox.get(6), b"second");
    }

    #[test]
    fn test_get_clears_storage() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.put(b"secret");
        let _ = mailbox.get(6);
        let out = mailbox.get(6);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_set_capacity_clamps() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.set_capacity(MAX_BUFFER_SIZE + 100);
        assert_eq!(mailbox.capacity(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_wide_text() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.put_wide("héllo wörld");
        assert_eq!(mailbox.size(), "héllo wörld".encode_utf16().count() * 2);
        assert_eq!(mailbox.get_wide(), "héllo wörld");
        assert_eq!(mailbox.size(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_wide_text_empty_mailbox() {
        let mut mailbox = SharedMailbox::anonymous();
        assert_eq!(mailbox.get_wide(), "");
    }

    #[test]
    fn test_wide_text_at_ceiling_is_terminated() {
        let mut mailbox = SharedMailbox::anonymous();
        mailbox.set_capacity(8);
        mailbox.put_wide("abcdef");
        // 12 bytes into an 8 byte ceiling: four characters fit
        assert_eq!(mailbox.get_wide(), "abcd");
    }

    #[test]
    fn test_open_waits_for_concurrent_creator() {
        let name = unique_name();
        let (region, created) =
            MappedRegion::open_or_create(&name, MAILBOX_REGION_SIZE).expect("Failed to map");
        assert!(created);

        let opener_name = name.clone();
        let opener = std::thread::spawn(move || SharedMailbox::open(&opener_name));

        // Publish the header the way a creator would, after the opener mapped it
        std::thread::sleep(Duration::from_millis(20));
        let header = unsafe { &*region.as_ptr().cast::<MailboxHeader>() };
        header.capacity.store(4096, Ordering::Relaxed);
        header.size.store(4096, Ordering::Relaxed);
        header.magic.store(MAILBOX_MAGIC, Ordering::Release);

        let mailbox = opener.join().unwrap().expect("Failed to open mailbox");
        assert_eq!(mailbox.capacity(), 4096);

        drop(mailbox);
        drop(region);
        #[cfg(unix)]
        remove_shared_mailbox(&name).unwrap();
    }

    #[test]
    fn test_open_rejects_region_never_initialised() {
        let name = unique_name();
        let (region, _) =
            MappedRegion::open_or_create(&name, MAILBOX_REGION_SIZE).expect("Failed to map");

        let started = Instant::now();
        assert!(matches!(
            SharedMailbox::open(&name),
            Err(BridgeError::Mailbox { .. })
        ));
        assert!(started.elapsed() >= INIT_WAIT);

        drop(region);
        #[cfg(unix)]
        remove_shared_mailbox(&name).unwrap();
    }

    #[test]
    fn test_named_mailbox_shared_between_handles() {
        let name = unique_name();
        let mut producer = SharedMailbox::open(&name).expect("Failed to create mailbox");
        let mut consumer = SharedMailbox::open(&name).expect("Failed to open mailbox");
        assert!(producer.is_shared());
        assert_eq!(consumer.name(), Some(name.as_str()));

        producer.set_capacity(2048);
        assert_eq!(consumer.capacity(), 2048);

        producer.put(b"from the controller");
        assert_eq!(consumer.size(), 19);
        assert_eq!(consumer.get(19), b"from the controller");
        assert_eq!(producer.size(), 2048);

        drop(producer);
        drop(consumer);
        #[cfg(unix)]
        remove_shared_mailbox(&name).unwrap();
    }
}
