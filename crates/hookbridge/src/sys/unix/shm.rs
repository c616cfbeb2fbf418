//! Named shared memory region via `shm_open` + `mmap`

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::time::{Duration, Instant};

/// A `MAP_SHARED` view of a named POSIX shared memory object
pub(crate) struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

fn object_name(name: &str) -> io::Result<CString> {
    let name = format!("/{}", name.trim_start_matches('/').replace('/', "_"));
    CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"))
}

/// How long an opener waits for the creator to `ftruncate` the object
const SIZE_WAIT: Duration = Duration::from_millis(100);

fn object_size(fd: &OwnedFd) -> io::Result<usize> {
    // SAFETY: stat is plain data, fd is valid
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.st_size as usize)
}

/// Wait for a concurrent creator to size the object
fn wait_for_size(fd: &OwnedFd, len: usize) -> io::Result<()> {
    let deadline = Instant::now() + SIZE_WAIT;
    while object_size(fd)? < len {
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "existing region is smaller than a mailbox",
            ));
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

impl MappedRegion {
    /// Open `name`, creating it with `len` bytes if it does not exist yet
    ///
    /// Returns whether this call created the object.
    pub(crate) fn open_or_create(name: &str, len: usize) -> io::Result<(Self, bool)> {
        let path = object_name(name)?;

        let mut created = true;
        // SAFETY: path is a valid NUL-terminated string
        let mut fd = unsafe {
            libc::shm_open(
                path.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::AlreadyExists {
                return Err(err);
            }
            created = false;
            // SAFETY: as above
            fd = unsafe { libc::shm_open(path.as_ptr(), libc::O_RDWR, 0o600) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        if created {
            // SAFETY: fd is a valid shared memory object
            if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0 {
                let err = io::Error::last_os_error();
                // SAFETY: path is valid
                unsafe { libc::shm_unlink(path.as_ptr()) };
                return Err(err);
            }
        } else {
            wait_for_size(&fd, len)?;
        }

        // SAFETY: mapping len bytes of an object at least len bytes long
        let view = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if view == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // The mapping outlives the descriptor
        drop(fd);

        let ptr = NonNull::new(view.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok((Self { ptr, len }, created))
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping created in open_or_create
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

/// Remove the named object; existing mappings stay valid
pub(crate) fn unlink_region(name: &str) -> io::Result<()> {
    let path = object_name(name)?;
    // SAFETY: path is a valid NUL-terminated string
    if unsafe { libc::shm_unlink(path.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "hookbridge-shm-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        )
    }

    /// Create the object the way a creator does, stopping before `ftruncate`
    fn create_unsized(name: &str) -> OwnedFd {
        let path = object_name(name).unwrap();
        let fd = unsafe {
            libc::shm_open(
                path.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        assert!(fd >= 0, "shm_open failed: {}", io::Error::last_os_error());
        unsafe { OwnedFd::from_raw_fd(fd) }
    }

    #[test]
    fn test_open_waits_for_creator_to_size_object() {
        let name = unique_name();
        let creator = create_unsized(&name);

        let opener_name = name.clone();
        let opener = std::thread::spawn(move || {
            MappedRegion::open_or_create(&opener_name, 4096).map(|(_, created)| created)
        });

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(unsafe { libc::ftruncate(creator.as_raw_fd(), 4096) }, 0);

        assert!(!opener.join().unwrap().expect("Failed to open region"));
        unlink_region(&name).unwrap();
    }

    #[test]
    fn test_open_rejects_object_never_sized() {
        let name = unique_name();
        let _creator = create_unsized(&name);

        let result = MappedRegion::open_or_create(&name, 4096);
        assert!(matches!(result, Err(e) if e.kind() == io::ErrorKind::InvalidData));
        unlink_region(&name).unwrap();
    }
}
