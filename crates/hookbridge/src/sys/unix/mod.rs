//! Unix backends: POSIX shared memory for the mailbox, a Unix domain socket
//! for the return channel. Hook installation and `WM_COPYDATA` have no
//! counterpart here.

mod shm;
mod socket;

pub(crate) use shm::{MappedRegion, unlink_region};
pub(crate) use socket::{PipeServer, write_message};
