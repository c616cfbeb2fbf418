//! Platform backends

#[cfg(unix)]
mod unix;
#[cfg(windows)]
pub(crate) mod windows;

#[cfg(unix)]
pub(crate) use unix::{MappedRegion, PipeServer, unlink_region, write_message};
#[cfg(windows)]
pub(crate) use windows::{MappedRegion, PipeServer, write_message};
