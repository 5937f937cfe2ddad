//! Low-level ioctl plumbing
//!
//! Both descriptor-based surfaces (GPIO character device and the bridge
//! kernel driver) speak fixed-layout ioctls. rustix has no wrapper for
//! arbitrary request numbers, so this is the one place libc is called.

use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd};

/// Issue `request` with `arg` as the in/out buffer.
///
/// # Errors
///
/// Returns the OS error if the ioctl fails.
pub(crate) fn ioctl<T>(fd: BorrowedFd<'_>, request: libc::c_ulong, arg: &mut T) -> io::Result<libc::c_int> {
    // SAFETY: ioctl with a typed argument buffer.
    // Invariants: (1) fd is borrowed, so open for the duration of the call;
    // (2) arg is a live, exclusively borrowed repr(C) value whose size matches
    // the size encoded in `request`; (3) the kernel writes at most that size.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, std::ptr::from_mut(arg)) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Issue an argument-less `request`.
///
/// # Errors
///
/// Returns the OS error if the ioctl fails.
pub(crate) fn ioctl_none(fd: BorrowedFd<'_>, request: libc::c_ulong) -> io::Result<libc::c_int> {
    // SAFETY: _IO request; the kernel reads no argument.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, 0) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}
