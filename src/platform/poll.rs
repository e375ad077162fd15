//! Readiness polling shared by every reader thread.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// How long a reader waits before re-checking its running flag.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait until at least one of `fds` is readable or `timeout` passes.
///
/// Returns the indices of descriptors that are readable, hung up or in an
/// error state. An interrupted wait and a timeout both return an empty list.
pub fn wait_readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<usize>> {
    if fds.is_empty() {
        std::thread::sleep(timeout);
        return Ok(Vec::new());
    }

    let mut poll_fds: Vec<libc::pollfd> = fds
        .iter()
        .map(|fd| libc::pollfd {
            fd: *fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let ret = unsafe { libc::poll(poll_fds.as_mut_ptr(), poll_fds.len() as _, timeout_ms) };

    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Vec::new());
        }
        return Err(err);
    }
    if ret == 0 {
        return Ok(Vec::new());
    }

    Ok(poll_fds
        .iter()
        .enumerate()
        .filter(|(_, pfd)| pfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0)
        .map(|(i, _)| i)
        .collect())
}

/// Put a descriptor into non-blocking mode, keeping its other flags.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let current = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if current < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, current | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
