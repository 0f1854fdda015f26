//! Process-group signalling. The worker is spawned as the leader of its own
//! group, so its pid doubles as the group id and helpers it forks are reached
//! by the same signal.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
impl GroupSignal {
    fn as_raw(&self) -> libc::c_int {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Sends `signal` to every process in group `pgid`.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: GroupSignal) -> io::Result<()> {
    // kill(0, ..) would hit our own group.
    if pgid == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to signal process group 0",
        ));
    }
    // Safety: kill() has no memory-safety requirements; a negative pid
    // addresses the process group.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal.as_raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: GroupSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups are not supported on this platform",
    ))
}

/// True while any member of the group exists (EPERM counts as alive).
#[cfg(unix)]
pub fn group_alive(pgid: u32) -> bool {
    if pgid == 0 {
        return false;
    }
    // Safety: signal 0 only checks for existence.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn group_alive(_pgid: u32) -> bool {
    false
}
