//! Self-pipe bridge
//!
//! Turns an asynchronous signal into a readable descriptor. The signal
//! handler installed by `signal_hook::low_level::pipe` does nothing but a
//! non-blocking one-byte write to the write end; the reactor polls the read
//! end and does the real work on its own thread.

use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd;
use signal_hook::low_level::{self, pipe};
use signal_hook::SigId;
use tracing::debug;

/// Read end of a pipe fed by a signal handler
pub struct SelfPipe {
    read: OwnedFd,
    signal: libc::c_int,
    sig_id: SigId,
}

impl SelfPipe {
    /// Create a non-blocking, close-on-exec pipe and route `signal` into it.
    pub fn new(signal: libc::c_int) -> io::Result<Self> {
        let (read, write) = unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        // the write end now belongs to the handler
        let sig_id = pipe::register(signal, write)?;
        debug!(signal, "self-pipe registered");
        Ok(Self {
            read,
            signal,
            sig_id,
        })
    }

    /// Descriptor to poll
    pub fn read_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }

    /// Empty the pipe. Returns how many notifications were pending.
    ///
    /// Call this before acting on the signal so that one arriving mid-action
    /// leaves the pipe readable for the next wake.
    pub fn drain(&self) -> io::Result<usize> {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match unistd::read(&self.read, &mut buf) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }
}

impl Drop for SelfPipe {
    fn drop(&mut self) {
        low_level::unregister(self.sig_id);
        debug!(signal = self.signal, "self-pipe unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_becomes_readable_byte() {
        let bridge = SelfPipe::new(libc::SIGUSR2).unwrap();
        assert_eq!(bridge.drain().unwrap(), 0);

        low_level::raise(libc::SIGUSR2).unwrap();

        assert!(bridge.drain().unwrap() >= 1);
        assert_eq!(bridge.drain().unwrap(), 0);
    }
}
