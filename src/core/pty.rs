//! Pseudo-terminal pair for Unix
//!
//! This module owns the master/slave descriptors for the life of the shell,
//! switches the slave out of canonical mode, and forks children that run in
//! their own session with the slave as controlling terminal.

use std::ffi::{CStr, CString};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::ptr;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{self, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Exit status of a child that could not be set up or exec'd
pub const EXEC_FAILED_STATUS: i32 = 253;

/// Signals whose disposition is put back to default in the child
const RESET_SIGNALS: [Signal; 10] = [
    Signal::SIGCHLD,
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGALRM,
    Signal::SIGPIPE,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate pseudo-terminal: {0}")]
    Allocation(#[source] Errno),

    #[error("Failed to change terminal mode: {0}")]
    Termios(#[source] Errno),

    #[error("Failed to set descriptor flags: {0}")]
    Fcntl(#[source] Errno),

    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),

    #[error("Failed waiting for child to take the terminal: {0}")]
    Handshake(#[source] Errno),

    #[error("Failed to set window size: {0}")]
    Resize(#[source] Errno),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] Errno),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] Errno),

    #[error("Failed to signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: Errno,
    },
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// Master/slave pseudo-terminal pair
pub struct Pty {
    master: OwnedFd,
    slave: OwnedFd,
    /// Slave line discipline as found at open time
    saved_mode: Termios,
}

impl Pty {
    /// Allocate a pair and switch the slave to non-canonical input.
    pub fn open(cols: u16, rows: u16) -> Result<Self> {
        let winsize = window_size(cols, rows);
        let pair = openpty(Some(&winsize), None::<&Termios>).map_err(PtyError::Allocation)?;

        set_cloexec(pair.master.as_fd())?;
        set_cloexec(pair.slave.as_fd())?;
        set_nonblocking(pair.master.as_fd())?;

        let saved_mode = termios::tcgetattr(&pair.slave).map_err(PtyError::Termios)?;
        let mut mode = saved_mode.clone();
        mode.local_flags.remove(LocalFlags::ICANON);
        mode.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        mode.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(&pair.slave, SetArg::TCSANOW, &mode).map_err(PtyError::Termios)?;

        debug!(
            master = pair.master.as_raw_fd(),
            slave = pair.slave.as_raw_fd(),
            cols,
            rows,
            "opened pty"
        );

        Ok(Self {
            master: pair.master,
            slave: pair.slave,
            saved_mode,
        })
    }

    /// Descriptor to poll for child output
    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    /// Set the window size seen by the child.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let winsize = window_size(cols, rows);
        // SAFETY: TIOCSWINSZ takes a pointer to a winsize that outlives the call
        let res = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &winsize) };
        Errno::result(res).map_err(PtyError::Resize)?;
        debug!(cols, rows, "resized pty");
        Ok(())
    }

    /// Read child output. Returns 0 when nothing is pending.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match unistd::read(&self.master, buf) {
            Ok(n) => Ok(n),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(0),
            Err(e) => Err(PtyError::Read(e)),
        }
    }

    /// Write input for the child. Bytes the terminal cannot take right now are dropped.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < data.len() {
            match unistd::write(&self.master, &data[written..]) {
                Ok(n) => written += n,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => {
                    warn!(dropped = data.len() - written, "pty input full");
                    break;
                }
                Err(e) => return Err(PtyError::Write(e)),
            }
        }
        Ok(written)
    }

    /// Fork a child attached to the slave and exec `program`.
    ///
    /// The child starts a new session (so its pid is also its process group),
    /// takes the slave as controlling terminal and stdio, resets signal
    /// dispositions and calls `execve`. Any failure in the child ends it with
    /// `EXEC_FAILED_STATUS`, which the parent later reaps like any other exit.
    ///
    /// Returns once the child's process group is the terminal's foreground
    /// group (or the child is gone), so control characters written right
    /// after this call reach it.
    pub fn spawn(&self, program: &CStr, argv: &[CString], envp: &[CString]) -> Result<Pid> {
        let argv_ptrs = null_terminated(argv);
        let envp_ptrs = null_terminated(envp);
        let master = self.master.as_raw_fd();
        let slave = self.slave.as_raw_fd();
        let (ready_read, ready_write) =
            unistd::pipe2(OFlag::O_CLOEXEC).map_err(PtyError::Handshake)?;

        // SAFETY: the child only makes async-signal-safe calls before exec or _exit
        match unsafe { unistd::fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => unsafe {
                libc::close(ready_read.as_raw_fd());
                exec_child(
                    master,
                    slave,
                    ready_write.as_raw_fd(),
                    program,
                    &argv_ptrs,
                    &envp_ptrs,
                )
            },
            ForkResult::Parent { child } => {
                drop(ready_write);
                wait_for_eof(&ready_read)?;
                info!(pid = %child, program = ?program, "spawned child on pty");
                Ok(child)
            }
        }
    }

    /// Send `sig` to the whole process group led by `pgid`.
    pub fn signal_group(&self, pgid: Pid, sig: Signal) -> Result<()> {
        signal::killpg(pgid, sig).map_err(|source| PtyError::Signal {
            pgid: pgid.as_raw(),
            source,
        })
    }

    /// Put the slave line discipline back the way it was found.
    pub fn restore_mode(&self) -> Result<()> {
        termios::tcsetattr(&self.slave, SetArg::TCSANOW, &self.saved_mode)
            .map_err(PtyError::Termios)
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        if let Err(e) = self.restore_mode() {
            debug!("could not restore pty mode: {}", e);
        }
    }
}

/// Child side of `spawn`. Never returns.
unsafe fn exec_child(
    master: RawFd,
    slave: RawFd,
    ready: RawFd,
    program: &CStr,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
) -> ! {
    libc::close(master);

    if libc::setsid() < 0 {
        libc::_exit(EXEC_FAILED_STATUS);
    }
    if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) < 0 {
        libc::_exit(EXEC_FAILED_STATUS);
    }
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if libc::dup2(slave, target) < 0 {
            libc::_exit(EXEC_FAILED_STATUS);
        }
    }
    if slave > libc::STDERR_FILENO {
        libc::close(slave);
    }
    // the terminal is ours; let the parent go on
    libc::close(ready);

    for sig in RESET_SIGNALS {
        let _ = signal::signal(sig, SigHandler::SigDfl);
    }
    let _ = SigSet::empty().thread_set_mask();

    libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
    libc::_exit(EXEC_FAILED_STATUS)
}

/// Block until every write end of `fd` is closed.
fn wait_for_eof(fd: &OwnedFd) -> Result<()> {
    let mut buf = [0u8; 1];
    loop {
        match unistd::read(fd, &mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(PtyError::Handshake(e)),
        }
    }
}

fn null_terminated(items: &[CString]) -> Vec<*const libc::c_char> {
    items
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

fn window_size(cols: u16, rows: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Mark a descriptor close-on-exec
fn set_cloexec(fd: BorrowedFd<'_>) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFD).map_err(PtyError::Fcntl)?;
    let flags = FdFlag::from_bits_truncate(flags) | FdFlag::FD_CLOEXEC;
    fcntl(fd, FcntlArg::F_SETFD(flags)).map_err(PtyError::Fcntl)?;
    Ok(())
}

/// Put a descriptor in non-blocking mode
fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(PtyError::Fcntl)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(PtyError::Fcntl)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_sets_noncanonical_mode() {
        let pty = Pty::open(80, 24).unwrap();
        let mode = termios::tcgetattr(&pty.slave).unwrap();
        assert!(!mode.local_flags.contains(LocalFlags::ICANON));
        assert!(pty.saved_mode.local_flags.contains(LocalFlags::ICANON));
    }

    #[test]
    fn test_master_is_nonblocking_and_cloexec() {
        let pty = Pty::open(80, 24).unwrap();
        let fl = OFlag::from_bits_truncate(fcntl(pty.master_fd(), FcntlArg::F_GETFL).unwrap());
        assert!(fl.contains(OFlag::O_NONBLOCK));
        let fd = FdFlag::from_bits_truncate(fcntl(pty.master_fd(), FcntlArg::F_GETFD).unwrap());
        assert!(fd.contains(FdFlag::FD_CLOEXEC));

        let mut buf = [0u8; 16];
        assert_eq!(pty.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_resize() {
        let pty = Pty::open(80, 24).unwrap();
        pty.resize(100, 40).unwrap();

        let mut winsize = window_size(0, 0);
        let res = unsafe { libc::ioctl(pty.slave.as_raw_fd(), libc::TIOCGWINSZ, &mut winsize) };
        assert_eq!(res, 0);
        assert_eq!((winsize.ws_col, winsize.ws_row), (100, 40));
    }

    #[test]
    fn test_spawned_child_owns_terminal() {
        let pty = Pty::open(80, 24).unwrap();
        let program = CString::new("/bin/sh").unwrap();
        let argv = [
            CString::new("sh").unwrap(),
            CString::new("-c").unwrap(),
            CString::new("sleep 5").unwrap(),
        ];
        let pid = pty.spawn(&program, &argv, &[]).unwrap();

        assert_eq!(unistd::tcgetpgrp(pty.master_fd()).unwrap(), pid);

        pty.signal_group(pid, Signal::SIGKILL).unwrap();
        let mut status = 0;
        unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) };
    }

    #[test]
    fn test_restore_mode() {
        let pty = Pty::open(80, 24).unwrap();
        pty.restore_mode().unwrap();
        let mode = termios::tcgetattr(&pty.slave).unwrap();
        assert!(mode.local_flags.contains(LocalFlags::ICANON));
    }
}
