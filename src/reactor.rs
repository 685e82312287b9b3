//! Event reactor
//!
//! One blocking wait over four descriptors drives the whole program:
//!
//! ```text
//! bridge (SIGCHLD) ─┐
//! pty master ───────┤
//! display ──────────┼─ poll ─> dispatch in this order
//! redraw timer ─────┘
//! ```
//!
//! Job-state changes are applied before new output, output before input,
//! and input before the repaint. A wait that times out with nothing ready
//! repaints unconditionally.

use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use tracing::{debug, trace, warn};

use crate::core::session::Session;

/// The external display connection
pub trait Display {
    /// Descriptor that becomes readable when the display has events
    fn as_fd(&self) -> BorrowedFd<'_>;

    /// Handle pending display events
    fn dispatch(&mut self, session: &mut Session) -> Result<()>;

    /// Paint the session
    fn repaint(&mut self, session: &mut Session) -> Result<()>;

    /// Called on every redraw tick before the dirty check
    fn tick(&mut self, _session: &mut Session) -> Result<()> {
        Ok(())
    }
}

/// Reactor timing
#[derive(Debug, Clone, Copy)]
pub struct ReactorConfig {
    /// Redraw timer period
    pub frame_interval: Duration,
    /// Upper bound on one wait
    pub wait_timeout: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs(1) / 30,
            wait_timeout: Duration::from_secs(1),
        }
    }
}

/// What one wake saw and did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wake {
    /// Descriptors reported ready
    pub ready: usize,
    pub bridge: bool,
    pub pty: bool,
    pub display: bool,
    pub timer: bool,
    pub repainted: bool,
}

pub struct Reactor {
    timer: TimerFd,
    timeout: PollTimeout,
}

impl Reactor {
    pub fn new(config: &ReactorConfig) -> Result<Self> {
        let timer = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )
        .context("Failed to create redraw timer")?;
        timer
            .set(
                Expiration::Interval(TimeSpec::from_duration(config.frame_interval)),
                TimerSetTimeFlags::empty(),
            )
            .context("Failed to arm redraw timer")?;

        let millis = u16::try_from(config.wait_timeout.as_millis()).unwrap_or(u16::MAX);
        debug!(
            frame_us = config.frame_interval.as_micros() as u64,
            timeout_ms = millis,
            "reactor ready"
        );

        Ok(Self {
            timer,
            timeout: PollTimeout::from(millis),
        })
    }

    /// Run until the session asks to exit.
    pub fn run<D: Display>(&mut self, session: &mut Session, display: &mut D) -> Result<()> {
        display.repaint(session)?;
        while !session.is_exiting() {
            self.step(session, display)?;
        }
        debug!("reactor stopped");
        Ok(())
    }

    /// Wait once and dispatch whatever became ready.
    pub fn step<D: Display>(&mut self, session: &mut Session, display: &mut D) -> Result<Wake> {
        let mut wake = Wake::default();
        let hangup;
        {
            let shell = session.shell();
            let mut fds = [
                PollFd::new(shell.bridge_fd(), PollFlags::POLLIN),
                PollFd::new(shell.master_fd(), PollFlags::POLLIN),
                PollFd::new(display.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.timer.as_fd(), PollFlags::POLLIN),
            ];
            wake.ready = loop {
                match poll(&mut fds, self.timeout) {
                    Ok(n) => break n as usize,
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e).context("Reactor wait failed"),
                }
            };
            let readable = |fd: &PollFd| fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN));
            wake.bridge = readable(&fds[0]);
            wake.pty = readable(&fds[1]);
            wake.display = readable(&fds[2]);
            wake.timer = readable(&fds[3]);
            hangup = fds[2]
                .revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLHUP | PollFlags::POLLERR));
        }

        if wake.bridge {
            session.on_bridge_readable();
        }
        if wake.pty {
            session
                .on_pty_readable()
                .context("Failed to take shell output")?;
        }
        if wake.display {
            display.dispatch(session)?;
        } else if hangup {
            warn!("display connection closed");
            session.request_exit();
        }
        if wake.timer {
            match self.timer.wait() {
                Ok(()) | Err(Errno::EAGAIN) => {}
                Err(e) => warn!("redraw timer read failed: {}", e),
            }
            display.tick(session)?;
            if session.take_dirty() {
                display.repaint(session)?;
                wake.repainted = true;
            }
        }
        if wake.ready == 0 {
            session.take_dirty();
            display.repaint(session)?;
            wake.repainted = true;
        }

        trace!(?wake, "reactor wake");
        Ok(wake)
    }
}
