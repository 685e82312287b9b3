//! Jobs started from the prompt

use std::fmt;
use std::time::{Duration, SystemTime};

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use super::buffer::{BufferError, HistoryBuffer};
use super::pty::EXEC_FAILED_STATUS;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    /// Exited normally with a code
    Exited(i32),
    /// Killed by a signal
    Signaled(Signal),
    /// The kernel no longer knows the pid
    Lost,
}

impl JobStatus {
    /// Classify a wait status. `None` for states that are not an exit
    /// (stopped, continued, still alive).
    pub fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(JobStatus::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => Some(JobStatus::Signaled(sig)),
            _ => None,
        }
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Running)
    }

    /// The child never got as far as running the interpreter
    pub fn failed_to_start(&self) -> bool {
        matches!(self, JobStatus::Exited(EXEC_FAILED_STATUS))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Exited(code) if *code == EXEC_FAILED_STATUS => {
                write!(f, "failed to start")
            }
            JobStatus::Exited(code) => write!(f, "exit {}", code),
            JobStatus::Signaled(sig) => write!(f, "killed by {}", sig),
            JobStatus::Lost => write!(f, "lost"),
        }
    }
}

/// Resource usage of a reaped child
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
    /// Peak resident set size in kilobytes
    pub max_rss_kb: i64,
}

impl ResourceUsage {
    pub fn from_rusage(usage: &libc::rusage) -> Self {
        Self {
            user_time: timeval_to_duration(usage.ru_utime),
            system_time: timeval_to_duration(usage.ru_stime),
            max_rss_kb: usage.ru_maxrss as i64,
        }
    }
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(micros as u64)
}

/// A command line started from the prompt
#[derive(Debug)]
pub struct Job {
    pub command: String,
    /// Set while the process is alive
    pub pid: Option<Pid>,
    pub status: JobStatus,
    pub started: SystemTime,
    pub finished: Option<SystemTime>,
    pub usage: Option<ResourceUsage>,
    /// Output produced while this job was in the foreground
    pub output: Option<HistoryBuffer>,
}

impl Job {
    pub fn new(command: String, keep_output: bool) -> Self {
        Self {
            command,
            pid: None,
            status: JobStatus::Running,
            started: SystemTime::now(),
            finished: None,
            usage: None,
            output: keep_output.then(HistoryBuffer::new),
        }
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    /// Record the end of the process.
    pub fn finish(&mut self, status: JobStatus, usage: Option<ResourceUsage>) {
        self.pid = None;
        self.status = status;
        self.usage = usage;
        self.finished = Some(SystemTime::now());
    }

    /// Wall-clock run time, up to now for a running job
    pub fn elapsed(&self) -> Duration {
        let end = self.finished.unwrap_or_else(SystemTime::now);
        end.duration_since(self.started).unwrap_or_default()
    }

    /// Keep a copy of output if this job records its own.
    pub fn record_output(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        match self.output.as_mut() {
            Some(out) => out.append(bytes),
            None => Ok(()),
        }
    }
}
