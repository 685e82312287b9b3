//! Shell: job control over a single pseudo-terminal
//!
//! The shell owns the pty pair and the SIGCHLD bridge for its whole life and
//! runs at most one foreground job at a time:
//!
//! ```text
//! Idle --run()--> Running --SIGCHLD/reap()--> Idle
//! ```
//!
//! Finished jobs stay in the job list.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::job::{Job, JobStatus, ResourceUsage};
use super::pty::{Pty, PtyError};
use super::selfpipe::SelfPipe;

/// Variables that describe the host terminal and must not leak into jobs
const STRIPPED_ENV: [&str; 4] = ["COLUMNS", "LINES", "TERMCAP", "TERM"];

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("A job is already running (pid {0})")]
    Busy(Pid),

    #[error("Invalid command line: {0:?}")]
    InvalidCommand(String),

    #[error("Failed to set up child notification: {0}")]
    SelfPipe(#[source] io::Error),

    #[error(transparent)]
    Pty(#[from] PtyError),
}

/// How jobs are started
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Interpreter that runs each command line
    pub program: String,
    /// Flag telling the interpreter its next argument is a command line
    pub flag: String,
    /// Value of TERM in the job environment
    pub term: String,
    /// Keep a private copy of each job's output
    pub keep_job_output: bool,
    pub cols: u16,
    pub rows: u16,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "/bin/sh".to_string(),
            flag: "-c".to_string(),
            term: "magicalterm".to_string(),
            keep_job_output: false,
            cols: 80,
            rows: 24,
        }
    }
}

/// Pty pair, child notification bridge and job table
pub struct Shell {
    pty: Pty,
    bridge: SelfPipe,
    jobs: Vec<Job>,
    /// Index into `jobs`; never owns the job
    foreground: Option<usize>,
    program: CString,
    argv0: CString,
    flag: CString,
    env: Vec<CString>,
    keep_job_output: bool,
}

impl Shell {
    /// Set up the bridge and the pty. Failure here is fatal to startup.
    pub fn new(config: &ShellConfig) -> Result<Self, ShellError> {
        let bridge = SelfPipe::new(libc::SIGCHLD).map_err(ShellError::SelfPipe)?;
        let pty = Pty::open(config.cols, config.rows)?;

        let program = cstring(&config.program)?;
        let argv0 = Path::new(&config.program)
            .file_name()
            .map(|name| name.as_bytes().to_vec())
            .and_then(|name| CString::new(name).ok())
            .unwrap_or_else(|| program.clone());
        let flag = cstring(&config.flag)?;

        info!(program = %config.program, term = %config.term, "shell ready");

        Ok(Self {
            pty,
            bridge,
            jobs: Vec::new(),
            foreground: None,
            program,
            argv0,
            flag,
            env: child_environment(&config.term),
            keep_job_output: config.keep_job_output,
        })
    }

    /// Start `cmdline` as the foreground job.
    ///
    /// Refused while another job is in the foreground.
    pub fn run(&mut self, cmdline: &str) -> Result<Pid, ShellError> {
        if let Some(pid) = self.foreground_job().and_then(|job| job.pid) {
            return Err(ShellError::Busy(pid));
        }

        let argv = [self.argv0.clone(), self.flag.clone(), cstring(cmdline)?];
        let mut job = Job::new(cmdline.to_string(), self.keep_job_output);
        let pid = self.pty.spawn(&self.program, &argv, &self.env)?;
        job.pid = Some(pid);

        info!(pid = %pid, command = %cmdline, "job started");
        self.jobs.push(job);
        self.foreground = Some(self.jobs.len() - 1);
        Ok(pid)
    }

    /// Collect exited children after the bridge fired.
    ///
    /// Returns how many jobs finished. Wait errors are logged and leave the
    /// shell as it was.
    pub fn reap(&mut self) -> usize {
        match self.bridge.drain() {
            Ok(n) => debug!(notifications = n, "child notification"),
            Err(e) => warn!("failed to drain child notification pipe: {}", e),
        }

        let mut reaped = 0;
        for idx in 0..self.jobs.len() {
            let Some(pid) = self.jobs[idx].pid else {
                continue;
            };
            match wait_child(pid) {
                Ok(None) => {}
                Ok(Some((status, usage))) => {
                    let job = &mut self.jobs[idx];
                    job.finish(status, Some(usage));
                    if status.failed_to_start() {
                        warn!(pid = %pid, command = %job.command, "job failed to start");
                    }
                    info!(
                        pid = %pid,
                        command = %job.command,
                        status = %status,
                        elapsed_ms = job.elapsed().as_millis() as u64,
                        user_ms = usage.user_time.as_millis() as u64,
                        sys_ms = usage.system_time.as_millis() as u64,
                        max_rss_kb = usage.max_rss_kb,
                        "job finished"
                    );
                    self.release(idx, pid);
                    reaped += 1;
                }
                Err(Errno::ECHILD) => {
                    warn!(pid = %pid, "job is not our child any more");
                    self.jobs[idx].finish(JobStatus::Lost, None);
                    self.release(idx, pid);
                }
                Err(e) => warn!(pid = %pid, "wait failed: {}", e),
            }
        }
        reaped
    }

    fn release(&mut self, idx: usize, pid: Pid) {
        if self.foreground == Some(idx) {
            self.foreground = None;
        } else {
            warn!(pid = %pid, "reaped a job that was not in the foreground");
        }
    }

    /// A foreground job is running
    pub fn is_running(&self) -> bool {
        self.foreground.is_some()
    }

    pub fn foreground_job(&self) -> Option<&Job> {
        self.foreground.and_then(|idx| self.jobs.get(idx))
    }

    pub fn foreground_job_mut(&mut self) -> Option<&mut Job> {
        self.foreground.and_then(|idx| self.jobs.get_mut(idx))
    }

    /// All jobs started so far, oldest first
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, PtyError> {
        self.pty.read(buf)
    }

    pub fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        self.pty.write(data)
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.pty.resize(cols, rows)
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.pty.master_fd()
    }

    pub fn bridge_fd(&self) -> BorrowedFd<'_> {
        self.bridge.read_fd()
    }

    /// Terminate the foreground job's process group and close the pty.
    pub fn exit(mut self) {
        self.terminate_foreground();
    }

    fn terminate_foreground(&mut self) {
        let Some(pid) = self.foreground_job().and_then(|job| job.pid) else {
            return;
        };
        match self.pty.signal_group(pid, Signal::SIGTERM) {
            Ok(()) => info!(pid = %pid, "terminated foreground job"),
            Err(e) => warn!("{}", e),
        }
        self.foreground = None;
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.terminate_foreground();
    }
}

/// Non-blocking wait for one specific child.
fn wait_child(pid: Pid) -> nix::Result<Option<(JobStatus, ResourceUsage)>> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data
    let mut usage: libc::rusage = unsafe { mem::zeroed() };
    loop {
        // SAFETY: both out-pointers are valid for the duration of the call
        let res = unsafe { libc::wait4(pid.as_raw(), &mut status, libc::WNOHANG, &mut usage) };
        match Errno::result(res) {
            Ok(0) => return Ok(None),
            Ok(raw) => {
                let status = WaitStatus::from_raw(Pid::from_raw(raw), status)?;
                return Ok(JobStatus::from_wait(status)
                    .map(|status| (status, ResourceUsage::from_rusage(&usage))));
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Inherited environment without host terminal variables, plus our TERM.
fn child_environment(term: &str) -> Vec<CString> {
    let mut env: Vec<CString> = std::env::vars_os()
        .filter(|(key, _)| !STRIPPED_ENV.iter().any(|k| key.as_bytes() == k.as_bytes()))
        .filter_map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            CString::new(entry).ok()
        })
        .collect();
    if let Ok(entry) = CString::new(format!("TERM={}", term)) {
        env.push(entry);
    }
    env
}

fn cstring(s: &str) -> Result<CString, ShellError> {
    CString::new(s).map_err(|_| ShellError::InvalidCommand(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::time::{Duration, Instant};

    fn readable(fd: BorrowedFd<'_>, ms: u16) -> bool {
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        matches!(poll(&mut fds, PollTimeout::from(ms)), Ok(n) if n > 0)
    }

    fn reap_until_idle(shell: &mut Shell) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while shell.is_running() && Instant::now() < deadline {
            readable(shell.bridge_fd(), 100);
            shell.reap();
        }
    }

    fn read_output(shell: &Shell, needle: &[u8]) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while Instant::now() < deadline {
            if readable(shell.master_fd(), 100) {
                let n = shell.read(&mut buf).unwrap();
                out.extend_from_slice(&buf[..n]);
                if out.windows(needle.len()).any(|w| w == needle) {
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn test_run_and_reap() {
        let mut shell = Shell::new(&ShellConfig::default()).unwrap();
        assert!(!shell.is_running());

        shell.run("echo hi").unwrap();
        assert!(shell.is_running());

        let out = read_output(&shell, b"hi");
        assert!(out.windows(2).any(|w| w == b"hi"), "output: {:?}", out);

        reap_until_idle(&mut shell);
        assert!(!shell.is_running());
        let job = &shell.jobs()[0];
        assert_eq!(job.status, JobStatus::Exited(0));
        assert!(job.pid.is_none());
        assert!(job.usage.is_some());
    }

    #[test]
    fn test_second_job_is_rejected() {
        let mut shell = Shell::new(&ShellConfig::default()).unwrap();
        let pid = shell.run("sleep 5").unwrap();

        match shell.run("echo nope") {
            Err(ShellError::Busy(busy)) => assert_eq!(busy, pid),
            other => panic!("expected Busy, got {:?}", other.map(|p| p.as_raw())),
        }
        assert_eq!(shell.jobs().len(), 1);
        assert_eq!(shell.foreground_job().unwrap().pid, Some(pid));
    }

    #[test]
    fn test_exec_failure_exits_with_sentinel() {
        let config = ShellConfig {
            program: "/nonexistent/interpreter".to_string(),
            ..ShellConfig::default()
        };
        let mut shell = Shell::new(&config).unwrap();
        shell.run("true").unwrap();

        reap_until_idle(&mut shell);
        assert!(shell.jobs()[0].status.failed_to_start());
    }

    #[test]
    fn test_killed_job_is_signaled() {
        let mut shell = Shell::new(&ShellConfig::default()).unwrap();
        shell.run("kill -TERM $$").unwrap();

        reap_until_idle(&mut shell);
        assert_eq!(shell.jobs()[0].status, JobStatus::Signaled(Signal::SIGTERM));
    }

    #[test]
    fn test_job_sees_normalized_environment() {
        let mut shell = Shell::new(&ShellConfig::default()).unwrap();
        shell.run("echo \"term=$TERM cols=${COLUMNS-unset}\"").unwrap();

        let out = read_output(&shell, b"cols=unset");
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("term=magicalterm cols=unset"), "output: {}", text);
        reap_until_idle(&mut shell);
    }

    /// Live (non-zombie) processes whose process group is `pgid`.
    fn live_in_group(pgid: Pid) -> Vec<i32> {
        let mut live = Vec::new();
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return live;
        };
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
                continue;
            };
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            // fields after the command name: state ppid pgrp ...
            let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
                continue;
            };
            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() > 2 && fields[0] != "Z" && fields[2] == pgid.as_raw().to_string() {
                live.push(pid);
            }
        }
        live
    }

    #[test]
    fn test_exit_terminates_process_group() {
        let mut shell = Shell::new(&ShellConfig::default()).unwrap();
        let pid = shell.run("sleep 30 & sleep 30; wait").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while live_in_group(pid).len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(live_in_group(pid).len() >= 3, "group {:?}", live_in_group(pid));

        shell.exit();

        let deadline = Instant::now() + Duration::from_secs(10);
        while !live_in_group(pid).is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(live_in_group(pid), Vec::<i32>::new());
    }

    #[test]
    fn test_job_reaped_elsewhere_is_lost() {
        let mut shell = Shell::new(&ShellConfig::default()).unwrap();
        let pid = shell.run("true").unwrap();

        let mut status = 0;
        let res = unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) };
        assert_eq!(res, pid.as_raw());

        shell.reap();
        assert!(!shell.is_running());
        let job = &shell.jobs()[0];
        assert_eq!(job.status, JobStatus::Lost);
        assert!(job.pid.is_none());
        assert!(job.usage.is_none());

        // the shell is idle again
        shell.run("true").unwrap();
        reap_until_idle(&mut shell);
        assert_eq!(shell.jobs()[1].status, JobStatus::Exited(0));
    }

    #[test]
    fn test_interior_nul_rejected() {
        let mut shell = Shell::new(&ShellConfig::default()).unwrap();
        assert!(matches!(
            shell.run("echo \0"),
            Err(ShellError::InvalidCommand(_))
        ));
        assert!(!shell.is_running());
    }

    #[test]
    fn test_child_environment() {
        let env = child_environment("magicalterm");
        let entries: Vec<&[u8]> = env.iter().map(|e| e.as_bytes()).collect();
        assert!(entries.contains(&&b"TERM=magicalterm"[..]));
        assert_eq!(entries.iter().filter(|e| e.starts_with(b"TERM=")).count(), 1);
        assert!(!entries.iter().any(|e| e.starts_with(b"COLUMNS=") || e.starts_with(b"TERMCAP=")));
    }
}
