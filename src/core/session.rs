//! Session management
//!
//! A session ties the shell to the two text buffers and is the only thing the
//! presentation layer talks to. Reads hand out byte slices for painting;
//! writes arrive as [`Command`]s and mark the session dirty so the reactor
//! repaints on its next tick.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::buffer::{BufferError, EditBuffer, HistoryBuffer};
use super::pty::PtyError;
use super::shell::{Shell, ShellConfig, ShellError};

/// Control byte that ends the session when no job is running (Ctrl+D)
pub const END_OF_SESSION: u8 = 0x04;

/// Chunk size for draining the pty
const READ_CHUNK: usize = 4096;

/// Reads per wake before yielding back to the reactor
const MAX_READS_PER_WAKE: usize = 16;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("Scrollback failure: {0}")]
    History(#[from] BufferError),
}

/// Cursor shapes, cycled with [`Command::CycleCursorStyle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStyle {
    #[default]
    Block,
    Outline,
    Bar,
}

impl CursorStyle {
    const ALL: [CursorStyle; 3] = [CursorStyle::Block, CursorStyle::Outline, CursorStyle::Bar];

    /// Step forward (`dir > 0`) or back (`dir < 0`), wrapping around.
    pub fn cycle(self, dir: i32) -> Self {
        let len = Self::ALL.len() as i32;
        let idx = Self::ALL.iter().position(|s| *s == self).unwrap_or(0) as i32;
        Self::ALL[(idx + dir.signum()).rem_euclid(len) as usize]
    }
}

/// Discrete events from the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Already-decoded text typed at the cursor
    Insert(String),
    Backspace,
    /// One rune forward (+1) or back (-1)
    MoveCursor(i32),
    Home,
    End,
    /// Pointer placed the cursor at this byte offset
    SetCursor(usize),
    KillLine,
    Submit,
    /// Untranslated control character
    Control(u8),
    RecallPrevious,
    RecallNext,
    /// Scroll back (+) or forward (-) by pages
    Scroll(i32),
    CycleCursorStyle(i32),
    SetFont(String),
    Resize { cols: u16, rows: u16 },
    Close,
}

/// Everything needed to start a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub shell: ShellConfig,
    pub prompt: String,
    pub edit_capacity: usize,
    pub history_capacity: usize,
    pub cursor_style: CursorStyle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            prompt: "% ".to_string(),
            edit_capacity: 256,
            history_capacity: 0,
            cursor_style: CursorStyle::Block,
        }
    }
}

/// A shell session with its edit line and scrollback
pub struct Session {
    shell: Shell,
    edit: EditBuffer,
    history: HistoryBuffer,
    prompt: String,
    /// Unpainted changes since the last repaint
    dirty: bool,
    exiting: bool,
    /// Pages scrolled back from the newest output
    scroll: usize,
    /// Position in the command recall, 0 = newest job
    recall: Option<usize>,
    cursor_style: CursorStyle,
    font: Option<String>,
    cols: u16,
    rows: u16,
}

impl Session {
    /// Create a new session. Fails if the shell cannot be set up.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let shell = Shell::new(&config.shell)?;
        info!(
            cols = config.shell.cols,
            rows = config.shell.rows,
            edit_capacity = config.edit_capacity,
            "session started"
        );
        Ok(Self {
            shell,
            edit: EditBuffer::new(config.edit_capacity),
            history: HistoryBuffer::with_capacity(config.history_capacity),
            prompt: config.prompt.clone(),
            dirty: true,
            exiting: false,
            scroll: 0,
            recall: None,
            cursor_style: config.cursor_style,
            font: None,
            cols: config.shell.cols,
            rows: config.shell.rows,
        })
    }

    // --- read API ---

    pub fn edit_bytes(&self) -> &[u8] {
        self.edit.as_bytes()
    }

    pub fn history_bytes(&self) -> &[u8] {
        self.history.as_bytes()
    }

    pub fn cursor_offset(&self) -> usize {
        self.edit.cursor()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn cursor_style(&self) -> CursorStyle {
        self.cursor_style
    }

    pub fn font(&self) -> Option<&str> {
        self.font.as_deref()
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    #[allow(dead_code)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    /// Check if a foreground job is running
    pub fn is_running(&self) -> bool {
        self.shell.is_running()
    }

    /// Return and clear the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    // --- write API ---

    pub fn insert(&mut self, bytes: &[u8]) {
        let before = self.edit.len();
        self.edit.insert(bytes);
        if self.edit.len() != before {
            self.dirty = true;
        }
    }

    pub fn backspace(&mut self) {
        if self.edit.backspace() {
            self.dirty = true;
        }
    }

    pub fn move_cursor(&mut self, dir: i32) {
        if self.edit.move_cursor(dir) {
            self.dirty = true;
        }
    }

    pub fn set_cursor(&mut self, offset: usize) {
        if self.edit.set_cursor(offset) {
            self.dirty = true;
        }
    }

    pub fn kill_line(&mut self) {
        self.edit.clear();
        self.recall = None;
        self.dirty = true;
    }

    /// Hand the edit line over.
    ///
    /// With no job running the line is echoed into history after the prompt
    /// and started as a job unless blank. With a job running it goes to the
    /// job's input; the terminal echo provides the history copy.
    pub fn submit(&mut self) -> Result<(), SessionError> {
        self.scroll = 0;
        self.recall = None;
        self.dirty = true;

        if self.shell.is_running() {
            let mut line = self.edit.as_bytes().to_vec();
            line.push(b'\n');
            self.shell.write(&line)?;
            self.edit.clear();
            return Ok(());
        }

        let line = String::from_utf8_lossy(self.edit.as_bytes()).into_owned();
        self.history.append(self.prompt.as_bytes())?;
        self.history.append(self.edit.as_bytes())?;
        self.history.append(b"\n")?;
        self.edit.clear();

        if line.trim().is_empty() {
            return Ok(());
        }
        match self.shell.run(&line) {
            Ok(_) => Ok(()),
            Err(e @ ShellError::Pty(_)) | Err(e @ ShellError::InvalidCommand(_)) => {
                warn!(command = %line, "could not start job: {}", e);
                self.history.append(format!("runeterm: {}\n", e).as_bytes())?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send a raw control character.
    ///
    /// End-of-session with nothing running closes the session. Otherwise a
    /// running job receives the edit line followed by the byte; with no job
    /// the edit line is discarded.
    pub fn control(&mut self, byte: u8) -> Result<(), SessionError> {
        if !self.shell.is_running() {
            if byte == END_OF_SESSION && self.edit.is_empty() {
                self.request_exit();
            } else {
                self.kill_line();
            }
            return Ok(());
        }

        let mut data = self.edit.as_bytes().to_vec();
        data.push(byte);
        self.shell.write(&data)?;
        self.edit.clear();
        self.dirty = true;
        Ok(())
    }

    /// Walk the command lines of earlier jobs, newest first.
    pub fn recall(&mut self, older: bool) {
        let count = self.shell.jobs().len();
        let next = match (self.recall, older) {
            (None, true) if count > 0 => Some(0),
            (None, _) => return,
            (Some(i), true) => Some((i + 1).min(count - 1)),
            (Some(0), false) => None,
            (Some(i), false) => Some(i - 1),
        };

        self.recall = next;
        match next {
            Some(i) => {
                let command = self.shell.jobs()[count - 1 - i].command.clone();
                if !self.edit.set_text(command.as_bytes()) {
                    debug!(command = %command, "recalled command does not fit the edit line");
                }
            }
            None => self.edit.clear(),
        }
        self.dirty = true;
    }

    /// Scroll back (positive) or forward (negative) by whole pages.
    pub fn scroll_by(&mut self, pages: i32) {
        let next = if pages >= 0 {
            self.scroll.saturating_add(pages as usize)
        } else {
            self.scroll.saturating_sub(pages.unsigned_abs() as usize)
        };
        if next != self.scroll {
            self.scroll = next;
            self.dirty = true;
        }
    }

    /// Clamp the scroll position to what the presentation layer can show.
    pub fn clamp_scroll(&mut self, max_pages: usize) {
        self.scroll = self.scroll.min(max_pages);
    }

    pub fn cycle_cursor_style(&mut self, dir: i32) {
        self.cursor_style = self.cursor_style.cycle(dir);
        self.dirty = true;
    }

    pub fn set_font(&mut self, name: &str) {
        info!(font = %name, "font requested");
        self.font = Some(name.to_string());
        self.dirty = true;
    }

    /// Resize the terminal
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if (cols, rows) == (self.cols, self.rows) {
            return Ok(());
        }
        self.shell.resize(cols, rows)?;
        self.cols = cols;
        self.rows = rows;
        self.dirty = true;
        Ok(())
    }

    pub fn request_exit(&mut self) {
        info!("exit requested");
        self.exiting = true;
    }

    /// Apply a command from the presentation layer.
    pub fn apply(&mut self, command: Command) -> Result<(), SessionError> {
        match command {
            Command::Insert(text) => self.insert(text.as_bytes()),
            Command::Backspace => self.backspace(),
            Command::MoveCursor(dir) => self.move_cursor(dir),
            Command::Home => self.set_cursor(0),
            Command::End => self.set_cursor(self.edit.len()),
            Command::SetCursor(offset) => self.set_cursor(offset),
            Command::KillLine => self.kill_line(),
            Command::Submit => self.submit()?,
            Command::Control(byte) => self.control(byte)?,
            Command::RecallPrevious => self.recall(true),
            Command::RecallNext => self.recall(false),
            Command::Scroll(pages) => self.scroll_by(pages),
            Command::CycleCursorStyle(dir) => self.cycle_cursor_style(dir),
            Command::SetFont(name) => self.set_font(&name),
            Command::Resize { cols, rows } => self.resize(cols, rows)?,
            Command::Close => self.request_exit(),
        }
        Ok(())
    }

    // --- reactor hooks ---

    /// Move pending pty output into history. Returns the byte count.
    pub fn on_pty_readable(&mut self) -> Result<usize, SessionError> {
        let mut buf = [0u8; READ_CHUNK];
        let mut total = 0;
        for _ in 0..MAX_READS_PER_WAKE {
            let n = self.shell.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.history.append(&buf[..n])?;
            if let Some(job) = self.shell.foreground_job_mut() {
                job.record_output(&buf[..n])?;
            }
            total += n;
        }
        if total > 0 {
            debug!(bytes = total, "pty output");
            self.dirty = true;
        }
        Ok(total)
    }

    /// Reap children after the bridge fired.
    pub fn on_bridge_readable(&mut self) {
        if self.shell.reap() > 0 {
            self.dirty = true;
        }
    }

    /// End the session, terminating any running job.
    pub fn exit(self) {
        info!(jobs = self.shell.jobs().len(), "session ended");
        self.shell.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::JobStatus;
    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::time::{Duration, Instant};

    fn session() -> Session {
        Session::new(&SessionConfig::default()).unwrap()
    }

    /// Run the pty and bridge until `done` holds or time runs out.
    fn pump(session: &mut Session, done: impl Fn(&Session) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(session) && Instant::now() < deadline {
            let (pty_ready, bridge_ready) = {
                let shell = session.shell();
                let mut fds = [
                    PollFd::new(shell.master_fd(), PollFlags::POLLIN),
                    PollFd::new(shell.bridge_fd(), PollFlags::POLLIN),
                ];
                loop {
                    match poll(&mut fds, PollTimeout::from(100u16)) {
                        Ok(_) => break,
                        Err(Errno::EINTR) => continue,
                        Err(e) => panic!("poll failed: {}", e),
                    }
                }
                let ready = |fd: &PollFd| fd.revents().is_some_and(|r| !r.is_empty());
                (ready(&fds[0]), ready(&fds[1]))
            };
            if bridge_ready {
                session.on_bridge_readable();
            }
            if pty_ready {
                session.on_pty_readable().unwrap();
            }
            // a notification may have raced with another test's child
            session.on_bridge_readable();
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_edit_marks_dirty() {
        let mut s = session();
        assert!(s.take_dirty());
        assert!(!s.take_dirty());

        s.apply(Command::Insert("ls".to_string())).unwrap();
        assert!(s.take_dirty());
        s.apply(Command::MoveCursor(1)).unwrap();
        assert!(!s.take_dirty());
        s.apply(Command::Backspace).unwrap();
        assert!(s.take_dirty());
        assert_eq!(s.edit_bytes(), b"l");
    }

    #[test]
    fn test_home_end_and_click() {
        let mut s = session();
        s.apply(Command::Insert("aé".to_string())).unwrap();
        s.apply(Command::Home).unwrap();
        assert_eq!(s.cursor_offset(), 0);
        s.apply(Command::End).unwrap();
        assert_eq!(s.cursor_offset(), 3);
        s.apply(Command::SetCursor(2)).unwrap();
        assert_eq!(s.cursor_offset(), 1);
    }

    #[test]
    fn test_blank_submit_only_echoes_prompt() {
        let mut s = session();
        s.apply(Command::Insert("   ".to_string())).unwrap();
        s.apply(Command::Submit).unwrap();
        assert_eq!(s.history_bytes(), b"%    \n");
        assert!(s.edit_bytes().is_empty());
        assert!(!s.is_running());
    }

    #[test]
    fn test_submit_runs_job_and_collects_output() {
        let mut s = session();
        s.apply(Command::Insert("echo hi".to_string())).unwrap();
        s.apply(Command::Submit).unwrap();

        assert!(s.history_bytes().starts_with(b"% echo hi\n"));
        assert!(s.is_running());

        pump(&mut s, |s| !s.is_running() && contains(s.history_bytes(), b"hi\r\n"));
        assert!(!s.is_running());
        assert!(contains(s.history_bytes(), b"hi\r\n"));
        assert_eq!(s.shell().jobs()[0].status, JobStatus::Exited(0));
    }

    #[test]
    fn test_submit_while_running_feeds_job() {
        let mut s = session();
        s.apply(Command::Insert("read line; echo got $line".to_string())).unwrap();
        s.apply(Command::Submit).unwrap();
        s.apply(Command::Insert("abc".to_string())).unwrap();
        s.apply(Command::Submit).unwrap();

        assert!(s.edit_bytes().is_empty());
        pump(&mut s, |s| !s.is_running() && contains(s.history_bytes(), b"got abc"));
        assert!(contains(s.history_bytes(), b"got abc"));
        assert_eq!(s.shell().jobs().len(), 1);
    }

    #[test]
    fn test_end_of_session_when_idle() {
        let mut s = session();
        s.apply(Command::Insert("x".to_string())).unwrap();
        s.apply(Command::Control(END_OF_SESSION)).unwrap();
        assert!(!s.is_exiting());
        assert!(s.edit_bytes().is_empty());

        s.apply(Command::Control(END_OF_SESSION)).unwrap();
        assert!(s.is_exiting());
    }

    #[test]
    fn test_interrupt_running_job() {
        let mut s = session();
        s.apply(Command::Insert("sleep 30".to_string())).unwrap();
        s.apply(Command::Submit).unwrap();
        assert!(s.is_running());

        s.apply(Command::Control(0x03)).unwrap();
        pump(&mut s, |s| !s.is_running());
        assert!(!s.is_running());
        assert!(!s.is_exiting());
    }

    #[test]
    fn test_recall_walks_jobs_newest_first() {
        let mut s = session();
        for cmd in ["true", "echo a"] {
            s.apply(Command::Insert(cmd.to_string())).unwrap();
            s.apply(Command::Submit).unwrap();
            pump(&mut s, |s| !s.is_running());
        }

        s.apply(Command::RecallPrevious).unwrap();
        assert_eq!(s.edit_bytes(), b"echo a");
        assert_eq!(s.cursor_offset(), 6);
        s.apply(Command::RecallPrevious).unwrap();
        assert_eq!(s.edit_bytes(), b"true");
        s.apply(Command::RecallPrevious).unwrap();
        assert_eq!(s.edit_bytes(), b"true");
        s.apply(Command::RecallNext).unwrap();
        assert_eq!(s.edit_bytes(), b"echo a");
        s.apply(Command::RecallNext).unwrap();
        assert!(s.edit_bytes().is_empty());
    }

    #[test]
    fn test_recall_without_jobs() {
        let mut s = session();
        s.apply(Command::Insert("draft".to_string())).unwrap();
        s.apply(Command::RecallPrevious).unwrap();
        assert_eq!(s.edit_bytes(), b"draft");
    }

    #[test]
    fn test_scroll_is_reset_by_submit() {
        let mut s = session();
        s.apply(Command::Scroll(-1)).unwrap();
        assert_eq!(s.scroll(), 0);
        s.apply(Command::Scroll(3)).unwrap();
        assert_eq!(s.scroll(), 3);
        s.clamp_scroll(2);
        assert_eq!(s.scroll(), 2);
        s.apply(Command::Submit).unwrap();
        assert_eq!(s.scroll(), 0);
    }

    #[test]
    fn test_cursor_style_cycles() {
        assert_eq!(CursorStyle::Block.cycle(1), CursorStyle::Outline);
        assert_eq!(CursorStyle::Bar.cycle(1), CursorStyle::Block);
        assert_eq!(CursorStyle::Block.cycle(-1), CursorStyle::Bar);

        let mut s = session();
        s.apply(Command::CycleCursorStyle(1)).unwrap();
        assert_eq!(s.cursor_style(), CursorStyle::Outline);
    }

    #[test]
    fn test_resize_and_font() {
        let mut s = session();
        s.take_dirty();
        s.apply(Command::Resize { cols: 100, rows: 30 }).unwrap();
        assert_eq!(s.size(), (100, 30));
        assert!(s.take_dirty());

        s.apply(Command::SetFont("Dina 10".to_string())).unwrap();
        assert_eq!(s.font(), Some("Dina 10"));
    }

    #[test]
    fn test_close() {
        let mut s = session();
        s.apply(Command::Close).unwrap();
        assert!(s.is_exiting());
    }
}
